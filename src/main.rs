use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use realtime_session::core::realtime::{
    ConnectionState, Role, SessionController, SessionUpdate, TransportKind,
};
use realtime_session::ClientConfig;
use realtime_session::core::realtime::openai::OPENAI_CLIENT_SECRETS_URL;

/// How long `--message` waits for the event channel to open.
const MESSAGE_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Realtime session client
#[derive(Parser, Debug)]
#[command(name = "realtime-session")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Transport override: "peer" or "socket"
    #[arg(short = 't', long = "transport")]
    transport: Option<String>,

    /// Message to send once connected
    #[arg(short = 'm', long = "message")]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        info!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(config_path)?
    } else {
        ClientConfig::from_env()?
    };

    if let Some(transport) = &cli.transport {
        config.session.transport = TransportKind::parse(transport)
            .ok_or_else(|| anyhow!("Unknown transport '{transport}'"))?;
    }

    if !config.has_api_key() && config.endpoints.mint_url == OPENAI_CLIENT_SECRETS_URL {
        warn!("OPENAI_API_KEY is not set; minting against the provider will be rejected");
    }

    let controller = SessionController::new(config.endpoints.clone())?;
    let printer = tokio::spawn(print_updates(controller.clone()));

    info!(transport = %config.session.transport, "Connecting");
    controller.connect(&config.session).await?;

    if let Some(message) = &cli.message {
        send_when_ready(&controller, message).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if controller.state() != ConnectionState::Connected {
                            warn!("Session is no longer connected");
                            break;
                        }
                        if !controller.send_user_message(&line).await? && !line.trim().is_empty() {
                            warn!("Event channel not open, message dropped");
                        }
                    }
                    None => break,
                }
            }
        }
    }

    controller.disconnect().await;
    printer.abort();
    Ok(())
}

/// Retry until the event channel accepts the message.
async fn send_when_ready(controller: &SessionController, message: &str) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + MESSAGE_READY_TIMEOUT;
    loop {
        if controller.send_user_message(message).await? {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow!("Event channel did not open in time"));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn print_updates(controller: SessionController) {
    let mut updates = controller.subscribe();
    loop {
        match updates.recv().await {
            Ok(SessionUpdate::Entry(entry)) => {
                let speaker = match entry.role {
                    Role::User => "you",
                    Role::Assistant => "assistant",
                };
                println!("[{speaker}] {}", entry.text);
            }
            Ok(SessionUpdate::State(state)) => info!(%state, "Session state"),
            Ok(SessionUpdate::ServerError(message)) => eprintln!("server error: {message}"),
            Ok(SessionUpdate::Failed(error)) => eprintln!("session failed: {error}"),
            Ok(SessionUpdate::Stats(stats)) => {
                tracing::debug!(
                    in_kbps = stats.in_kbps,
                    out_kbps = stats.out_kbps,
                    rtt_ms = ?stats.round_trip_time_ms,
                    "Link stats"
                );
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Update observer lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
