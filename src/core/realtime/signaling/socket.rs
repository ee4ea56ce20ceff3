//! WebSocket negotiation for the socket transport.
//!
//! The ephemeral credential is presented as a sub-protocol next to
//! `realtime`, the form the endpoint accepts from clients that cannot set
//! handshake headers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{mint_credential, until_cancelled};
use crate::core::realtime::base::{
    EndpointConfig, RealtimeConfig, RealtimeError, RealtimeResult, SignalingStage, TransportKind,
};
use crate::core::realtime::codec;
use crate::core::realtime::credential::CredentialIssuer;
use crate::core::realtime::openai::{
    OPENAI_CREDENTIAL_SUBPROTOCOL_PREFIX, OPENAI_REALTIME_SUBPROTOCOL,
};
use crate::core::realtime::telemetry::RawStats;
use crate::core::realtime::transport::{
    INBOUND_CHANNEL_CAPACITY, InboundFrame, Transport, TransportLink,
};

/// Outbound message queue capacity.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `close` waits for the socket task to send its close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// WebSocket negotiation.
pub struct SocketSignaling {
    socket_url: String,
}

impl SocketSignaling {
    pub fn new(endpoints: &EndpointConfig) -> Self {
        Self {
            socket_url: endpoints.socket_url.clone(),
        }
    }

    pub(super) async fn negotiate(
        &self,
        config: &RealtimeConfig,
        issuer: &dyn CredentialIssuer,
        cancel: &CancellationToken,
    ) -> RealtimeResult<Transport> {
        let credential = mint_credential(issuer, config, cancel).await?;

        let socket_err = |e: String| RealtimeError::signaling(SignalingStage::Socket, e);

        let url = build_socket_url(&self.socket_url, &config.model)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| socket_err(e.to_string()))?;

        // The credential travels in the sub-protocol list
        let protocols = format!(
            "{OPENAI_REALTIME_SUBPROTOCOL}, {OPENAI_CREDENTIAL_SUBPROTOCOL_PREFIX}{}",
            credential.expose()
        );
        let protocols = HeaderValue::from_str(&protocols).map_err(|e| socket_err(e.to_string()))?;
        request
            .headers_mut()
            .insert(http::header::SEC_WEBSOCKET_PROTOCOL, protocols);

        let connect = async {
            tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| socket_err(e.to_string()))
        };
        let (ws_stream, _response) = until_cancelled(cancel, connect).await?;

        info!(url = %url, "Connected to realtime socket");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(WS_CHANNEL_CAPACITY);

        let _ = inbound_tx
            .send(InboundFrame::Lifecycle("socket.open".to_string()))
            .await;

        if config.send_session_update {
            let update = codec::encode(&codec::session_update(config))?;
            ws_sink
                .send(Message::Text(update.into()))
                .await
                .map_err(|e| socket_err(e.to_string()))?;
        }

        let open = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();

        let task_open = open.clone();
        let task_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_shutdown.cancelled() => {
                        if let Err(e) = ws_sink.send(Message::Close(None)).await {
                            debug!(error = %e, "Failed to send close frame");
                        }
                        break;
                    }

                    // Handle outgoing messages
                    Some(text) = out_rx.recv() => {
                        if let Err(e) = ws_sink.send(Message::Text(text.into())).await {
                            warn!(error = %e, "Failed to send socket message");
                            let _ = inbound_tx.send(InboundFrame::Lifecycle("socket.error".to_string())).await;
                            let _ = inbound_tx.send(InboundFrame::Fault(e.to_string())).await;
                            break;
                        }
                    }

                    // Handle incoming messages
                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let _ = inbound_tx.send(InboundFrame::Message(text.to_string())).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                let text = String::from_utf8_lossy(&data).into_owned();
                                let _ = inbound_tx.send(InboundFrame::Message(text)).await;
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    warn!(error = %e, "Failed to send pong");
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                let reason = frame
                                    .map(|f| format!("socket closed by server: {} {}", u16::from(f.code), f.reason))
                                    .unwrap_or_else(|| "socket closed by server".to_string());
                                info!(%reason, "Realtime socket closed");
                                let _ = inbound_tx.send(InboundFrame::Lifecycle("socket.close".to_string())).await;
                                let _ = inbound_tx.send(InboundFrame::Fault(reason)).await;
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "Realtime socket error");
                                let _ = inbound_tx.send(InboundFrame::Lifecycle("socket.error".to_string())).await;
                                let _ = inbound_tx.send(InboundFrame::Fault(e.to_string())).await;
                                break;
                            }
                            None => {
                                let _ = inbound_tx.send(InboundFrame::Lifecycle("socket.close".to_string())).await;
                                let _ = inbound_tx.send(InboundFrame::Fault("socket stream ended".to_string())).await;
                                break;
                            }
                        }
                    }
                }
            }
            task_open.store(false, Ordering::SeqCst);
            debug!("Socket task finished");
        });

        Ok(Transport {
            link: Arc::new(SocketLink {
                out_tx,
                open,
                shutdown,
                task: Mutex::new(Some(handle)),
            }),
            inbound: inbound_rx,
        })
    }
}

/// Resolve the socket URL, adding the `model` query parameter when absent.
pub fn build_socket_url(base: &str, model: &str) -> RealtimeResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| RealtimeError::signaling(SignalingStage::Socket, e.to_string()))?;
    if !url.query_pairs().any(|(key, _)| key == "model") {
        url.query_pairs_mut().append_pair("model", model);
    }
    Ok(url)
}

/// Established socket transport.
pub struct SocketLink {
    out_tx: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl TransportLink for SocketLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.shutdown.is_cancelled()
    }

    async fn send_text(&self, text: String) -> RealtimeResult<()> {
        if !self.is_open() {
            return Err(RealtimeError::Transport("socket not open".to_string()));
        }
        self.out_tx
            .send(text)
            .await
            .map_err(|_| RealtimeError::Transport("socket task stopped".to_string()))
    }

    async fn stats(&self) -> Option<RawStats> {
        None
    }

    async fn close(&self) -> RealtimeResult<()> {
        self.shutdown.cancel();
        self.open.store(false, Ordering::SeqCst);

        let handle = self.task.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                debug!("Socket task did not finish in time, aborting");
                handle.abort();
            }
        }
        Ok(())
    }
}

impl Drop for SocketLink {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_appended_when_absent() {
        let url = build_socket_url("wss://api.openai.com/v1/realtime", "gpt-realtime").unwrap();
        assert_eq!(url.as_str(), "wss://api.openai.com/v1/realtime?model=gpt-realtime");
    }

    #[test]
    fn test_existing_model_kept() {
        let url =
            build_socket_url("ws://127.0.0.1:9000/realtime?model=custom", "gpt-realtime").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9000/realtime?model=custom");
    }

    #[test]
    fn test_invalid_url_is_socket_stage_error() {
        let err = build_socket_url("not a url", "gpt-realtime").unwrap_err();
        assert_eq!(err.stage(), Some(SignalingStage::Socket));
    }
}
