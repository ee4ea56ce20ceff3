//! Realtime voice/text sessions.
//!
//! A [`SessionController`] establishes a live session with a conversational
//! endpoint over one of two transports, decodes the inbound event stream into
//! a conversation transcript and samples link telemetry while connected.
//!
//! # Layout
//!
//! - [`codec`]: wire event decode/encode
//! - [`ConversationStore`]: transcript and streaming buffers
//! - [`TelemetrySampler`]: counter snapshots to throughput
//! - [`SignalingClient`]: peer offer/answer or socket negotiation
//! - [`SessionController`]: the state machine composing the above
//!
//! # Example
//!
//! ```rust,ignore
//! use realtime_session::core::realtime::{
//!     EndpointConfig, RealtimeConfig, SessionController, SessionUpdate, TransportKind,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let controller = SessionController::new(EndpointConfig::default())?;
//!     let mut updates = controller.subscribe();
//!
//!     let config = RealtimeConfig {
//!         transport: TransportKind::Socket,
//!         ..Default::default()
//!     };
//!     controller.connect(&config).await?;
//!     controller.send_user_message("hello").await?;
//!
//!     while let Ok(update) = updates.recv().await {
//!         if let SessionUpdate::Entry(entry) = update {
//!             println!("[{}] {}", entry.role, entry.text);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod base;
pub mod codec;
mod controller;
mod conversation;
mod credential;
mod event_log;
mod media;
pub mod openai;
pub mod signaling;
mod telemetry;
mod transport;

pub use base::{
    ApiKey, ConnectionState, EndpointConfig, RealtimeConfig, RealtimeError, RealtimeResult,
    Session, SignalingStage, TransportKind,
};
pub use controller::{
    SessionController, SessionControllerBuilder, SessionUpdate, UPDATE_CHANNEL_CAPACITY,
};
pub use conversation::{ConversationEntry, ConversationStore, Role};
pub use credential::{CredentialIssuer, EphemeralCredential, HttpCredentialIssuer};
pub use event_log::{EVENT_LOG_CAPACITY, EventLog};
pub use media::{LocalAudioCapture, LocalAudioSource, MediaCapture, MediaSource, OPUS_CLOCK_RATE};
pub use signaling::SignalingClient;
pub use telemetry::{ConnectionStats, RawStats, TelemetrySampler};
pub use transport::{INBOUND_CHANNEL_CAPACITY, InboundFrame, Transport, TransportLink};
