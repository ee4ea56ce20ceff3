//! Transport contract shared by the peer and socket variants.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::base::{RealtimeResult, TransportKind};
use super::telemetry::RawStats;

/// Capacity of the inbound frame channel between a link and its consumer.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Something the transport delivered to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Text message received on the event channel
    Message(String),
    /// Transport lifecycle marker for the event log (e.g. `socket.open`)
    Lifecycle(String),
    /// The transport failed or was closed by the remote end
    Fault(String),
}

/// Outbound half of an established transport.
#[async_trait]
pub trait TransportLink: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Whether the event channel currently accepts messages.
    fn is_open(&self) -> bool;

    /// Send one text message on the event channel.
    async fn send_text(&self, text: String) -> RealtimeResult<()>;

    /// Cumulative counters, when the transport exposes them.
    async fn stats(&self) -> Option<RawStats>;

    /// Close the transport. Safe to call more than once.
    async fn close(&self) -> RealtimeResult<()>;
}

/// An established transport: the link to send on and the stream of frames it
/// delivers.
pub struct Transport {
    pub link: std::sync::Arc<dyn TransportLink>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.link.kind())
            .field("open", &self.link.is_open())
            .finish()
    }
}
