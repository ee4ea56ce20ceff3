//! Transport negotiation.
//!
//! A [`SignalingClient`] turns a session configuration into an established
//! [`Transport`]. Two strategies exist:
//!
//! - [`PeerSignaling`]: build a peer connection, gather candidates, mint a
//!   credential and exchange the offer for an answer over HTTP
//! - [`SocketSignaling`]: mint a credential and open a WebSocket that carries
//!   it in the sub-protocol header
//!
//! Negotiation races a [`CancellationToken`] so that a `disconnect` issued
//! mid-connect abandons the attempt promptly.

mod peer;
mod socket;

pub use peer::{PeerLink, PeerSignaling, exchange_sdp};
pub use socket::{SocketLink, SocketSignaling, build_socket_url};

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::base::{EndpointConfig, RealtimeConfig, RealtimeError, RealtimeResult, TransportKind};
use super::credential::{CredentialIssuer, EphemeralCredential};
use super::media::MediaCapture;
use super::transport::Transport;

/// Negotiates a transport of one kind.
pub enum SignalingClient {
    Peer(PeerSignaling),
    Socket(SocketSignaling),
}

impl SignalingClient {
    /// Strategy for `kind`, sharing `http` for credential and offer requests.
    pub fn for_kind(kind: TransportKind, endpoints: &EndpointConfig, http: reqwest::Client) -> Self {
        match kind {
            TransportKind::Peer => Self::Peer(PeerSignaling::new(endpoints, http)),
            TransportKind::Socket => Self::Socket(SocketSignaling::new(endpoints)),
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Peer(_) => TransportKind::Peer,
            Self::Socket(_) => TransportKind::Socket,
        }
    }

    /// Establish the transport.
    ///
    /// `capture` is attached as the outbound audio track for peer transports
    /// and ignored for sockets. Any failure is reported with the stage at
    /// which it happened; cancellation yields [`RealtimeError::InvalidState`].
    pub async fn negotiate(
        &self,
        config: &RealtimeConfig,
        issuer: &dyn CredentialIssuer,
        capture: Option<Arc<dyn MediaCapture>>,
        cancel: &CancellationToken,
    ) -> RealtimeResult<Transport> {
        match self {
            Self::Peer(peer) => peer.negotiate(config, issuer, capture, cancel).await,
            Self::Socket(socket) => socket.negotiate(config, issuer, cancel).await,
        }
    }
}

pub(crate) fn superseded() -> RealtimeError {
    RealtimeError::InvalidState("connect superseded by disconnect".to_string())
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> RealtimeResult<T>
where
    F: Future<Output = RealtimeResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(superseded()),
        result = fut => result,
    }
}

pub(crate) async fn mint_credential(
    issuer: &dyn CredentialIssuer,
    config: &RealtimeConfig,
    cancel: &CancellationToken,
) -> RealtimeResult<EphemeralCredential> {
    until_cancelled(cancel, issuer.mint(config)).await
}
