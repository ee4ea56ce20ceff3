//! Base types for realtime voice/text sessions.
//!
//! This module defines the error taxonomy, connection states and the
//! configuration shared by the signaling strategies and the session
//! controller.
//!
//! # Transports
//!
//! - `peer`: offer/answer negotiation with a data channel for events and an
//!   audio track for media
//! - `socket`: message-only WebSocket authenticated through the negotiated
//!   sub-protocol

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::openai::{
    OPENAI_CLIENT_SECRETS_URL, OPENAI_REALTIME_CALLS_URL, OPENAI_REALTIME_DEFAULT_MODEL,
    OPENAI_REALTIME_URL, OpenAIRealtimeVoice,
};

// =============================================================================
// Error Types
// =============================================================================

/// Stage of transport negotiation at which a signaling failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingStage {
    /// Attaching the local capture track to the peer
    MediaTrack,
    /// Creating the event data channel
    DataChannel,
    /// Creating or applying the local offer
    Offer,
    /// Waiting for local candidate gathering to complete
    Gathering,
    /// Minting the ephemeral credential
    Credential,
    /// Posting the local description to the signaling endpoint
    Exchange,
    /// Applying the answer as remote description
    RemoteDescription,
    /// Opening the socket
    Socket,
}

impl SignalingStage {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MediaTrack => "media_track",
            Self::DataChannel => "data_channel",
            Self::Offer => "offer",
            Self::Gathering => "gathering",
            Self::Credential => "credential",
            Self::Exchange => "exchange",
            Self::RemoteDescription => "remote_description",
            Self::Socket => "socket",
        }
    }
}

impl fmt::Display for SignalingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during a realtime session.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// Operation not valid in the current connection state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Local capture denied or unavailable
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(String),

    /// Transport negotiation failed at a specific stage
    #[error("Signaling failed at {stage}: {message}")]
    Signaling {
        stage: SignalingStage,
        message: String,
    },

    /// Post-connection socket or channel fault
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed individual inbound message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl RealtimeError {
    /// Shorthand for a signaling failure at `stage`.
    pub fn signaling(stage: SignalingStage, message: impl Into<String>) -> Self {
        Self::Signaling {
            stage,
            message: message.into(),
        }
    }

    /// Stage name when this is a signaling failure.
    pub fn stage(&self) -> Option<SignalingStage> {
        match self {
            Self::Signaling { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether this error ends the current session.
    ///
    /// Only protocol errors are recovered locally; the offending message is
    /// logged and processing continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of a session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session
    #[default]
    Idle,
    /// Acquiring resources and negotiating the transport
    Connecting,
    /// Transport open and events flowing
    Connected,
    /// Negotiation or transport failed
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Transport used to carry the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Offer/answer peer connection with a data channel
    #[default]
    Peer,
    /// Message-only WebSocket
    Socket,
}

impl TransportKind {
    /// Parse from string, accepting the common aliases.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "peer" | "webrtc" | "direct" => Some(Self::Peer),
            "socket" | "websocket" | "ws" => Some(Self::Socket),
            _ => None,
        }
    }

    /// Whether this transport carries local audio and needs a capture source.
    #[inline]
    pub fn needs_capture(&self) -> bool {
        matches!(self, Self::Peer)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Peer => write!(f, "peer"),
            TransportKind::Socket => write!(f, "socket"),
        }
    }
}

// =============================================================================
// Configuration Types
// =============================================================================

/// Per-session configuration passed to `connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Model to use (e.g., "gpt-realtime")
    pub model: String,

    /// Voice for audio output
    pub voice: String,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Requested output modalities
    #[serde(default)]
    pub modalities: Vec<String>,

    /// Enable transcription of the user's audio
    #[serde(default)]
    pub input_transcription: bool,

    /// Transport carrying the session
    #[serde(default)]
    pub transport: TransportKind,

    /// Send a `session.update` once the event channel opens
    #[serde(default)]
    pub send_session_update: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            model: OPENAI_REALTIME_DEFAULT_MODEL.to_string(),
            voice: OpenAIRealtimeVoice::default().as_str().to_string(),
            instructions: Some("You are a helpful assistant.".to_string()),
            modalities: vec!["audio".to_string(), "text".to_string()],
            input_transcription: true,
            transport: TransportKind::default(),
            send_session_update: true,
        }
    }
}

/// Long-lived key presented to the credential endpoint.
///
/// Zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[inline]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Remote endpoints and timing used while negotiating and running a session.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Credential-issuing endpoint
    pub mint_url: String,

    /// Bearer key sent to the credential endpoint, if any.
    /// Omitted when the mint URL is a local proxy holding the secret itself.
    pub api_key: Option<ApiKey>,

    /// Offer/answer signaling endpoint
    pub calls_url: String,

    /// WebSocket endpoint
    pub socket_url: String,

    /// ICE server URLs for candidate gathering
    pub ice_servers: Vec<String>,

    /// Upper bound on the candidate-gathering wait
    pub gathering_timeout: Duration,

    /// Timeout applied to HTTP requests (credential mint, SDP exchange)
    pub request_timeout: Duration,

    /// Telemetry sampling period
    pub telemetry_interval: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            mint_url: OPENAI_CLIENT_SECRETS_URL.to_string(),
            api_key: None,
            calls_url: OPENAI_REALTIME_CALLS_URL.to_string(),
            socket_url: OPENAI_REALTIME_URL.to_string(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            gathering_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            telemetry_interval: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// The live session owned by a controller between `connect` and teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Locally generated session identifier
    pub id: String,
    /// Current connection state
    pub state: ConnectionState,
    /// Transport carrying the session
    pub transport: TransportKind,
    /// Output voice
    pub voice: String,
    /// System instructions
    pub instructions: Option<String>,
}

impl Session {
    pub(crate) fn new(config: &RealtimeConfig) -> Self {
        Self {
            id: format!("sess_{}", uuid::Uuid::new_v4().simple()),
            state: ConnectionState::Connecting,
            transport: config.transport,
            voice: config.voice.clone(),
            instructions: config.instructions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signaling_error_display_names_stage() {
        let err = RealtimeError::signaling(SignalingStage::Credential, "No client secret returned");
        assert_eq!(
            err.to_string(),
            "Signaling failed at credential: No client secret returned"
        );
        assert_eq!(err.stage(), Some(SignalingStage::Credential));
    }

    #[test]
    fn test_data_channel_stage_is_distinct() {
        let err = RealtimeError::signaling(SignalingStage::DataChannel, "sctp unavailable");
        assert_eq!(err.stage(), Some(SignalingStage::DataChannel));
        assert_ne!(SignalingStage::DataChannel, SignalingStage::MediaTrack);
        assert_eq!(
            err.to_string(),
            "Signaling failed at data_channel: sctp unavailable"
        );
        assert_eq!(
            serde_json::to_string(&SignalingStage::DataChannel).unwrap(),
            r#""data_channel""#
        );
    }

    #[test]
    fn test_only_protocol_errors_are_recoverable() {
        assert!(!RealtimeError::Protocol("bad delta".into()).is_fatal());
        assert!(RealtimeError::Transport("closed".into()).is_fatal());
        assert!(RealtimeError::MediaAcquisition("denied".into()).is_fatal());
        assert!(RealtimeError::signaling(SignalingStage::Exchange, "500").is_fatal());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Error.to_string(), "error");
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!(TransportKind::parse("socket"), Some(TransportKind::Socket));
        assert_eq!(TransportKind::parse("WebSocket"), Some(TransportKind::Socket));
        assert_eq!(TransportKind::parse("peer"), Some(TransportKind::Peer));
        assert_eq!(TransportKind::parse(" webrtc "), Some(TransportKind::Peer));
        assert_eq!(TransportKind::parse("carrier-pigeon"), None);
        assert!(TransportKind::Peer.needs_capture());
        assert!(!TransportKind::Socket.needs_capture());
    }

    #[test]
    fn test_default_realtime_config() {
        let config = RealtimeConfig::default();
        assert_eq!(config.model, "gpt-realtime");
        assert_eq!(config.voice, "marin");
        assert_eq!(config.modalities, vec!["audio", "text"]);
        assert!(config.input_transcription);
        assert!(config.send_session_update);
        assert_eq!(config.transport, TransportKind::Peer);
    }

    #[test]
    fn test_endpoint_debug_redacts_api_key() {
        let endpoints = EndpointConfig {
            api_key: Some(ApiKey::new("sk-secret")),
            ..Default::default()
        };
        let debug = format!("{endpoints:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_session_new_copies_config() {
        let config = RealtimeConfig {
            transport: TransportKind::Socket,
            voice: "cedar".to_string(),
            ..Default::default()
        };
        let session = Session::new(&config);
        assert!(session.id.starts_with("sess_"));
        assert_eq!(session.state, ConnectionState::Connecting);
        assert_eq!(session.transport, TransportKind::Socket);
        assert_eq!(session.voice, "cedar");
    }
}
