//! OpenAI Realtime API protocol module.
//!
//! Endpoints, voices and the JSON event types exchanged with the OpenAI
//! Realtime API over either transport.
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, cedar, coral, echo, marin, sage, shimmer, verse

mod config;
mod messages;

pub use config::{
    OPENAI_CLIENT_SECRETS_URL, OPENAI_CREDENTIAL_SUBPROTOCOL_PREFIX, OPENAI_EVENTS_CHANNEL,
    OPENAI_REALTIME_CALLS_URL, OPENAI_REALTIME_DEFAULT_MODEL, OPENAI_REALTIME_SUBPROTOCOL,
    OPENAI_REALTIME_URL, OpenAIRealtimeVoice,
};
pub use messages::{
    ApiError, AudioConfig, AudioInputConfig, AudioOutputConfig, ClientEvent, ContentPart,
    ConversationItem, ServerEvent, SessionConfig, TranscriptionToggle,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_realtime_urls() {
        assert_eq!(OPENAI_REALTIME_URL, "wss://api.openai.com/v1/realtime");
        assert_eq!(
            OPENAI_REALTIME_CALLS_URL,
            "https://api.openai.com/v1/realtime/calls"
        );
    }

    #[test]
    fn test_events_channel_label() {
        assert_eq!(OPENAI_EVENTS_CHANNEL, "oai-events");
    }
}
