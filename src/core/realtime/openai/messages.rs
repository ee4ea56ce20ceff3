//! OpenAI Realtime API event types.
//!
//! All events are JSON objects discriminated by their `type` field. The same
//! events travel over the peer data channel and the WebSocket.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Update session configuration
//! - conversation.item.create - Add item to conversation
//! - response.create - Generate a response
//!
//! Server events (received from server):
//! - response.output_text.delta / .done - Streamed text output
//! - response.output_audio_transcript.delta / .done - Streamed transcript of audio output
//! - conversation.item.created / conversation.item.added - Item added to conversation
//! - error - Error occurred
//!
//! Any other server event type is accepted and surfaces as [`ServerEvent::Unknown`].

use serde::{Deserialize, Serialize};

use crate::core::realtime::base::RealtimeConfig;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration, used both for `session.update` and the credential
/// mint request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session type (always "realtime")
    #[serde(rename = "type")]
    pub session_type: String,

    /// Model to use
    pub model: String,

    /// Requested output modalities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modalities: Vec<String>,

    /// System instructions for the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Audio input/output settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,
}

/// Audio settings of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<AudioOutputConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<AudioInputConfig>,
}

/// Output audio settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutputConfig {
    /// Voice for audio output
    pub voice: String,
}

/// Input audio settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInputConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionToggle>,
}

/// Input audio transcription toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionToggle {
    pub enabled: bool,
}

impl SessionConfig {
    /// Full configuration sent in `session.update` once the event channel opens.
    pub fn for_update(config: &RealtimeConfig) -> Self {
        Self {
            session_type: "realtime".to_string(),
            model: config.model.clone(),
            modalities: config.modalities.clone(),
            instructions: config.instructions.clone(),
            audio: Some(AudioConfig {
                output: Some(AudioOutputConfig {
                    voice: config.voice.clone(),
                }),
                input: Some(AudioInputConfig {
                    transcription: Some(TranscriptionToggle {
                        enabled: config.input_transcription,
                    }),
                }),
            }),
        }
    }

    /// Configuration presented when minting an ephemeral credential.
    pub fn for_credential(config: &RealtimeConfig) -> Self {
        Self {
            session_type: "realtime".to_string(),
            model: config.model.clone(),
            modalities: Vec::new(),
            instructions: config.instructions.clone(),
            audio: Some(AudioConfig {
                output: Some(AudioOutputConfig {
                    voice: config.voice.clone(),
                }),
                input: None,
            }),
        }
    }
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub item_type: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, output_text, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ConversationItem {
    /// A user text message.
    pub fn user_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            item_type: Some("message".to_string()),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: Some("input_text".to_string()),
                text: Some(text.into()),
            }]),
        }
    }

    /// Whether this is a message item spoken or typed by the user.
    pub fn is_user_message(&self) -> bool {
        self.item_type.as_deref() == Some("message") && self.role.as_deref() == Some("user")
    }

    /// Text of all parts that carry any, joined with a single space.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .flatten()
            .filter_map(|part| part.text.as_deref())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent to the OpenAI Realtime API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received from the OpenAI Realtime API.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        #[serde(default)]
        error: Option<ApiError>,
    },

    /// Text output chunk
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        delta: Option<String>,
    },

    /// Text output complete
    #[serde(rename = "response.output_text.done")]
    OutputTextDone {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Audio output transcript chunk
    #[serde(rename = "response.output_audio_transcript.delta")]
    OutputAudioTranscriptDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        delta: Option<String>,
    },

    /// Audio output transcript complete
    #[serde(rename = "response.output_audio_transcript.done")]
    OutputAudioTranscriptDone {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Item created in the conversation
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        /// The created item
        item: ConversationItem,
    },

    /// Item added to the conversation
    #[serde(rename = "conversation.item.added")]
    ConversationItemAdded {
        /// The added item
        item: ConversationItem,
    },

    /// Any other event type
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Supporting Types
// =============================================================================

/// API error information.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Error code
    #[serde(default)]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiError {
    /// Best human-readable description available.
    pub fn describe(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.code.clone())
            .or_else(|| self.error_type.clone())
            .unwrap_or_else(|| "unknown server error".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_update_serialization() {
        let config = RealtimeConfig::default();
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig::for_update(&config),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "session.update",
                "session": {
                    "type": "realtime",
                    "model": "gpt-realtime",
                    "modalities": ["audio", "text"],
                    "instructions": "You are a helpful assistant.",
                    "audio": {
                        "output": { "voice": "marin" },
                        "input": { "transcription": { "enabled": true } }
                    }
                }
            })
        );
    }

    #[test]
    fn test_credential_session_omits_input_and_modalities() {
        let config = RealtimeConfig {
            instructions: None,
            ..Default::default()
        };
        let value = serde_json::to_value(SessionConfig::for_credential(&config)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "realtime",
                "model": "gpt-realtime",
                "audio": { "output": { "voice": "marin" } }
            })
        );
    }

    #[test]
    fn test_response_create_serialization() {
        let json = serde_json::to_string(&ClientEvent::ResponseCreate).unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn test_conversation_item_create_serialization() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text("item_1", "hi"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["id"], "item_1");
        assert_eq!(value["item"]["type"], "message");
        assert_eq!(value["item"]["role"], "user");
        assert_eq!(value["item"]["content"][0]["type"], "input_text");
        assert_eq!(value["item"]["content"][0]["text"], "hi");
    }

    #[test]
    fn test_server_event_unknown_type() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"session.created","session":{"id":"s"}}"#).unwrap();
        assert_eq!(event, ServerEvent::Unknown);
    }

    #[test]
    fn test_server_event_tolerates_null_delta() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"response.output_text.delta","response_id":"r1","delta":null}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::OutputTextDelta {
                response_id: Some("r1".to_string()),
                delta: None
            }
        );
    }

    #[test]
    fn test_joined_text_skips_parts_without_text() {
        let item: ConversationItem = serde_json::from_value(json!({
            "id": "item_9",
            "type": "message",
            "role": "user",
            "content": [
                { "type": "input_text", "text": "hello" },
                { "type": "input_audio", "transcript": null },
                { "type": "input_text", "text": "there" }
            ]
        }))
        .unwrap();
        assert!(item.is_user_message());
        assert_eq!(item.joined_text(), "hello there");
    }

    #[test]
    fn test_api_error_describe_falls_back() {
        let error = ApiError {
            error_type: Some("invalid_request_error".to_string()),
            code: None,
            message: None,
        };
        assert_eq!(error.describe(), "invalid_request_error");
    }
}
