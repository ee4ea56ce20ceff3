//! Event protocol codec.
//!
//! Decodes inbound wire messages into [`InboundEvent`]s, applies them to a
//! [`ConversationStore`] and [`EventLog`], and encodes the outbound commands
//! the session sends. The codec owns no state; the streaming buffers it works
//! over belong to the store.

use serde_json::Value;
use tracing::{debug, trace};

use super::base::{RealtimeConfig, RealtimeError, RealtimeResult};
use super::conversation::{ConversationEntry, ConversationStore, Role};
use super::event_log::EventLog;
use super::openai::{ClientEvent, ConversationItem, ServerEvent, SessionConfig};

/// Longest item id the API accepts for client-created items.
const MAX_ITEM_ID_LEN: usize = 32;

// =============================================================================
// Decode
// =============================================================================

/// Domain meaning of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Not JSON, or JSON without a string `type`
    Opaque,
    /// Fragment of assistant text for a response
    AssistantDelta {
        response_id: Option<String>,
        delta: String,
    },
    /// End of a streamed assistant response
    AssistantDone { response_id: Option<String> },
    /// Complete user message item
    UserItem {
        item_id: Option<String>,
        text: String,
    },
    /// Server-reported error
    ServerError { message: String },
    /// Recognized envelope with no transcript effect
    Ignored,
    /// Known type whose fields did not parse
    Malformed { reason: String },
}

/// A decoded message together with the label recorded in the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Event type, or the raw payload when untyped
    pub label: String,
    pub event: InboundEvent,
}

/// Decode one inbound message. Never fails; unparsable input is opaque.
pub fn decode(raw: &str) -> Decoded {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return opaque(raw),
    };

    let Some(event_type) = value.get("type").and_then(Value::as_str) else {
        return opaque(raw);
    };
    let label = event_type.to_string();

    let event = match serde_json::from_value::<ServerEvent>(value) {
        Ok(event) => interpret(event),
        Err(e) => InboundEvent::Malformed {
            reason: format!("{label}: {e}"),
        },
    };

    Decoded { label, event }
}

fn opaque(raw: &str) -> Decoded {
    Decoded {
        label: raw.to_string(),
        event: InboundEvent::Opaque,
    }
}

fn interpret(event: ServerEvent) -> InboundEvent {
    match event {
        ServerEvent::OutputTextDelta { response_id, delta }
        | ServerEvent::OutputAudioTranscriptDelta { response_id, delta } => {
            InboundEvent::AssistantDelta {
                response_id,
                delta: delta.unwrap_or_default(),
            }
        }
        ServerEvent::OutputTextDone { response_id }
        | ServerEvent::OutputAudioTranscriptDone { response_id } => {
            InboundEvent::AssistantDone { response_id }
        }
        ServerEvent::ConversationItemCreated { item }
        | ServerEvent::ConversationItemAdded { item } => user_item(item),
        ServerEvent::Error { error } => InboundEvent::ServerError {
            message: error
                .map(|e| e.describe())
                .unwrap_or_else(|| "unknown server error".to_string()),
        },
        ServerEvent::Unknown => InboundEvent::Ignored,
    }
}

fn user_item(item: ConversationItem) -> InboundEvent {
    if !item.is_user_message() {
        return InboundEvent::Ignored;
    }
    InboundEvent::UserItem {
        text: item.joined_text(),
        item_id: item.id,
    }
}

// =============================================================================
// Apply
// =============================================================================

/// Effects of applying one inbound message.
#[derive(Debug, Default)]
pub struct Applied {
    /// Label recorded in the event log
    pub label: String,
    /// Entries appended to the conversation
    pub entries: Vec<ConversationEntry>,
    /// Message of a server `error` event
    pub server_error: Option<String>,
    /// Recovered decode failure
    pub protocol_error: Option<RealtimeError>,
}

/// Decode `raw` and apply it to the transcript and event log.
pub fn apply(raw: &str, store: &mut ConversationStore, log: &mut EventLog) -> Applied {
    let Decoded { label, event } = decode(raw);
    let mut applied = Applied::default();

    match event {
        InboundEvent::AssistantDelta { response_id, delta } => {
            store.push_delta(response_id.as_deref().unwrap_or_default(), &delta);
        }
        InboundEvent::AssistantDone { response_id } => {
            let key = response_id.as_deref().unwrap_or_default();
            if let Some(text) = store.flush(key) {
                let id = response_id.unwrap_or_else(|| generated_id("resp"));
                if let Some(entry) = store.append(ConversationEntry::new(id, Role::Assistant, text))
                {
                    applied.entries.push(entry.clone());
                }
            }
        }
        InboundEvent::UserItem { item_id, text } => {
            let id = item_id.unwrap_or_else(|| generated_id("item"));
            match store.append(ConversationEntry::new(id, Role::User, text)) {
                Some(entry) => applied.entries.push(entry.clone()),
                None => debug!("Skipping already recorded user item"),
            }
        }
        InboundEvent::ServerError { message } => {
            applied.server_error = Some(message);
        }
        InboundEvent::Malformed { reason } => {
            applied.protocol_error = Some(RealtimeError::Protocol(reason));
        }
        InboundEvent::Opaque | InboundEvent::Ignored => {
            trace!(label = %label, "Event has no transcript effect");
        }
    }

    log.push(label.clone());
    applied.label = label;
    applied
}

// =============================================================================
// Encode
// =============================================================================

/// Serialize an outbound command.
pub fn encode(event: &ClientEvent) -> RealtimeResult<String> {
    serde_json::to_string(event).map_err(|e| RealtimeError::Protocol(e.to_string()))
}

/// The `session.update` command sent when the event channel opens.
pub fn session_update(config: &RealtimeConfig) -> ClientEvent {
    ClientEvent::SessionUpdate {
        session: SessionConfig::for_update(config),
    }
}

/// The "create item" + "request response" pair for a typed user message.
pub fn user_message(item_id: &str, text: &str) -> [ClientEvent; 2] {
    [
        ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text(item_id, text),
        },
        ClientEvent::ResponseCreate,
    ]
}

/// A fresh client-side item id, within the API's length limit.
pub fn new_item_id() -> String {
    generated_id("item")
}

fn generated_id(prefix: &str) -> String {
    let mut id = format!("{prefix}_{}", uuid::Uuid::new_v4().simple());
    id.truncate(MAX_ITEM_ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_all(messages: &[&str]) -> (ConversationStore, EventLog) {
        let mut store = ConversationStore::new();
        let mut log = EventLog::new();
        for message in messages {
            apply(message, &mut store, &mut log);
        }
        (store, log)
    }

    #[test]
    fn test_deltas_then_done_produce_one_assistant_entry() {
        let (store, log) = apply_all(&[
            r#"{"type":"response.output_text.delta","response_id":"resp_1","delta":"Hel"}"#,
            r#"{"type":"response.output_text.delta","response_id":"resp_1","delta":"lo, "}"#,
            r#"{"type":"response.output_text.delta","response_id":"resp_1","delta":"world"}"#,
            r#"{"type":"response.output_text.done","response_id":"resp_1"}"#,
        ]);

        assert_eq!(store.len(), 1);
        let entry = &store.entries()[0];
        assert_eq!(entry.id, "resp_1");
        assert_eq!(entry.role, Role::Assistant);
        assert_eq!(entry.text, "Hello, world");
        assert_eq!(store.open_buffers(), 0);
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_audio_transcript_stream_is_buffered_too() {
        let (store, _) = apply_all(&[
            r#"{"type":"response.output_audio_transcript.delta","response_id":"r","delta":"spoken "}"#,
            r#"{"type":"response.output_audio_transcript.delta","response_id":"r","delta":"words"}"#,
            r#"{"type":"response.output_audio_transcript.done","response_id":"r"}"#,
        ]);
        assert_eq!(store.entries()[0].text, "spoken words");
    }

    #[test]
    fn test_done_without_deltas_appends_nothing() {
        let (store, log) = apply_all(&[r#"{"type":"response.output_text.done","response_id":"r"}"#]);
        assert!(store.is_empty());
        assert_eq!(log.to_vec(), vec!["response.output_text.done"]);
    }

    #[test]
    fn test_second_done_for_same_response_is_noop() {
        let (store, _) = apply_all(&[
            r#"{"type":"response.output_text.delta","response_id":"r","delta":"x"}"#,
            r#"{"type":"response.output_text.done","response_id":"r"}"#,
            r#"{"type":"response.output_text.done","response_id":"r"}"#,
        ]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_done_without_response_id_gets_generated_id() {
        let (store, _) = apply_all(&[
            r#"{"type":"response.output_text.delta","delta":"anon"}"#,
            r#"{"type":"response.output_text.done"}"#,
        ]);
        assert_eq!(store.len(), 1);
        assert!(store.entries()[0].id.starts_with("resp_"));
        assert_eq!(store.entries()[0].text, "anon");
    }

    #[test]
    fn test_user_item_appended_whole() {
        let (store, _) = apply_all(&[
            r#"{"type":"conversation.item.created","item":{"id":"item_a","type":"message","role":"user","content":[{"type":"input_text","text":"good"},{"type":"input_audio"},{"type":"input_text","text":"morning"}]}}"#,
        ]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.entries()[0].role, Role::User);
        assert_eq!(store.entries()[0].text, "good morning");
    }

    #[test]
    fn test_created_and_added_for_same_item_append_once() {
        let item = r#""item":{"id":"item_b","type":"message","role":"user","content":[{"type":"input_text","text":"hi"}]}"#;
        let created = format!(r#"{{"type":"conversation.item.created",{item}}}"#);
        let added = format!(r#"{{"type":"conversation.item.added",{item}}}"#);
        let (store, log) = apply_all(&[&created, &added]);
        assert_eq!(store.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_assistant_items_are_not_user_entries() {
        let (store, _) = apply_all(&[
            r#"{"type":"conversation.item.added","item":{"id":"i","type":"message","role":"assistant","content":[{"type":"output_text","text":"x"}]}}"#,
        ]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_unrecognized_type_is_logged_only() {
        let (store, log) = apply_all(&[r#"{"type":"rate_limits.updated","rate_limits":[]}"#]);
        assert!(store.is_empty());
        assert_eq!(log.to_vec(), vec!["rate_limits.updated"]);
    }

    #[test]
    fn test_untyped_and_unparsable_payloads_logged_raw() {
        let (store, log) = apply_all(&[r#"{"hello":"world"}"#, "not json at all"]);
        assert!(store.is_empty());
        assert_eq!(log.to_vec(), vec![r#"{"hello":"world"}"#, "not json at all"]);
    }

    #[test]
    fn test_malformed_known_event_is_recovered() {
        let mut store = ConversationStore::new();
        let mut log = EventLog::new();
        let applied = apply(
            r#"{"type":"response.output_text.delta","response_id":"r","delta":42}"#,
            &mut store,
            &mut log,
        );
        assert!(matches!(applied.protocol_error, Some(RealtimeError::Protocol(_))));
        assert_eq!(log.to_vec(), vec!["response.output_text.delta"]);
        assert_eq!(store.open_buffers(), 0);
    }

    #[test]
    fn test_server_error_message_extracted() {
        let mut store = ConversationStore::new();
        let mut log = EventLog::new();
        let applied = apply(
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"Bad voice"}}"#,
            &mut store,
            &mut log,
        );
        assert_eq!(applied.server_error.as_deref(), Some("Bad voice"));
        assert_eq!(log.to_vec(), vec!["error"]);
    }

    #[test]
    fn test_user_message_pair() {
        let [create, respond] = user_message("item_x", "hi");
        let create = encode(&create).unwrap();
        assert!(create.contains(r#""type":"conversation.item.create""#));
        assert!(create.contains(r#""id":"item_x""#));
        assert_eq!(encode(&respond).unwrap(), r#"{"type":"response.create"}"#);
    }

    #[test]
    fn test_new_item_id_fits_limit() {
        let id = new_item_id();
        assert!(id.starts_with("item_"));
        assert_eq!(id.len(), MAX_ITEM_ID_LEN);
        assert_ne!(id, new_item_id());
    }
}
