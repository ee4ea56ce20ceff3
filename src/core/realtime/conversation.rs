//! Transcript reconstruction.
//!
//! [`ConversationStore`] owns the ordered conversation log and the streaming
//! buffers that accumulate assistant text between a `delta` and its `done`.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Speaker of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One line of the transcript. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Item or response identifier
    pub id: String,
    /// Speaker
    pub role: Role,
    /// Full text of the entry
    pub text: String,
    /// Position in append order, assigned by the store
    pub sequence: u64,
}

impl ConversationEntry {
    pub fn new(id: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            text: text.into(),
            sequence: 0,
        }
    }
}

/// Ordered transcript plus per-response streaming buffers.
#[derive(Debug, Default)]
pub struct ConversationStore {
    entries: Vec<ConversationEntry>,
    ids: HashSet<String>,
    buffers: HashMap<String, String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry in arrival order.
    ///
    /// Returns `None` without appending when an entry with the same id is
    /// already present, so a server echo of a locally created item and a
    /// `created`/`added` pair for one item each land once.
    pub fn append(&mut self, mut entry: ConversationEntry) -> Option<&ConversationEntry> {
        if !self.ids.insert(entry.id.clone()) {
            return None;
        }
        entry.sequence = self.entries.len() as u64;
        self.entries.push(entry);
        self.entries.last()
    }

    /// Append a streamed fragment to the buffer of `response_id`, creating it
    /// on first use.
    pub fn push_delta(&mut self, response_id: &str, delta: &str) {
        self.buffers
            .entry(response_id.to_string())
            .or_default()
            .push_str(delta);
    }

    /// Remove the buffer of `response_id` and return its text.
    ///
    /// Returns `None` when there is nothing to flush (no buffer, or an empty
    /// one). The buffer is gone afterwards either way.
    pub fn flush(&mut self, response_id: &str) -> Option<String> {
        self.buffers
            .remove(response_id)
            .filter(|text| !text.is_empty())
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of responses currently streaming.
    pub fn open_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn clear_buffers(&mut self) {
        self.buffers.clear();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
        self.buffers.clear();
    }
}
