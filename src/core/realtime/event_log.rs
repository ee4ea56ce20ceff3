//! Bounded event log.
//!
//! Keeps the labels of the most recent inbound events for display and
//! debugging. Oldest labels are evicted first.

use std::collections::VecDeque;

/// Maximum number of labels retained by an [`EventLog`].
pub const EVENT_LOG_CAPACITY: usize = 200;

/// Bounded log of the most recent event-type labels (or raw payloads for
/// untyped messages). The oldest label is evicted on overflow.
#[derive(Debug, Clone)]
pub struct EventLog {
    labels: VecDeque<String>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            labels: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, label: impl Into<String>) {
        if self.labels.len() == self.capacity {
            self.labels.pop_front();
        }
        self.labels.push_back(label.into());
    }

    /// Labels, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.iter().map(str::to_owned).collect()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn clear(&mut self) {
        self.labels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut log = EventLog::new();
        for i in 0..EVENT_LOG_CAPACITY {
            log.push(format!("event.{i}"));
        }
        assert_eq!(log.len(), EVENT_LOG_CAPACITY);
        assert_eq!(log.iter().next(), Some("event.0"));

        log.push("event.200");
        assert_eq!(log.len(), EVENT_LOG_CAPACITY);
        assert_eq!(log.iter().next(), Some("event.1"));
        assert_eq!(log.iter().next_back(), Some("event.200"));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut log = EventLog::with_capacity(3);
        for i in 0..50 {
            log.push(i.to_string());
            assert!(log.len() <= 3);
        }
        assert_eq!(log.to_vec(), vec!["47", "48", "49"]);
    }

    #[test]
    fn test_newest_first_iteration() {
        let mut log = EventLog::new();
        log.push("a");
        log.push("b");
        let newest_first: Vec<_> = log.iter().rev().collect();
        assert_eq!(newest_first, vec!["b", "a"]);
    }
}
