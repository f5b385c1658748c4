//! Append-only, strictly ordered log of chat and system messages.
//!
//! Ordering is arrival order at the authoritative session, never
//! client-local time. Sequence numbers are per-room, strictly increasing,
//! and never reused; the log lives for the lifetime of its room.

use serde::{Deserialize, Serialize};

/// A chat or system entry. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    ChatMessage {
        author_id: String,
        display_name: String,
        text: String,
        at: u64,
    },
    SystemNotice {
        text: String,
        at: u64,
    },
}

/// An event plus the sequence number the log assigned to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub seq: u64,
    pub event: Event,
}

/// Append-only event log for one room.
#[derive(Debug, Default)]
pub struct EventLog {
    entries: Vec<SequencedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its assigned sequence number.
    pub fn append(&mut self, event: Event) -> u64 {
        let seq = self.last_seq() + 1;
        self.entries.push(SequencedEvent { seq, event });
        seq
    }

    /// Events strictly after the given sequence number, in order.
    /// `since(0)` returns the whole log; used for reconnect catch-up.
    pub fn since(&self, seq: u64) -> Vec<SequencedEvent> {
        self.entries
            .iter()
            .filter(|e| e.seq > seq)
            .cloned()
            .collect()
    }

    /// Highest assigned sequence number, 0 when the log is empty.
    pub fn last_seq(&self) -> u64 {
        self.entries.last().map(|e| e.seq).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
