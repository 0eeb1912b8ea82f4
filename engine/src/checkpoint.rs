//! Per-category replay cursors for event ingestion.
//!
//! Each event category advances independently so a stalled feed in one
//! category never blocks the others. A cursor only ever moves forward; an
//! event at or behind the cursor is a replay and must be skipped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::EventCategory;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStore {
    cursors: BTreeMap<EventCategory, u64>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the last applied event in `category`, if any.
    pub fn last_applied(&self, category: EventCategory) -> Option<u64> {
        self.cursors.get(&category).copied()
    }

    /// An event at or behind the cursor has already been applied.
    pub fn is_replay(&self, category: EventCategory, at: u64) -> bool {
        match self.last_applied(category) {
            Some(last) => at <= last,
            None => false,
        }
    }

    /// Move the cursor forward. Never moves it back.
    pub fn advance(&mut self, category: EventCategory, at: u64) {
        let cursor = self.cursors.entry(category).or_insert(at);
        if at > *cursor {
            *cursor = at;
        }
    }
}
