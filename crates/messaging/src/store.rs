use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parley_core::event::DeliveryState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// What the pipeline remembers about a message so corrections and receipts
/// can find it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: String,
    /// Bare address of the other party.
    pub peer: String,
    pub direction: Direction,
    pub body: String,
    pub thread: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub delivery: DeliveryState,
    pub corrected: bool,
}

impl MessageRecord {
    /// Moves delivery forward. Returns `false` when `next` would be a
    /// regression or a repeat.
    pub fn advance(&mut self, next: DeliveryState) -> bool {
        if !self.delivery.can_advance_to(next) {
            return false;
        }
        self.delivery = next;
        true
    }
}

/// Messages by id. Records are never deleted.
pub trait MessageStore: Send {
    fn get(&self, id: &str) -> Option<&MessageRecord>;
    fn get_mut(&mut self, id: &str) -> Option<&mut MessageRecord>;
    /// Keeps the existing record when the id is already known. Returns
    /// whether `record` was stored.
    fn insert(&mut self, record: MessageRecord) -> bool;
    fn len(&self) -> usize;

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    records: HashMap<String, MessageRecord>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn get(&self, id: &str) -> Option<&MessageRecord> {
        self.records.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut MessageRecord> {
        self.records.get_mut(id)
    }

    fn insert(&mut self, record: MessageRecord) -> bool {
        if self.records.contains_key(&record.id) {
            return false;
        }
        self.records.insert(record.id.clone(), record);
        true
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            peer: "bob@example.com".to_string(),
            direction: Direction::Outgoing,
            body: "hi".to_string(),
            thread: None,
            timestamp: Utc::now(),
            delivery: DeliveryState::Sent,
            corrected: false,
        }
    }

    #[test]
    fn first_insert_wins() {
        let mut store = InMemoryMessageStore::new();
        assert!(store.insert(record("m1")));

        let mut duplicate = record("m1");
        duplicate.body = "changed".to_string();
        assert!(!store.insert(duplicate));

        assert_eq!(store.get("m1").unwrap().body, "hi");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delivery_only_moves_forward() {
        let mut record = record("m1");
        assert!(record.advance(DeliveryState::Delivered));
        assert!(record.advance(DeliveryState::Displayed));
        assert!(!record.advance(DeliveryState::Delivered));
        assert!(!record.advance(DeliveryState::Displayed));
        assert!(!record.advance(DeliveryState::Failed));
        assert_eq!(record.delivery, DeliveryState::Displayed);
    }

    #[test]
    fn failure_only_from_sent() {
        let mut record = record("m1");
        assert!(record.advance(DeliveryState::Failed));
        assert_eq!(record.delivery, DeliveryState::Failed);
    }
}
