//! In-memory storage implementation
//!
//! Used by tests and as a scratch mirror when no database is wanted.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::MailStore;
use crate::models::{Message, MessageId, SyncState};

/// In-memory implementation of MailStore
///
/// A batch upsert holds the write lock for the whole batch, so readers
/// never see part of it.
pub struct InMemoryMailStore {
    messages: RwLock<HashMap<String, Message>>,
    sync_state: RwLock<Option<SyncState>>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(HashMap::new()),
            sync_state: RwLock::new(None),
        }
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailStore for InMemoryMailStore {
    fn upsert_messages(&self, messages: &[Message]) -> Result<()> {
        let mut stored = self.messages.write().unwrap();
        for message in messages {
            stored.insert(message.id.0.clone(), message.clone());
        }
        Ok(())
    }

    fn remove_message(&self, id: &MessageId) -> Result<()> {
        self.messages.write().unwrap().remove(id.as_str());
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.messages.read().unwrap().get(id.as_str()).cloned())
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        Ok(self.messages.read().unwrap().contains_key(id.as_str()))
    }

    fn known_ids(&self) -> Result<HashSet<MessageId>> {
        let messages = self.messages.read().unwrap();
        Ok(messages.keys().map(|id| MessageId::new(id.as_str())).collect())
    }

    fn list_messages(&self) -> Result<Vec<Message>> {
        let messages = self.messages.read().unwrap();
        let mut result: Vec<Message> = messages.values().cloned().collect();
        result.sort_by(|a, b| {
            a.internal_date
                .cmp(&b.internal_date)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(result)
    }

    fn count_messages(&self) -> Result<usize> {
        Ok(self.messages.read().unwrap().len())
    }

    fn get_sync_state(&self) -> Result<Option<SyncState>> {
        Ok(self.sync_state.read().unwrap().clone())
    }

    fn save_sync_state(&self, state: SyncState) -> Result<()> {
        *self.sync_state.write().unwrap() = Some(state);
        Ok(())
    }

    fn delete_sync_state(&self) -> Result<()> {
        *self.sync_state.write().unwrap() = None;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.messages.write().unwrap().clear();
        *self.sync_state.write().unwrap() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sender, ThreadId};

    fn make_test_message(id: &str, internal_date: i64) -> Message {
        Message::builder(MessageId::new(id), ThreadId::new("t1"))
            .sender(Sender::new("test@example.com"))
            .internal_date(internal_date)
            .size_estimate(100)
            .build()
    }

    #[test]
    fn test_upsert_and_get() {
        let store = InMemoryMailStore::new();
        store.upsert_message(make_test_message("m1", 1)).unwrap();

        assert!(store.has_message(&MessageId::new("m1")).unwrap());
        assert_eq!(
            store.get_message(&MessageId::new("m1")).unwrap().unwrap().id,
            MessageId::new("m1")
        );
    }

    #[test]
    fn test_upsert_overwrites() {
        let store = InMemoryMailStore::new();
        store.upsert_message(make_test_message("m1", 1)).unwrap();

        let mut changed = make_test_message("m1", 1);
        changed.size_estimate = 999;
        store.upsert_message(changed).unwrap();

        assert_eq!(store.count_messages().unwrap(), 1);
        let stored = store.get_message(&MessageId::new("m1")).unwrap().unwrap();
        assert_eq!(stored.size_estimate, 999);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = InMemoryMailStore::new();
        store.upsert_message(make_test_message("m1", 1)).unwrap();

        store.remove_message(&MessageId::new("m1")).unwrap();
        store.remove_message(&MessageId::new("m1")).unwrap();
        store.remove_message(&MessageId::new("never")).unwrap();
        assert_eq!(store.count_messages().unwrap(), 0);
    }

    #[test]
    fn test_list_messages_ordered_by_date() {
        let store = InMemoryMailStore::new();
        store
            .upsert_messages(&[make_test_message("late", 30), make_test_message("early", 10)])
            .unwrap();

        let ids: Vec<String> = store
            .list_messages()
            .unwrap()
            .into_iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[test]
    fn test_sync_state_round_trip() {
        let store = InMemoryMailStore::new();
        assert!(store.get_sync_state().unwrap().is_none());

        store.save_sync_state(SyncState::new("me@example.com", "42")).unwrap();
        assert_eq!(store.get_sync_state().unwrap().unwrap().history_id, "42");

        store.delete_sync_state().unwrap();
        assert!(store.get_sync_state().unwrap().is_none());
    }
}
