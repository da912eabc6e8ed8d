//! Storage trait definitions

use std::collections::HashSet;

use crate::models::{Message, MessageId, SyncState};
use anyhow::Result;

/// Trait for mirror storage operations
///
/// Implementations must apply `upsert_messages` atomically: a concurrent
/// reader sees either none or all of a batch. Any error returned from a
/// write is fatal to the running sync pass.
pub trait MailStore: Send + Sync {
    /// Insert or replace a batch of messages in one transaction
    ///
    /// An existing row with the same ID is overwritten entirely.
    fn upsert_messages(&self, messages: &[Message]) -> Result<()>;

    /// Insert or replace a single message
    fn upsert_message(&self, message: Message) -> Result<()> {
        self.upsert_messages(std::slice::from_ref(&message))
    }

    /// Delete a message if present; deleting an absent ID is not an error
    fn remove_message(&self, id: &MessageId) -> Result<()>;

    /// Get a message by ID
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Check if a message exists
    fn has_message(&self, id: &MessageId) -> Result<bool>;

    /// IDs of every stored message
    fn known_ids(&self) -> Result<HashSet<MessageId>>;

    /// All stored messages, ordered by internal date ascending
    fn list_messages(&self) -> Result<Vec<Message>>;

    /// Count stored messages
    fn count_messages(&self) -> Result<usize>;

    /// Get the sync cursor, if any
    fn get_sync_state(&self) -> Result<Option<SyncState>>;

    /// Replace the sync cursor
    fn save_sync_state(&self, state: SyncState) -> Result<()>;

    /// Forget the sync cursor, forcing the next pass to do a full fetch
    fn delete_sync_state(&self) -> Result<()>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;
}
