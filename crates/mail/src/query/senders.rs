//! Sender aggregation queries

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::MessageId;
use crate::storage::MailStore;

/// Messages and total size attributed to one sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderAggregate {
    /// Sender email address (the grouping key)
    pub sender: String,
    /// Display name seen on the most recent message, if any
    pub display_name: Option<String>,
    pub domain: String,
    /// IDs ordered oldest first
    pub message_ids: Vec<MessageId>,
    /// Sum of size estimates in bytes
    pub total_size: i64,
    pub count: usize,
}

/// Group every stored message by sender email
///
/// Addresses are compared exactly; no normalization or identity merging.
/// The result is a snapshot of the store at the time of the call.
pub fn aggregate_by_sender(store: &dyn MailStore) -> Result<HashMap<String, SenderAggregate>> {
    let mut aggregates: HashMap<String, SenderAggregate> = HashMap::new();

    for message in store.list_messages()? {
        let entry = aggregates
            .entry(message.sender.key().to_string())
            .or_insert_with(|| SenderAggregate {
                sender: message.sender.email.clone(),
                display_name: None,
                domain: message.sender.domain.clone(),
                message_ids: Vec::new(),
                total_size: 0,
                count: 0,
            });

        // Messages arrive oldest first, so the last name seen wins
        if message.sender.display_name.is_some() {
            entry.display_name = message.sender.display_name.clone();
        }
        entry.total_size += message.size_estimate;
        entry.count += 1;
        entry.message_ids.push(message.id);
    }

    Ok(aggregates)
}

/// Sender aggregates, largest total size first
///
/// Ties are broken by message count (descending), then by address.
pub fn senders_by_size(store: &dyn MailStore) -> Result<Vec<SenderAggregate>> {
    let mut senders: Vec<SenderAggregate> = aggregate_by_sender(store)?.into_values().collect();
    senders.sort_by(|a, b| {
        b.total_size
            .cmp(&a.total_size)
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| a.sender.cmp(&b.sender))
    });
    Ok(senders)
}

/// IDs of every stored message from `sender`
pub fn messages_from_sender(store: &dyn MailStore, sender: &str) -> Result<Vec<MessageId>> {
    Ok(store
        .list_messages()?
        .into_iter()
        .filter(|m| m.sender.key() == sender)
        .map(|m| m.id)
        .collect())
}
