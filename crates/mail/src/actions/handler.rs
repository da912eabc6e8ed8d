//! Action handler for mailbox mutations
//!
//! Coordinates between the remote mailbox and local storage.

use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;

use crate::models::MessageId;
use crate::query::messages_from_sender;
use crate::remote::{MailRemote, RemoteError};
use crate::storage::MailStore;
use crate::sync::{SyncOptions, with_retry};

/// Outcome of a deletion request
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DeleteReport {
    /// Trashed remotely and removed from the mirror
    pub removed: Vec<MessageId>,
    /// Not trashed; the local record was kept
    pub failed: Vec<(MessageId, RemoteError)>,
}

impl DeleteReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Handler for deleting messages
///
/// Every deletion happens in two steps:
/// 1. Move the message to the trash on the server
/// 2. Remove the record from local storage
///
/// The server stays the source of truth: a record is only dropped locally
/// once the server accepted the change.
pub struct ActionHandler {
    remote: Arc<dyn MailRemote>,
    store: Arc<dyn MailStore>,
    options: SyncOptions,
}

impl ActionHandler {
    pub fn new(remote: Arc<dyn MailRemote>, store: Arc<dyn MailStore>, options: SyncOptions) -> Self {
        Self {
            remote,
            store,
            options,
        }
    }

    /// Trash `ids` remotely and drop them from the mirror
    ///
    /// Remote failures are collected per message. A local store failure
    /// aborts the operation and is returned as an error.
    pub fn delete_messages(&self, ids: &[MessageId]) -> Result<DeleteReport> {
        let mut report = DeleteReport::default();
        if ids.is_empty() {
            return Ok(report);
        }

        info!("Trashing {} messages", ids.len());

        for id in ids {
            let trashed = with_retry(&self.options, "trash", || self.remote.trash_message(id));
            match trashed {
                // Already gone on the server
                Ok(()) | Err(RemoteError::NotFound) => {
                    self.store.remove_message(id)?;
                    report.removed.push(id.clone());
                }
                Err(err) => {
                    warn!("Failed to trash message {}: {}", id, err);
                    report.failed.push((id.clone(), err));
                }
            }
        }

        info!(
            "Trashed {} messages, {} failed",
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Trash every stored message from `sender`
    pub fn delete_sender(&self, sender: &str) -> Result<DeleteReport> {
        let ids = messages_from_sender(self.store.as_ref(), sender)?;
        self.delete_messages(&ids)
    }
}
