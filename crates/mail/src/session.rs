//! One authenticated mailbox and its local mirror

use anyhow::{Context, Result};
use log::info;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::actions::{ActionHandler, DeleteReport};
use crate::models::{MessageId, SyncState};
use crate::query::{self, SenderAggregate};
use crate::remote::MailRemote;
use crate::storage::{MailStore, SqliteMailStore};
use crate::sync::{self, SyncAction, SyncError, SyncOptions, SyncStats, with_retry};

/// A mailbox paired with its mirror database
///
/// This is the entry point for front ends: it wires the remote, the store
/// and the sync options together for one account.
pub struct MailboxSession {
    account: String,
    remote: Arc<dyn MailRemote>,
    store: Arc<dyn MailStore>,
    options: SyncOptions,
}

impl MailboxSession {
    /// Look up the mailbox address and open its database under `data_dir`
    pub fn connect(remote: Arc<dyn MailRemote>, data_dir: &Path, options: SyncOptions) -> Result<Self> {
        let profile = with_retry(&options, "profile lookup", || remote.profile())
            .context("Failed to read mailbox profile")?;

        config::ensure_dir(data_dir)?;
        let db_path = database_path(data_dir, &profile.email_address);
        info!(
            "Opening mirror for {} at {}",
            profile.email_address,
            db_path.display()
        );
        let store = SqliteMailStore::new(&db_path)?;

        Ok(Self::with_store(
            profile.email_address,
            remote,
            Arc::new(store),
            options,
        ))
    }

    /// Assemble a session from parts; performs no I/O
    pub fn with_store(
        account: impl Into<String>,
        remote: Arc<dyn MailRemote>,
        store: Arc<dyn MailStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            account: account.into(),
            remote,
            store,
            options,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn store(&self) -> &Arc<dyn MailStore> {
        &self.store
    }

    /// Run one sync pass
    pub fn sync(&self) -> Result<SyncStats, SyncError> {
        sync::sync_mailbox(
            self.remote.as_ref(),
            self.store.as_ref(),
            &self.account,
            &self.options,
        )
    }

    pub fn sync_action(&self) -> Result<SyncAction> {
        sync::determine_sync_action(self.store.as_ref())
    }

    pub fn sync_state(&self) -> Result<Option<SyncState>> {
        self.store.get_sync_state()
    }

    pub fn message_count(&self) -> Result<usize> {
        self.store.count_messages()
    }

    pub fn aggregate_by_sender(&self) -> Result<HashMap<String, SenderAggregate>> {
        query::aggregate_by_sender(self.store.as_ref())
    }

    pub fn senders_by_size(&self) -> Result<Vec<SenderAggregate>> {
        query::senders_by_size(self.store.as_ref())
    }

    pub fn delete_messages(&self, ids: &[MessageId]) -> Result<DeleteReport> {
        self.actions().delete_messages(ids)
    }

    pub fn delete_sender(&self, sender: &str) -> Result<DeleteReport> {
        self.actions().delete_sender(sender)
    }

    fn actions(&self) -> ActionHandler {
        ActionHandler::new(self.remote.clone(), self.store.clone(), self.options.clone())
    }
}

/// Database file for `account` under `data_dir`
pub fn database_path(data_dir: &Path, account: &str) -> PathBuf {
    let file_stem: String = account
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    data_dir.join(format!("{file_stem}.sqlite"))
}
