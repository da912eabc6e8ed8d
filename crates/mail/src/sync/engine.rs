//! Sync pass orchestration
//!
//! A pass reads the stored cursor and either enumerates the whole mailbox
//! (no cursor) or replays the history log since the cursor. The cursor is
//! written last, and only when everything before it succeeded.

use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;

use super::retry::with_retry;
use super::{BatchFetcher, FetchReport, SyncError, SyncOptions};
use crate::gmail::api::HistoryRecord;
use crate::models::{MessageId, SyncState};
use crate::remote::{MailRemote, RemoteError};
use crate::storage::MailStore;

/// How a pass brought the mirror up to date
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Complete enumeration; there was no cursor
    #[default]
    Full,
    /// Replay of the history log since the cursor
    Incremental,
    /// Complete enumeration after the provider rejected the cursor
    FullAfterExpiredHistory,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
            Self::FullAfterExpiredHistory => "full (history expired)",
        })
    }
}

/// Statistics from a sync pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncStats {
    pub mode: SyncMode,
    /// Listing or history pages read
    pub pages: usize,
    /// Message IDs returned by the listing (full fetch only)
    pub messages_listed: usize,
    /// New records written
    pub messages_stored: usize,
    /// IDs skipped because they were already stored
    pub messages_skipped: usize,
    /// Records removed (deleted or trashed remotely, or missing from a full listing)
    pub messages_removed: usize,
    /// Records re-fetched after a label change
    pub messages_refreshed: usize,
    /// IDs given up on after permanent failures or exhausted retries
    pub abandoned: usize,
    /// Cursor committed at the end of the pass
    pub history_id: String,
    pub duration_ms: u64,
}

impl SyncStats {
    fn record_fetch(&mut self, report: &FetchReport) {
        self.messages_stored += report.stored;
        self.messages_skipped += report.skipped;
        self.messages_removed += report.removed;
        self.abandoned += report.abandoned.len();
    }

    fn record_refresh(&mut self, report: &FetchReport) {
        self.messages_refreshed += report.stored;
        self.messages_removed += report.removed;
        self.abandoned += report.abandoned.len();
    }
}

/// What the next pass will do, for status display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// No cursor: the whole mailbox will be enumerated
    FullFetch,
    /// Cursor present: history since `history_id` will be replayed
    HistoryReplay { history_id: String },
}

/// Decide between a full fetch and a history replay from the stored cursor
pub fn determine_sync_action(store: &dyn MailStore) -> anyhow::Result<SyncAction> {
    Ok(match store.get_sync_state()? {
        Some(state) => SyncAction::HistoryReplay {
            history_id: state.history_id,
        },
        None => SyncAction::FullFetch,
    })
}

/// Run one sync pass for `account_id`
///
/// Safe to re-run after any failure: writes are idempotent and the cursor
/// only moves when the pass completes.
pub fn sync_mailbox(
    remote: &dyn MailRemote,
    store: &dyn MailStore,
    account_id: &str,
    options: &SyncOptions,
) -> Result<SyncStats, SyncError> {
    let start = Instant::now();
    let mut stats = SyncStats::default();

    let cursor = store
        .get_sync_state()
        .map_err(SyncError::store)?
        .filter(|state| {
            let same_account = state.account_id == account_id;
            if !same_account {
                warn!(
                    "Stored cursor belongs to {}, not {}; running a full fetch",
                    state.account_id, account_id
                );
            }
            same_account
        });

    // Position to commit at the end; changes after it are replayed next pass
    let target = with_retry(options, "history position lookup", || {
        remote.current_history_id()
    })
    .map_err(SyncError::Cursor)?;

    let mut fetcher = BatchFetcher::new(remote, store, options.clone())?;

    match &cursor {
        None => {
            info!("Starting full sync for {}", account_id);
            full_fetch(remote, store, &mut fetcher, options, &mut stats)?;
        }
        Some(state) => {
            info!(
                "Starting incremental sync for {} from history {}",
                account_id, state.history_id
            );
            stats.mode = SyncMode::Incremental;
            match history_replay(remote, store, &mut fetcher, &state.history_id, options, &mut stats) {
                Ok(()) => {}
                Err(SyncError::Remote(RemoteError::HistoryExpired)) => {
                    warn!(
                        "History {} is no longer available; falling back to full sync",
                        state.history_id
                    );
                    stats.mode = SyncMode::FullAfterExpiredHistory;
                    full_fetch(remote, store, &mut fetcher, options, &mut stats)?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    let state = match cursor {
        Some(previous) => previous.updated(target.clone()),
        None => SyncState::new(account_id, target.clone()),
    };
    store.save_sync_state(state).map_err(SyncError::store)?;

    stats.history_id = target;
    stats.duration_ms = start.elapsed().as_millis() as u64;

    info!(
        "Sync complete ({}): {} stored, {} skipped, {} removed, {} refreshed, {} abandoned in {}ms",
        stats.mode,
        stats.messages_stored,
        stats.messages_skipped,
        stats.messages_removed,
        stats.messages_refreshed,
        stats.abandoned,
        stats.duration_ms
    );

    Ok(stats)
}

/// Enumerate every message ID, store the unknown ones, then drop stored
/// records the listing no longer contains
fn full_fetch(
    remote: &dyn MailRemote,
    store: &dyn MailStore,
    fetcher: &mut BatchFetcher<'_>,
    options: &SyncOptions,
    stats: &mut SyncStats,
) -> Result<(), SyncError> {
    let page_size = options.effective_page_size();
    let mut listed: HashSet<MessageId> = HashSet::new();
    let mut page_token: Option<String> = None;

    loop {
        let page = with_retry(options, "message listing", || {
            remote.list_message_ids(page_size, page_token.as_deref())
        })?;
        stats.pages += 1;
        stats.messages_listed += page.ids.len();

        let report = fetcher.fetch_and_store(&page.ids)?;
        stats.record_fetch(&report);
        debug!(
            "Listing page {}: {} ids, {} stored, {} skipped",
            stats.pages,
            page.ids.len(),
            report.stored,
            report.skipped
        );
        listed.extend(page.ids);

        // Empty pages may still carry a token
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    let stale: Vec<MessageId> = fetcher
        .known_ids()
        .filter(|id| !listed.contains(*id))
        .cloned()
        .collect();
    if !stale.is_empty() {
        info!("Removing {} messages no longer in the mailbox", stale.len());
    }
    for id in &stale {
        store.remove_message(id).map_err(SyncError::store)?;
        fetcher.forget(id);
    }
    stats.messages_removed += stale.len();

    Ok(())
}

/// Replay history pages since `start_history_id`
fn history_replay(
    remote: &dyn MailRemote,
    store: &dyn MailStore,
    fetcher: &mut BatchFetcher<'_>,
    start_history_id: &str,
    options: &SyncOptions,
    stats: &mut SyncStats,
) -> Result<(), SyncError> {
    let mut page_token: Option<String> = None;

    loop {
        let page = with_retry(options, "history listing", || {
            remote.list_history(start_history_id, page_token.as_deref())
        })?;
        stats.pages += 1;

        let plan = HistoryPlan::from_records(&page.records);
        debug!(
            "History page {}: {} records, {} added, {} deleted, {} label changes",
            stats.pages,
            page.records.len(),
            plan.added.len(),
            plan.deleted.len(),
            plan.relabeled.len()
        );
        plan.apply(store, fetcher, stats)?;

        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(())
}

/// Net effect of one history page
///
/// Built by walking the records in order. Applying the plan (deletes, then
/// fetches, then refreshes) leaves the store as applying every event in
/// event order would: an ID deleted after it was added ends up only in
/// `deleted`, and an ID re-added after a delete only in `added`. Label
/// changes are kept for added IDs too, since an add event may be a replay
/// of a message an interrupted pass already stored.
#[derive(Debug, Default, PartialEq, Eq)]
struct HistoryPlan {
    added: Vec<MessageId>,
    deleted: Vec<MessageId>,
    relabeled: Vec<MessageId>,
}

impl HistoryPlan {
    fn from_records(records: &[HistoryRecord]) -> Self {
        let mut plan = Self::default();

        for record in records {
            for added in record.messages_added.iter().flatten() {
                let id = MessageId::new(&added.message.id);
                plan.deleted.retain(|d| d != &id);
                if !plan.added.contains(&id) {
                    plan.added.push(id);
                }
            }

            for deleted in record.messages_deleted.iter().flatten() {
                let id = MessageId::new(&deleted.message.id);
                plan.added.retain(|a| a != &id);
                plan.relabeled.retain(|r| r != &id);
                if !plan.deleted.contains(&id) {
                    plan.deleted.push(id);
                }
            }

            let label_changes = record
                .labels_added
                .iter()
                .flatten()
                .chain(record.labels_removed.iter().flatten());
            for change in label_changes {
                let id = MessageId::new(&change.message.id);
                if !plan.deleted.contains(&id) && !plan.relabeled.contains(&id) {
                    plan.relabeled.push(id);
                }
            }
        }

        plan
    }

    fn apply(
        self,
        store: &dyn MailStore,
        fetcher: &mut BatchFetcher<'_>,
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        for id in &self.deleted {
            if fetcher.is_known(id) {
                stats.messages_removed += 1;
            }
            store.remove_message(id).map_err(SyncError::store)?;
            fetcher.forget(id);
        }

        // Label changes on messages the mirror lacks are treated as additions
        let (refresh, missing): (Vec<MessageId>, Vec<MessageId>) = self
            .relabeled
            .into_iter()
            .partition(|id| fetcher.is_known(id));

        let mut added: Vec<MessageId> = self
            .added
            .into_iter()
            .filter(|id| !refresh.contains(id))
            .collect();
        for id in missing {
            if !added.contains(&id) {
                added.push(id);
            }
        }
        if !added.is_empty() {
            let report = fetcher.fetch_and_store(&added)?;
            stats.record_fetch(&report);
        }

        if !refresh.is_empty() {
            let report = fetcher.refetch_and_store(&refresh)?;
            stats.record_refresh(&report);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::{HistoryLabelChange, HistoryMessage, MessageRef};
    use crate::models::SyncState;
    use crate::storage::InMemoryMailStore;

    fn message_ref(id: &str) -> MessageRef {
        MessageRef {
            id: id.to_string(),
            thread_id: None,
        }
    }

    fn added(id: &str) -> HistoryRecord {
        HistoryRecord {
            messages_added: Some(vec![HistoryMessage {
                message: message_ref(id),
            }]),
            ..Default::default()
        }
    }

    fn deleted(id: &str) -> HistoryRecord {
        HistoryRecord {
            messages_deleted: Some(vec![HistoryMessage {
                message: message_ref(id),
            }]),
            ..Default::default()
        }
    }

    fn relabeled(id: &str) -> HistoryRecord {
        HistoryRecord {
            labels_removed: Some(vec![HistoryLabelChange {
                message: message_ref(id),
                label_ids: Some(vec!["INBOX".to_string()]),
            }]),
            ..Default::default()
        }
    }

    fn ids(raw: &[&str]) -> Vec<MessageId> {
        raw.iter().map(|id| MessageId::new(*id)).collect()
    }

    #[test]
    fn test_plan_add_then_delete_cancels() {
        let plan = HistoryPlan::from_records(&[added("a"), added("b"), deleted("a")]);
        assert_eq!(plan.added, ids(&["b"]));
        assert_eq!(plan.deleted, ids(&["a"]));
    }

    #[test]
    fn test_plan_deduplicates_events() {
        let plan = HistoryPlan::from_records(&[added("a"), added("a"), deleted("x"), deleted("x")]);
        assert_eq!(plan.added, ids(&["a"]));
        assert_eq!(plan.deleted, ids(&["x"]));
    }

    #[test]
    fn test_plan_label_changes() {
        let plan = HistoryPlan::from_records(&[
            added("new"),
            relabeled("new"),
            relabeled("old"),
            relabeled("gone"),
            deleted("gone"),
        ]);
        assert_eq!(plan.added, ids(&["new"]));
        assert_eq!(plan.relabeled, ids(&["new", "old"]));
        assert_eq!(plan.deleted, ids(&["gone"]));
    }

    #[test]
    fn test_plan_readd_after_delete() {
        let plan = HistoryPlan::from_records(&[
            relabeled("a"),
            deleted("a"),
            added("a"),
            added("b"),
            deleted("b"),
        ]);
        assert_eq!(plan.added, ids(&["a"]));
        assert_eq!(plan.deleted, ids(&["b"]));
        assert!(plan.relabeled.is_empty());
    }

    #[test]
    fn test_determine_sync_action() {
        let store = InMemoryMailStore::new();
        assert_eq!(determine_sync_action(&store).unwrap(), SyncAction::FullFetch);

        store
            .save_sync_state(SyncState::new("me@example.com", "42"))
            .unwrap();
        assert_eq!(
            determine_sync_action(&store).unwrap(),
            SyncAction::HistoryReplay {
                history_id: "42".to_string()
            }
        );
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(SyncMode::Incremental.to_string(), "incremental");
        assert_eq!(SyncMode::default(), SyncMode::Full);
    }
}
