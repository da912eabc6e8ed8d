//! Sync cursor for incremental Gmail sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current schema version of the persisted cursor
pub const SYNC_VERSION: u32 = 1;

/// Position in the remote history log the mirror is synchronized to
///
/// Stored as the single row of the cursor table. Absent until the first
/// full sync completes, and only rewritten after a pass finished without a
/// fatal error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Address of the mailbox this cursor belongs to
    pub account_id: String,
    /// Gmail historyId the mirror reflects
    pub history_id: String,
    /// When the last successful pass completed
    pub last_sync_at: DateTime<Utc>,
    /// Schema version for migrations
    pub sync_version: u32,
}

impl SyncState {
    /// Create a cursor stamped with the current time
    pub fn new(account_id: impl Into<String>, history_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            history_id: history_id.into(),
            last_sync_at: Utc::now(),
            sync_version: SYNC_VERSION,
        }
    }

    /// Advance to a new history position after a successful pass
    pub fn updated(mut self, history_id: impl Into<String>) -> Self {
        self.history_id = history_id.into();
        self.last_sync_at = Utc::now();
        self
    }

    /// Gmail keeps history for roughly a week; older cursors are likely
    /// to be rejected.
    pub fn is_recent(&self) -> bool {
        let age = Utc::now() - self.last_sync_at;
        age.num_days() < 7
    }
}
