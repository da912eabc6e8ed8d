//! Sync engine for mirroring mailbox metadata
//!
//! Every pass is idempotent and can be safely retried: records are
//! upserted, removals tolerate absent rows, and the cursor only advances
//! after a pass completes.

mod engine;
mod error;
mod fetcher;
mod options;
mod retry;

pub use engine::{SyncAction, SyncMode, SyncStats, determine_sync_action, sync_mailbox};
pub use error::SyncError;
pub use fetcher::{BatchFetcher, FetchReport};
pub use options::SyncOptions;

pub(crate) use retry::with_retry;
