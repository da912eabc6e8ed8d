//! Sync pass failures

use thiserror::Error;

use crate::remote::RemoteError;

/// Why a sync pass aborted
///
/// Whatever the variant, the stored history position was not advanced.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A local store read or write failed
    #[error("local store failure: {0:#}")]
    Store(anyhow::Error),
    /// A remote call failed permanently or ran out of retries
    #[error("remote failure: {0}")]
    Remote(#[from] RemoteError),
    /// The mailbox history position could not be read
    #[error("could not read mailbox history position: {0}")]
    Cursor(RemoteError),
    #[error("could not start fetch workers: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl SyncError {
    pub(crate) fn store(err: anyhow::Error) -> Self {
        Self::Store(err)
    }
}
