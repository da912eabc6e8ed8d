//! Sync tuning knobs

use std::time::Duration;

use crate::remote::RemoteError;

/// Options for a sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Message IDs requested per listing page
    pub page_size: usize,
    /// Metadata requests per batch call
    pub batch_size: usize,
    /// Concurrent batch calls
    pub workers: usize,
    /// Attempts per message ID (and per listing call) before giving up
    pub max_attempts: u32,
    /// Wait after timeouts, server and transport errors
    pub retry_delay: Duration,
    /// Wait after HTTP 429
    pub rate_limit_delay: Duration,
    /// Wait after a quota-related HTTP 403
    pub quota_delay: Duration,
}

impl SyncOptions {
    /// Largest page Gmail returns from `messages.list`
    pub const MAX_PAGE_SIZE: usize = 500;

    /// Gmail rejects batches above 100 calls; 25 keeps per-user rate limits happy
    pub const MAX_BATCH_SIZE: usize = 100;

    /// Options with every delay set to zero, for tests and simulations
    pub fn without_delays() -> Self {
        Self {
            retry_delay: Duration::ZERO,
            rate_limit_delay: Duration::ZERO,
            quota_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// How long to wait before retrying after `err`
    pub fn delay_for(&self, err: &RemoteError) -> Duration {
        match err {
            RemoteError::TooManyRequests => self.rate_limit_delay,
            RemoteError::Forbidden(_) => self.quota_delay,
            _ => self.retry_delay,
        }
    }

    pub(crate) fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, Self::MAX_BATCH_SIZE)
    }

    pub(crate) fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, Self::MAX_PAGE_SIZE)
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: Self::MAX_PAGE_SIZE,
            batch_size: 25,
            workers: 4,
            max_attempts: 5,
            retry_delay: Duration::from_secs(1),
            rate_limit_delay: Duration::from_secs(2),
            quota_delay: Duration::from_secs(30),
        }
    }
}
