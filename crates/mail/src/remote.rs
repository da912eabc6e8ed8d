//! Remote mailbox interface consumed by the sync engine
//!
//! The sync engine only talks to the provider through [`MailRemote`], so it
//! can be driven by the Gmail client in production and by simulated
//! mailboxes in tests.

use thiserror::Error;

use crate::gmail::api::{GmailMessage, HistoryRecord, ProfileResponse};
use crate::models::MessageId;

/// Failure of a remote call, classified by how the caller should react
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// HTTP 429: back off briefly and retry
    #[error("too many requests")]
    TooManyRequests,
    /// HTTP 403 caused by quota or rate limiting: back off longer and retry
    #[error("forbidden by quota: {0}")]
    Forbidden(String),
    #[error("request timed out")]
    Timeout,
    #[error("server error (HTTP {0})")]
    Server(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    /// HTTP 401, or 403 for reasons other than quota
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("undecodable response: {0}")]
    Decode(String),
    /// The history position handed to the provider is too old or invalid
    #[error("history position expired or invalid")]
    HistoryExpired,
}

impl RemoteError {
    /// Whether retrying the same request later can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TooManyRequests
                | Self::Forbidden(_)
                | Self::Timeout
                | Self::Server(_)
                | Self::Transport(_)
        )
    }
}

/// One page of message IDs from the mailbox listing
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub ids: Vec<MessageId>,
    pub next_page_token: Option<String>,
}

/// One page of history records
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    pub next_page_token: Option<String>,
}

/// Per-ID outcome of a batched metadata request, in request order
pub type BatchResults = Vec<(MessageId, Result<GmailMessage, RemoteError>)>;

/// Operations the sync engine needs from the mail provider
///
/// Implementations must be shareable across fetch worker threads.
pub trait MailRemote: Send + Sync {
    /// Profile of the authenticated mailbox (address and current history position)
    fn profile(&self) -> Result<ProfileResponse, RemoteError>;

    /// List message IDs, at most `page_size` per page
    fn list_message_ids(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, RemoteError>;

    /// Fetch metadata for a single message
    fn get_message_metadata(&self, id: &MessageId) -> Result<GmailMessage, RemoteError>;

    /// Fetch metadata for many messages in one request
    ///
    /// An `Err` means the request as a whole failed; otherwise every
    /// requested ID has its own outcome.
    fn batch_get_message_metadata(&self, ids: &[MessageId]) -> Result<BatchResults, RemoteError> {
        Ok(ids
            .iter()
            .map(|id| (id.clone(), self.get_message_metadata(id)))
            .collect())
    }

    /// List history records after `start_history_id`
    ///
    /// Returns [`RemoteError::HistoryExpired`] when the position is rejected.
    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, RemoteError>;

    /// Current history position of the mailbox
    fn current_history_id(&self) -> Result<String, RemoteError> {
        Ok(self.profile()?.history_id)
    }

    /// Move a message to the trash
    fn trash_message(&self, id: &MessageId) -> Result<(), RemoteError>;
}
