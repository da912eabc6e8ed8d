//! Mail crate - local mirror of Gmail message metadata
//!
//! This crate provides:
//! - Domain models (Message, Sender, SyncState)
//! - Gmail API client, batch requests and OAuth authentication
//! - Storage trait with SQLite and in-memory backends
//! - Idempotent sync engine (full fetch and history replay)
//! - Sender aggregation queries
//! - Deletion (trash remotely, then remove locally)
//!
//! It has no UI dependencies; front ends drive it through [`MailboxSession`].

pub mod actions;
pub mod config;
pub mod gmail;
pub mod models;
pub mod query;
pub mod remote;
pub mod session;
pub mod storage;
pub mod sync;

pub use actions::{ActionHandler, DeleteReport};
pub use self::config::{GmailCredentials, SyncSettings};
pub use gmail::{AccessTokenProvider, GmailAuth, GmailClient, api::ProfileResponse};
pub use models::{Message, MessageBuilder, MessageId, Sender, SyncState, ThreadId};
pub use query::{SenderAggregate, aggregate_by_sender, messages_from_sender, senders_by_size};
pub use remote::{MailRemote, RemoteError};
pub use session::{MailboxSession, database_path};
pub use storage::{InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{
    BatchFetcher, FetchReport, SyncAction, SyncError, SyncMode, SyncOptions, SyncStats,
    determine_sync_action, sync_mailbox,
};
