//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 authentication flow
//! - Gmail API client implementing [`crate::remote::MailRemote`]
//! - Batch request encoding and response parsing
//! - Response normalization to domain models

mod auth;
mod batch;
mod client;
mod normalize;

pub use auth::{AccessTokenProvider, GmailAuth};
pub use client::GmailClient;
pub use normalize::normalize_message;

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from `users.getProfile`
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ProfileResponse {
        pub email_address: String,
        pub messages_total: Option<u64>,
        pub threads_total: Option<u64>,
        pub history_id: String,
    }

    /// Response from listing messages
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Message in `format=metadata`
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct GmailMessage {
        pub id: String,
        pub thread_id: String,
        pub label_ids: Option<Vec<String>>,
        pub snippet: Option<String>,
        pub history_id: Option<String>,
        /// Milliseconds since epoch, encoded as a string
        pub internal_date: Option<String>,
        pub size_estimate: Option<i64>,
        pub payload: Option<MessagePayload>,
    }

    /// Message payload; only headers are requested
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub mime_type: Option<String>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Response from `users.history.list`
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// A single change record in the history log
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<HistoryMessage>>,
        pub messages_deleted: Option<Vec<HistoryMessage>>,
        pub labels_added: Option<Vec<HistoryLabelChange>>,
        pub labels_removed: Option<Vec<HistoryLabelChange>>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct HistoryMessage {
        pub message: MessageRef,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryLabelChange {
        pub message: MessageRef,
        pub label_ids: Option<Vec<String>>,
    }

    /// Google API error envelope
    #[derive(Debug, Clone, Deserialize)]
    pub struct ErrorResponse {
        pub error: ErrorBody,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ErrorBody {
        pub code: Option<u16>,
        #[serde(default)]
        pub message: String,
        pub errors: Option<Vec<ErrorDetail>>,
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct ErrorDetail {
        pub reason: Option<String>,
    }
}
