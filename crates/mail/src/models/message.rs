//! Message record mirrored from the remote mailbox

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a message (Gmail message ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the thread a message belongs to (not enforced referentially)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Sender identity parsed from the `From` header at ingest
///
/// The email address is the grouping key for sender aggregates. It is kept
/// exactly as received (trimmed), so "J. Doe <j@x.com>" and "jdoe@x.com"
/// stay distinct senders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Display name (e.g., "John Doe")
    pub display_name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
    /// Domain part of the address (e.g., "example.com"), empty if none
    pub domain: String,
}

impl Sender {
    /// Create a sender with just an email address
    pub fn new(email: impl Into<String>) -> Self {
        let email = email.into();
        let domain = domain_of(&email);
        Self {
            display_name: None,
            email,
            domain,
        }
    }

    /// Create a sender with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
            ..Self::new(email)
        }
    }

    /// Parse a header value like `"John Doe" <john@example.com>`
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            let sender = Self::new(email);
            return if name.is_empty() {
                sender
            } else {
                Self {
                    display_name: Some(name.to_string()),
                    ..sender
                }
            };
        }

        Self::new(s)
    }

    /// Key used to group messages by sender
    pub fn key(&self) -> &str {
        &self.email
    }
}

fn domain_of(email: &str) -> String {
    email
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_string())
        .unwrap_or_default()
}

/// Metadata for one mirrored message
///
/// A record is the product of the last successful metadata fetch for its ID.
/// Storing it again replaces the previous row entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Gmail message ID
    pub id: MessageId,
    /// ID of the thread this message belongs to
    pub thread_id: ThreadId,
    /// Gmail label IDs, sorted and deduplicated
    pub label_ids: Vec<String>,
    /// Parsed sender identity
    pub sender: Sender,
    /// Short text preview
    pub snippet: String,
    /// History position at which this data was observed
    pub history_id: String,
    /// Gmail's internal timestamp (milliseconds since epoch)
    pub internal_date: i64,
    /// Estimated size in bytes
    pub size_estimate: i64,
}

impl Message {
    /// Create a new message builder
    pub fn builder(id: MessageId, thread_id: ThreadId) -> MessageBuilder {
        MessageBuilder::new(id, thread_id)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }

    /// Trashed or spam messages are not part of the mailbox listing
    pub fn is_trash_or_spam(&self) -> bool {
        self.has_label("TRASH") || self.has_label("SPAM")
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    thread_id: ThreadId,
    label_ids: Vec<String>,
    sender: Option<Sender>,
    snippet: String,
    history_id: String,
    internal_date: i64,
    size_estimate: i64,
}

impl MessageBuilder {
    fn new(id: MessageId, thread_id: ThreadId) -> Self {
        Self {
            id,
            thread_id,
            label_ids: Vec::new(),
            sender: None,
            snippet: String::new(),
            history_id: String::new(),
            internal_date: 0,
            size_estimate: 0,
        }
    }

    pub fn sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn label_ids(mut self, label_ids: Vec<String>) -> Self {
        self.label_ids = label_ids;
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn history_id(mut self, history_id: impl Into<String>) -> Self {
        self.history_id = history_id.into();
        self
    }

    pub fn internal_date(mut self, internal_date: i64) -> Self {
        self.internal_date = internal_date;
        self
    }

    pub fn size_estimate(mut self, size_estimate: i64) -> Self {
        self.size_estimate = size_estimate;
        self
    }

    pub fn build(self) -> Message {
        let mut label_ids = self.label_ids;
        label_ids.sort();
        label_ids.dedup();

        Message {
            id: self.id,
            thread_id: self.thread_id,
            label_ids,
            sender: self.sender.unwrap_or_else(|| Sender::new("unknown@unknown")),
            snippet: self.snippet,
            history_id: self.history_id,
            internal_date: self.internal_date,
            size_estimate: self.size_estimate,
        }
    }
}
