//! Gmail API response normalization
//!
//! Converts Gmail metadata payloads to mirror records.

use anyhow::{Context, Result};

use super::api::{GmailMessage, MessagePayload};
use crate::models::{Message, MessageId, Sender, ThreadId};

/// Normalize a Gmail API message to a mirror record
///
/// The sender triple is derived here, once, from the `From` header.
pub fn normalize_message(gmail_msg: GmailMessage) -> Result<Message> {
    if gmail_msg.id.is_empty() {
        anyhow::bail!("Message payload has no id");
    }

    let sender = gmail_msg
        .payload
        .as_ref()
        .and_then(|payload| extract_header(payload, "From"))
        .map(|from| Sender::parse(&from))
        .unwrap_or_else(|| Sender::new("unknown@unknown"));

    let internal_date = match gmail_msg.internal_date.as_deref() {
        Some(raw) => raw
            .parse::<i64>()
            .with_context(|| format!("Invalid internalDate {raw:?} for message {}", gmail_msg.id))?,
        None => 0,
    };

    let snippet = gmail_msg
        .snippet
        .as_deref()
        .map(decode_html_entities)
        .unwrap_or_default();

    Ok(Message::builder(MessageId::new(gmail_msg.id), ThreadId::new(gmail_msg.thread_id))
        .sender(sender)
        .label_ids(gmail_msg.label_ids.unwrap_or_default())
        .snippet(snippet)
        .history_id(gmail_msg.history_id.unwrap_or_default())
        .internal_date(internal_date)
        .size_estimate(gmail_msg.size_estimate.unwrap_or(0))
        .build())
}

/// Extract a header value by name
fn extract_header(payload: &MessagePayload, name: &str) -> Option<String> {
    payload.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
