//! Shared fixtures: a simulated Gmail mailbox and a store with injectable failures

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use mail::gmail::api::{
    GmailMessage, Header, HistoryLabelChange, HistoryMessage, HistoryRecord, MessagePayload,
    MessageRef, ProfileResponse,
};
use mail::remote::{BatchResults, HistoryPage, MailRemote, MessagePage, RemoteError};
use mail::{InMemoryMailStore, MailStore, Message, MessageId, SyncOptions, SyncState};

pub const ACCOUNT: &str = "me@example.com";

pub fn test_options() -> SyncOptions {
    SyncOptions::without_delays()
}

pub fn id(raw: &str) -> MessageId {
    MessageId::new(raw)
}

#[derive(Debug, Clone)]
struct FakeMessage {
    from: String,
    size: i64,
    labels: Vec<String>,
    internal_date: i64,
}

#[derive(Default)]
struct Mailbox {
    messages: BTreeMap<String, FakeMessage>,
    history: Vec<HistoryRecord>,
    history_id: u64,
    /// History positions below this are rejected
    oldest_history_id: u64,
}

impl Mailbox {
    fn push_record(&mut self, record: HistoryRecord) {
        self.history_id += 1;
        self.history.push(HistoryRecord {
            id: self.history_id.to_string(),
            ..record
        });
    }

    fn is_listed(message: &FakeMessage) -> bool {
        !message.labels.iter().any(|l| l == "TRASH" || l == "SPAM")
    }
}

fn message_ref(id: &str) -> MessageRef {
    MessageRef {
        id: id.to_string(),
        thread_id: Some(format!("t-{id}")),
    }
}

/// In-process stand-in for the Gmail API
///
/// Mutations append history records the same way Gmail does, message
/// listings skip trash and spam, and failures can be scripted per ID.
pub struct FakeRemote {
    mailbox: Mutex<Mailbox>,
    metadata_failures: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    batch_failures: Mutex<VecDeque<RemoteError>>,
    history_failures: Mutex<VecDeque<RemoteError>>,
    fetched: Mutex<Vec<String>>,
    history_page_size: usize,
    pub list_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    pub trash_calls: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::with_history_page_size(100)
    }

    pub fn with_history_page_size(history_page_size: usize) -> Self {
        Self {
            mailbox: Mutex::new(Mailbox {
                history_id: 1000,
                ..Default::default()
            }),
            metadata_failures: Mutex::new(HashMap::new()),
            batch_failures: Mutex::new(VecDeque::new()),
            history_failures: Mutex::new(VecDeque::new()),
            fetched: Mutex::new(Vec::new()),
            history_page_size,
            list_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            trash_calls: AtomicUsize::new(0),
        }
    }

    /// Mailbox pre-filled with `count` messages `m0000..`, each 100 bytes
    pub fn with_messages(count: usize) -> Self {
        let remote = Self::new();
        for i in 0..count {
            remote.add_message(&format!("m{i:04}"), "bulk@news.example", 100);
        }
        remote
    }

    pub fn add_message(&self, id: &str, from: &str, size: i64) {
        let mut mailbox = self.mailbox.lock().unwrap();
        let internal_date = 1_700_000_000_000 + mailbox.messages.len() as i64;
        mailbox.messages.insert(
            id.to_string(),
            FakeMessage {
                from: from.to_string(),
                size,
                labels: vec!["INBOX".to_string()],
                internal_date,
            },
        );
        mailbox.push_record(HistoryRecord {
            messages_added: Some(vec![HistoryMessage {
                message: message_ref(id),
            }]),
            ..Default::default()
        });
    }

    /// Permanently delete a message, as from the Gmail web UI
    pub fn delete_message(&self, id: &str) {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.messages.remove(id);
        mailbox.push_record(HistoryRecord {
            messages_deleted: Some(vec![HistoryMessage {
                message: message_ref(id),
            }]),
            ..Default::default()
        });
    }

    pub fn add_label(&self, id: &str, label: &str) {
        let mut mailbox = self.mailbox.lock().unwrap();
        let Some(message) = mailbox.messages.get_mut(id) else {
            return;
        };
        message.labels.push(label.to_string());
        mailbox.push_record(HistoryRecord {
            labels_added: Some(vec![HistoryLabelChange {
                message: message_ref(id),
                label_ids: Some(vec![label.to_string()]),
            }]),
            ..Default::default()
        });
    }

    /// Reject every history position older than the current one
    pub fn expire_history(&self) {
        let mut mailbox = self.mailbox.lock().unwrap();
        mailbox.oldest_history_id = mailbox.history_id;
    }

    pub fn fail_metadata(&self, id: &str, errors: impl IntoIterator<Item = RemoteError>) {
        self.metadata_failures
            .lock()
            .unwrap()
            .insert(id.to_string(), errors.into_iter().collect());
    }

    pub fn fail_next_batch(&self, err: RemoteError) {
        self.batch_failures.lock().unwrap().push_back(err);
    }

    pub fn fail_next_history(&self, err: RemoteError) {
        self.history_failures.lock().unwrap().push_back(err);
    }

    pub fn has_message(&self, id: &str) -> bool {
        self.mailbox.lock().unwrap().messages.contains_key(id)
    }

    pub fn is_trashed(&self, id: &str) -> bool {
        self.mailbox
            .lock()
            .unwrap()
            .messages
            .get(id)
            .is_some_and(|m| m.labels.iter().any(|l| l == "TRASH"))
    }

    /// IDs whose metadata was requested, in request order per batch
    pub fn fetched_ids(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn reset_counters(&self) {
        self.fetched.lock().unwrap().clear();
        self.list_calls.store(0, Ordering::SeqCst);
        self.batch_calls.store(0, Ordering::SeqCst);
        self.history_calls.store(0, Ordering::SeqCst);
        self.trash_calls.store(0, Ordering::SeqCst);
    }

    pub fn current_history(&self) -> String {
        self.mailbox.lock().unwrap().history_id.to_string()
    }

    fn metadata(&self, id: &MessageId) -> Result<GmailMessage, RemoteError> {
        self.fetched.lock().unwrap().push(id.to_string());

        if let Some(errors) = self.metadata_failures.lock().unwrap().get_mut(id.as_str())
            && let Some(err) = errors.pop_front()
        {
            return Err(err);
        }

        let mailbox = self.mailbox.lock().unwrap();
        let message = mailbox.messages.get(id.as_str()).ok_or(RemoteError::NotFound)?;
        Ok(GmailMessage {
            id: id.to_string(),
            thread_id: format!("t-{id}"),
            label_ids: Some(message.labels.clone()),
            snippet: Some(format!("Snippet of {id}")),
            history_id: Some(mailbox.history_id.to_string()),
            internal_date: Some(message.internal_date.to_string()),
            size_estimate: Some(message.size),
            payload: Some(MessagePayload {
                headers: Some(vec![Header {
                    name: "From".to_string(),
                    value: message.from.clone(),
                }]),
                mime_type: Some("text/plain".to_string()),
            }),
        })
    }
}

impl MailRemote for FakeRemote {
    fn profile(&self) -> Result<ProfileResponse, RemoteError> {
        let mailbox = self.mailbox.lock().unwrap();
        Ok(ProfileResponse {
            email_address: ACCOUNT.to_string(),
            messages_total: Some(mailbox.messages.len() as u64),
            threads_total: None,
            history_id: mailbox.history_id.to_string(),
        })
    }

    fn list_message_ids(
        &self,
        page_size: usize,
        page_token: Option<&str>,
    ) -> Result<MessagePage, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let offset: usize = page_token.map_or(Ok(0), str::parse::<usize>).map_err(|_| {
            RemoteError::BadRequest("invalid page token".to_string())
        })?;

        let mailbox = self.mailbox.lock().unwrap();
        let listed: Vec<&String> = mailbox
            .messages
            .iter()
            .filter(|(_, m)| Mailbox::is_listed(m))
            .map(|(id, _)| id)
            .collect();

        let end = (offset + page_size).min(listed.len());
        Ok(MessagePage {
            ids: listed[offset.min(end)..end]
                .iter()
                .map(|id| MessageId::new(id.as_str()))
                .collect(),
            next_page_token: (end < listed.len()).then(|| end.to_string()),
        })
    }

    fn get_message_metadata(&self, id: &MessageId) -> Result<GmailMessage, RemoteError> {
        self.metadata(id)
    }

    fn batch_get_message_metadata(&self, ids: &[MessageId]) -> Result<BatchResults, RemoteError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.batch_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(ids.iter().map(|id| (id.clone(), self.metadata(id))).collect())
    }

    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryPage, RemoteError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.history_failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        let start: u64 = start_history_id
            .parse()
            .map_err(|_| RemoteError::BadRequest("Invalid startHistoryId".to_string()))?;
        let offset: usize = page_token.map_or(Ok(0), str::parse::<usize>).map_err(|_| {
            RemoteError::BadRequest("invalid page token".to_string())
        })?;

        let mailbox = self.mailbox.lock().unwrap();
        if start < mailbox.oldest_history_id {
            return Err(RemoteError::HistoryExpired);
        }

        let records: Vec<&HistoryRecord> = mailbox
            .history
            .iter()
            .filter(|r| r.id.parse::<u64>().is_ok_and(|h| h > start))
            .collect();
        let end = (offset + self.history_page_size).min(records.len());

        Ok(HistoryPage {
            records: records[offset.min(end)..end].iter().map(|r| (*r).clone()).collect(),
            next_page_token: (end < records.len()).then(|| end.to_string()),
        })
    }

    fn trash_message(&self, id: &MessageId) -> Result<(), RemoteError> {
        self.trash_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(errors) = self.metadata_failures.lock().unwrap().get_mut(id.as_str())
            && let Some(err) = errors.pop_front()
        {
            return Err(err);
        }
        if !self.has_message(id.as_str()) {
            return Err(RemoteError::NotFound);
        }
        self.add_label(id.as_str(), "TRASH");
        Ok(())
    }
}

/// In-memory store whose writes can be made to fail
#[derive(Default)]
pub struct FailingStore {
    inner: InMemoryMailStore,
    pub fail_upserts: AtomicBool,
    pub fail_cursor_writes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            bail!("simulated {} failure", what);
        }
        Ok(())
    }
}

impl MailStore for FailingStore {
    fn upsert_messages(&self, messages: &[Message]) -> Result<()> {
        Self::check(&self.fail_upserts, "upsert")?;
        self.inner.upsert_messages(messages)
    }

    fn remove_message(&self, id: &MessageId) -> Result<()> {
        self.inner.remove_message(id)
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        self.inner.get_message(id)
    }

    fn has_message(&self, id: &MessageId) -> Result<bool> {
        self.inner.has_message(id)
    }

    fn known_ids(&self) -> Result<HashSet<MessageId>> {
        self.inner.known_ids()
    }

    fn list_messages(&self) -> Result<Vec<Message>> {
        self.inner.list_messages()
    }

    fn count_messages(&self) -> Result<usize> {
        self.inner.count_messages()
    }

    fn get_sync_state(&self) -> Result<Option<SyncState>> {
        self.inner.get_sync_state()
    }

    fn save_sync_state(&self, state: SyncState) -> Result<()> {
        Self::check(&self.fail_cursor_writes, "cursor write")?;
        self.inner.save_sync_state(state)
    }

    fn delete_sync_state(&self) -> Result<()> {
        self.inner.delete_sync_state()
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()
    }
}
