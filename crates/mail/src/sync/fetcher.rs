//! Batched metadata fetch with bounded per-message retry

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use log::{debug, warn};
use rayon::prelude::*;

use super::{SyncError, SyncOptions};
use crate::gmail::normalize_message;
use crate::models::{Message, MessageId};
use crate::remote::{BatchResults, MailRemote, RemoteError};
use crate::storage::MailStore;

/// Outcome of one `fetch_and_store` / `refetch_and_store` call
#[derive(Debug, Default, Clone)]
pub struct FetchReport {
    /// IDs handed in
    pub requested: usize,
    /// Records written to the store
    pub stored: usize,
    /// IDs already known (or repeated in the input)
    pub skipped: usize,
    /// Previously stored records dropped because they moved to trash or spam
    pub removed: usize,
    /// IDs given up on, with the last error seen for each
    pub abandoned: Vec<(MessageId, RemoteError)>,
    /// Fetch rounds, the first one included
    pub rounds: usize,
}

/// Fetches message metadata in batches and writes it to the store
///
/// Owns the set of IDs known to be stored for the duration of one pass.
/// Workers only see their own slice of IDs; the set is updated on the
/// calling thread after each store write.
pub struct BatchFetcher<'a> {
    remote: &'a dyn MailRemote,
    store: &'a dyn MailStore,
    options: SyncOptions,
    known: HashSet<MessageId>,
    pool: rayon::ThreadPool,
}

impl<'a> BatchFetcher<'a> {
    /// Create a fetcher seeded with every ID currently in the store
    pub fn new(
        remote: &'a dyn MailRemote,
        store: &'a dyn MailStore,
        options: SyncOptions,
    ) -> Result<Self, SyncError> {
        let known = store.known_ids().map_err(SyncError::store)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .thread_name(|i| format!("prune-fetch-{i}"))
            .build()?;

        debug!("Fetcher starting with {} known messages", known.len());

        Ok(Self {
            remote,
            store,
            options,
            known,
            pool,
        })
    }

    /// Fetch and store every ID not yet stored
    pub fn fetch_and_store(&mut self, ids: &[MessageId]) -> Result<FetchReport, SyncError> {
        let mut report = FetchReport {
            requested: ids.len(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let pending: Vec<MessageId> = ids
            .iter()
            .filter(|id| !self.known.contains(*id) && seen.insert(*id))
            .cloned()
            .collect();
        report.skipped = ids.len() - pending.len();

        self.run(pending, &mut report)?;
        Ok(report)
    }

    /// Fetch and overwrite records regardless of whether they are stored
    pub fn refetch_and_store(&mut self, ids: &[MessageId]) -> Result<FetchReport, SyncError> {
        let mut report = FetchReport {
            requested: ids.len(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        let pending: Vec<MessageId> = ids.iter().filter(|id| seen.insert(*id)).cloned().collect();
        report.skipped = ids.len() - pending.len();

        self.run(pending, &mut report)?;
        Ok(report)
    }

    /// Drop an ID from the known set after it was removed from the store
    pub fn forget(&mut self, id: &MessageId) {
        self.known.remove(id);
    }

    pub fn is_known(&self, id: &MessageId) -> bool {
        self.known.contains(id)
    }

    pub fn known_ids(&self) -> impl Iterator<Item = &MessageId> {
        self.known.iter()
    }

    fn run(&mut self, mut pending: Vec<MessageId>, report: &mut FetchReport) -> Result<(), SyncError> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempts: HashMap<MessageId, u32> = HashMap::new();

        while !pending.is_empty() {
            report.rounds += 1;
            debug!(
                "Fetch round {}: {} messages in batches of {}",
                report.rounds,
                pending.len(),
                self.options.effective_batch_size()
            );

            let outcomes = self.fetch_round(&pending);

            let mut records: Vec<Message> = Vec::new();
            let mut excluded: Vec<MessageId> = Vec::new();
            let mut retry: Vec<MessageId> = Vec::new();
            let mut delay = Duration::ZERO;

            for (id, outcome) in outcomes? {
                let outcome = outcome.and_then(|gmail_msg| {
                    normalize_message(gmail_msg).map_err(|e| RemoteError::Decode(format!("{e:#}")))
                });

                match outcome {
                    Ok(message) if message.is_trash_or_spam() => excluded.push(message.id),
                    Ok(message) => records.push(message),
                    Err(err) if err.is_transient() => {
                        let count = attempts.entry(id.clone()).or_insert(0);
                        *count += 1;
                        if *count >= max_attempts {
                            warn!("Giving up on message {} after {} attempts: {}", id, count, err);
                            report.abandoned.push((id, err));
                        } else {
                            delay = delay.max(self.options.delay_for(&err));
                            retry.push(id);
                        }
                    }
                    Err(err) => {
                        warn!("Skipping message {}: {}", id, err);
                        report.abandoned.push((id, err));
                    }
                }
            }

            if !records.is_empty() {
                self.store
                    .upsert_messages(&records)
                    .map_err(SyncError::store)?;
                report.stored += records.len();
                self.known.extend(records.into_iter().map(|m| m.id));
            }

            for id in excluded {
                if self.known.remove(&id) {
                    self.store.remove_message(&id).map_err(SyncError::store)?;
                    report.removed += 1;
                }
            }

            if !retry.is_empty() {
                warn!(
                    "Retrying {} messages in {:?} (round {})",
                    retry.len(),
                    delay,
                    report.rounds
                );
                std::thread::sleep(delay);
            }
            pending = retry;
        }

        Ok(())
    }

    /// Issue one batch call per chunk on the worker pool
    ///
    /// A transient failure of a whole batch call is spread over its IDs so
    /// each of them is retried; a permanent one aborts the pass.
    fn fetch_round(&self, pending: &[MessageId]) -> Result<BatchResults, SyncError> {
        let remote = self.remote;
        let chunks: Vec<&[MessageId]> = pending
            .chunks(self.options.effective_batch_size())
            .collect();

        let calls: Vec<(&[MessageId], Result<BatchResults, RemoteError>)> = self.pool.install(|| {
            chunks
                .par_iter()
                .map(|chunk| (*chunk, remote.batch_get_message_metadata(chunk)))
                .collect()
        });

        let mut results = BatchResults::with_capacity(pending.len());
        for (chunk, call) in calls {
            match call {
                Ok(batch) => results.extend(batch),
                Err(err) if err.is_transient() => {
                    results.extend(chunk.iter().map(|id| (id.clone(), Err(err.clone()))));
                }
                Err(err) => return Err(SyncError::Remote(err)),
            }
        }
        Ok(results)
    }
}
