use std::{
    collections::{BTreeMap, HashSet, VecDeque},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use shared::{
    domain::{BucketKey, Message},
    identity::MessageIdentity,
};
use tracing::{debug, info, warn};

mod snapshot;
mod sqlite;

pub use snapshot::{
    BucketSnapshot, HistorySnapshot, MemorySnapshotStore, SnapshotStore, SNAPSHOT_VERSION,
};
pub use sqlite::{prepare_database_url, SqliteSnapshotStore};

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// A message as seen from the local user's side. `is_from_me` is fixed at
/// insertion time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEntry {
    #[serde(flatten)]
    pub message: Message,
    pub is_from_me: bool,
}

impl StoredEntry {
    pub fn new(message: Message, is_from_me: bool) -> Self {
        Self {
            message,
            is_from_me,
        }
    }

    pub fn identity(&self) -> MessageIdentity {
        self.message.identity()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted { evicted: Option<MessageIdentity> },
    Duplicate,
}

impl AppendOutcome {
    pub fn inserted(&self) -> bool {
        matches!(self, AppendOutcome::Inserted { .. })
    }
}

#[derive(Debug, Default, Clone)]
struct Bucket {
    entries: VecDeque<StoredEntry>,
    index: HashSet<MessageIdentity>,
}

impl Bucket {
    fn push(&mut self, entry: StoredEntry, capacity: usize) -> AppendOutcome {
        if !self.index.insert(entry.identity()) {
            return AppendOutcome::Duplicate;
        }
        self.entries.push_back(entry);

        let mut evicted = None;
        while self.entries.len() > capacity {
            if let Some(oldest) = self.entries.pop_front() {
                let id = oldest.identity();
                self.index.remove(&id);
                evicted = Some(id);
            }
        }
        AppendOutcome::Inserted { evicted }
    }

    fn from_entries(entries: impl IntoIterator<Item = StoredEntry>, capacity: usize) -> Self {
        let mut bucket = Bucket::default();
        for entry in entries {
            bucket.push(entry, capacity);
        }
        bucket
    }
}

pub struct HistoryStore {
    buckets: BTreeMap<BucketKey, Bucket>,
    capacity: usize,
    persistence: Arc<dyn SnapshotStore>,
}

impl HistoryStore {
    pub async fn open(persistence: Arc<dyn SnapshotStore>) -> Self {
        Self::open_with_capacity(persistence, DEFAULT_HISTORY_CAPACITY).await
    }

    /// Loads the persisted snapshot wholesale. A missing or unreadable
    /// snapshot leaves every bucket empty.
    pub async fn open_with_capacity(persistence: Arc<dyn SnapshotStore>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let buckets = match persistence.load().await {
            Ok(Some(snapshot)) => {
                let buckets: BTreeMap<_, _> = snapshot
                    .buckets
                    .into_iter()
                    .filter(|b| !b.entries.is_empty())
                    .map(|b| (b.bucket, Bucket::from_entries(b.entries, capacity)))
                    .collect();
                info!(buckets = buckets.len(), "history: loaded snapshot");
                buckets
            }
            Ok(None) => BTreeMap::new(),
            Err(err) => {
                warn!("history: snapshot unreadable, starting empty: {err:#}");
                BTreeMap::new()
            }
        };

        Self {
            buckets,
            capacity,
            persistence,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, bucket: &BucketKey) -> Vec<StoredEntry> {
        self.buckets
            .get(bucket)
            .map(|b| b.entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, bucket: &BucketKey) -> usize {
        self.buckets.get(bucket).map_or(0, |b| b.entries.len())
    }

    pub fn contains(&self, bucket: &BucketKey, id: &MessageIdentity) -> bool {
        self.buckets
            .get(bucket)
            .is_some_and(|b| b.index.contains(id))
    }

    pub fn buckets(&self) -> Vec<(BucketKey, usize)> {
        self.buckets
            .iter()
            .map(|(key, b)| (key.clone(), b.entries.len()))
            .collect()
    }

    /// Idempotent append. The oldest entry is evicted once the bucket is
    /// over capacity.
    pub async fn append(
        &mut self,
        bucket: &BucketKey,
        message: Message,
        is_from_me: bool,
    ) -> AppendOutcome {
        let capacity = self.capacity;
        let outcome = self
            .buckets
            .entry(bucket.clone())
            .or_default()
            .push(StoredEntry::new(message, is_from_me), capacity);

        match &outcome {
            AppendOutcome::Duplicate => {
                debug!(bucket = %bucket, "history: duplicate append ignored");
            }
            AppendOutcome::Inserted { evicted } => {
                if evicted.is_some() {
                    debug!(bucket = %bucket, capacity, "history: evicted oldest entry");
                }
                self.persist().await;
            }
        }
        outcome
    }

    pub async fn replace(&mut self, bucket: &BucketKey, entries: Vec<StoredEntry>) {
        let replacement = Bucket::from_entries(entries, self.capacity);
        if replacement.entries.is_empty() {
            self.buckets.remove(bucket);
        } else {
            self.buckets.insert(bucket.clone(), replacement);
        }
        self.persist().await;
    }

    pub async fn clear(&mut self, bucket: &BucketKey) -> bool {
        let existed = self.buckets.remove(bucket).is_some();
        if existed {
            info!(bucket = %bucket, "history: cleared bucket");
            self.persist().await;
        }
        existed
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            version: SNAPSHOT_VERSION,
            buckets: self
                .buckets
                .iter()
                .map(|(key, b)| BucketSnapshot {
                    bucket: key.clone(),
                    entries: b.entries.iter().cloned().collect(),
                })
                .collect(),
        }
    }

    async fn persist(&self) {
        if let Err(err) = self.persistence.save(&self.snapshot()).await {
            warn!("history: failed to persist snapshot: {err:#}");
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
