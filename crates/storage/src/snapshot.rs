use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::domain::BucketKey;

use crate::StoredEntry;

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub version: u32,
    pub buckets: Vec<BucketSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub bucket: BucketKey,
    pub entries: Vec<StoredEntry>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<HistorySnapshot>>;
    async fn save(&self, snapshot: &HistorySnapshot) -> Result<()>;
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    current: Mutex<Option<HistorySnapshot>>,
    saves: AtomicUsize,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: HistorySnapshot) -> Self {
        Self {
            current: Mutex::new(Some(snapshot)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn current(&self) -> Option<HistorySnapshot> {
        self.current.lock().ok().and_then(|guard| guard.clone())
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<HistorySnapshot>> {
        let guard = self
            .current
            .lock()
            .map_err(|_| anyhow!("memory snapshot lock poisoned"))?;
        Ok(guard.clone())
    }

    async fn save(&self, snapshot: &HistorySnapshot) -> Result<()> {
        let mut guard = self
            .current
            .lock()
            .map_err(|_| anyhow!("memory snapshot lock poisoned"))?;
        *guard = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
