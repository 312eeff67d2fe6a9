use super::*;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

fn from_bob(content: &str, offset_secs: i64) -> Message {
    Message::text("bob", &BucketKey::peer("alice"), content, at(offset_secs))
}

async fn open_memory() -> (HistoryStore, Arc<MemorySnapshotStore>) {
    let persistence = Arc::new(MemorySnapshotStore::new());
    let store = HistoryStore::open(persistence.clone()).await;
    (store, persistence)
}

struct BrokenSnapshotStore;

#[async_trait]
impl SnapshotStore for BrokenSnapshotStore {
    async fn load(&self) -> anyhow::Result<Option<HistorySnapshot>> {
        Err(anyhow!("disk unavailable"))
    }

    async fn save(&self, _snapshot: &HistorySnapshot) -> anyhow::Result<()> {
        Err(anyhow!("disk unavailable"))
    }
}

#[tokio::test]
async fn append_is_idempotent_per_identity() {
    let (mut store, _) = open_memory().await;
    let bucket = BucketKey::peer("bob");

    let first = store.append(&bucket, from_bob("hi", 0), false).await;
    assert!(first.inserted());

    let mut echo = from_bob("hi", 0);
    echo.receiver = None;
    let second = store.append(&bucket, echo, false).await;

    assert_eq!(second, AppendOutcome::Duplicate);
    assert_eq!(store.len(&bucket), 1);
}

#[tokio::test]
async fn same_message_may_live_in_different_buckets() {
    let (mut store, _) = open_memory().await;
    store
        .append(&BucketKey::peer("bob"), from_bob("hi", 0), false)
        .await;
    let outcome = store
        .append(&BucketKey::Broadcast, from_bob("hi", 0), false)
        .await;
    assert!(outcome.inserted());
}

#[tokio::test]
async fn evicts_oldest_past_capacity() {
    let (mut store, _) = open_memory().await;
    let bucket = BucketKey::peer("bob");

    for i in 0..DEFAULT_HISTORY_CAPACITY as i64 {
        store
            .append(&bucket, from_bob(&format!("m{i}"), i), false)
            .await;
    }
    assert_eq!(store.len(&bucket), DEFAULT_HISTORY_CAPACITY);

    let outcome = store.append(&bucket, from_bob("overflow", 1_000), false).await;
    assert_eq!(
        outcome,
        AppendOutcome::Inserted {
            evicted: Some(from_bob("m0", 0).identity())
        }
    );

    let entries = store.get(&bucket);
    assert_eq!(entries.len(), DEFAULT_HISTORY_CAPACITY);
    assert_eq!(entries[0].message.content, "m1");
    assert_eq!(entries.last().expect("tail").message.content, "overflow");

    // An evicted identity may be appended again.
    assert!(!store.contains(&bucket, &from_bob("m0", 0).identity()));
}

#[tokio::test]
async fn persists_after_every_mutation_but_not_duplicates() {
    let (mut store, persistence) = open_memory().await;
    let bucket = BucketKey::peer("bob");

    store.append(&bucket, from_bob("a", 0), false).await;
    store.append(&bucket, from_bob("a", 0), false).await;
    store.append(&bucket, from_bob("b", 1), true).await;
    assert_eq!(persistence.save_count(), 2);

    store.clear(&bucket).await;
    assert_eq!(persistence.save_count(), 3);
    assert!(!store.clear(&bucket).await);
    assert_eq!(persistence.save_count(), 3);

    let snapshot = persistence.current().expect("snapshot");
    assert!(snapshot.buckets.is_empty());
}

#[tokio::test]
async fn reopen_restores_buckets_and_flags() {
    let (mut store, persistence) = open_memory().await;
    store
        .append(&BucketKey::peer("bob"), from_bob("hi", 0), false)
        .await;
    store
        .append(
            &BucketKey::Broadcast,
            Message::text("alice", &BucketKey::Broadcast, "hey all", at(5)),
            true,
        )
        .await;

    let reopened = HistoryStore::open(persistence).await;
    assert_eq!(
        reopened.buckets(),
        vec![(BucketKey::Broadcast, 1), (BucketKey::peer("bob"), 1)]
    );
    let broadcast = reopened.get(&BucketKey::Broadcast);
    assert!(broadcast[0].is_from_me);
}

#[tokio::test]
async fn unreadable_snapshot_yields_empty_store() {
    let mut store = HistoryStore::open(Arc::new(BrokenSnapshotStore)).await;
    assert!(store.buckets().is_empty());

    // Save failures are swallowed; the in-memory bucket still updates.
    let outcome = store
        .append(&BucketKey::peer("bob"), from_bob("hi", 0), false)
        .await;
    assert!(outcome.inserted());
    assert_eq!(store.len(&BucketKey::peer("bob")), 1);
}

#[tokio::test]
async fn loading_normalizes_oversized_and_duplicated_buckets() {
    let entries: Vec<_> = (0..5)
        .map(|i| StoredEntry::new(from_bob(&format!("m{i}"), i), false))
        .chain(std::iter::once(StoredEntry::new(from_bob("m4", 4), false)))
        .collect();
    let persistence = Arc::new(MemorySnapshotStore::with_snapshot(HistorySnapshot {
        version: SNAPSHOT_VERSION,
        buckets: vec![BucketSnapshot {
            bucket: BucketKey::peer("bob"),
            entries,
        }],
    }));

    let store = HistoryStore::open_with_capacity(persistence, 3).await;
    let contents: Vec<_> = store
        .get(&BucketKey::peer("bob"))
        .into_iter()
        .map(|e| e.message.content)
        .collect();
    assert_eq!(contents, vec!["m2", "m3", "m4"]);
}

#[tokio::test]
async fn replace_keeps_newest_within_capacity_and_drops_empty_buckets() {
    let persistence = Arc::new(MemorySnapshotStore::new());
    let mut store = HistoryStore::open_with_capacity(persistence, 2).await;
    let bucket = BucketKey::peer("bob");

    store
        .replace(
            &bucket,
            vec![
                StoredEntry::new(from_bob("a", 0), false),
                StoredEntry::new(from_bob("b", 1), false),
                StoredEntry::new(from_bob("c", 2), false),
            ],
        )
        .await;
    let contents: Vec<_> = store
        .get(&bucket)
        .into_iter()
        .map(|e| e.message.content)
        .collect();
    assert_eq!(contents, vec!["b", "c"]);

    store.replace(&bucket, Vec::new()).await;
    assert!(store.buckets().is_empty());
}

#[test]
fn stored_entry_uses_flat_camel_case_layout() {
    let entry = StoredEntry::new(from_bob("hi", 0), true);
    let value = serde_json::to_value(&entry).expect("encode");
    assert_eq!(value["isFromMe"], true);
    assert_eq!(value["sender"], "bob");
    assert_eq!(value["type"], "TEXT");

    let decoded: StoredEntry = serde_json::from_value(value).expect("decode");
    assert_eq!(decoded, entry);
}
