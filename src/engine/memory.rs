//! In-memory engine.
//!
//! A single-process implementation of [`Engine`] backed by an ordered map.
//! Commits are serialized behind a write lock, which is what makes the
//! check/mutate/enqueue sequence atomic; mutations are staged in an overlay
//! and merged only after every mutation validated, so a failing counter
//! mutation leaves the store untouched.
//!
//! Versionstamps are a monotonic commit counter rendered as 10 bytes
//! (8-byte big-endian counter plus two zero bytes), hex-encoded on the
//! engine boundary.
//!
//! With a backing path the engine loads a JSON snapshot at open and writes
//! it back on [`MemoryEngine::flush`]; a malformed snapshot is fatal at
//! startup.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::{
    CommitResult, Engine, EngineAtomicWrite, EngineCheck, EngineEntry, EngineError,
    EngineMutation, EngineResult, EngineValue, ListOptions, ListSelector, SnapshotCorruptSnafu,
    SnapshotIoSnafu, WatchBatch, WatchEntry, WatchStream,
};
use crate::layer::{Key, KeyPart};

/// Length of a raw versionstamp in bytes.
const VERSIONSTAMP_LEN: usize = 10;

/// One stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredEntry {
    value: EngineValue,
    /// Commit counter of the writing transaction.
    versionstamp: u64,
    /// Absolute expiry in epoch milliseconds; entries at or past it are
    /// treated as absent.
    expires_at_ms: Option<i64>,
}

impl StoredEntry {
    fn is_live(&self, now_ms: i64) -> bool {
        match self.expires_at_ms {
            Some(at) => at > now_ms,
            None => true,
        }
    }
}

/// One queue message accepted by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct QueueRecord {
    payload: Vec<u8>,
    deliver_at_ms: i64,
    keys_if_undelivered: Vec<Vec<u8>>,
    backoff_schedule: Vec<u32>,
}

/// Mutable engine state behind the store lock.
#[derive(Debug, Default)]
struct Store {
    entries: BTreeMap<Vec<u8>, StoredEntry>,
    queue: Vec<QueueRecord>,
    commit_seq: u64,
}

/// On-disk snapshot shape. Entries are serialized as pairs because JSON
/// object keys must be strings.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    commit_seq: u64,
    entries: Vec<(Vec<u8>, StoredEntry)>,
    queue: Vec<QueueRecord>,
}

/// A registered watch subscription.
#[derive(Debug)]
struct Watcher {
    keys: Vec<Vec<u8>>,
    /// Capacity-1 wakeup channel; a full channel means a batch is already
    /// pending, so notifications coalesce instead of queueing.
    tx: mpsc::Sender<()>,
}

#[derive(Debug)]
struct Inner {
    store: RwLock<Store>,
    watchers: Mutex<HashMap<u64, Watcher>>,
    next_watcher_id: AtomicU64,
    snapshot_path: Option<PathBuf>,
}

/// In-memory [`Engine`] implementation.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    inner: Arc<Inner>,
}

impl MemoryEngine {
    /// Open an engine, loading the snapshot at `path` when one is given and
    /// the file exists.
    pub fn open(path: Option<&Path>) -> EngineResult<Self> {
        let store = match path {
            Some(p) if p.exists() => {
                let bytes = std::fs::read(p).context(SnapshotIoSnafu)?;
                let snapshot: Snapshot =
                    serde_json::from_slice(&bytes).context(SnapshotCorruptSnafu)?;
                debug!(
                    path = %p.display(),
                    entries = snapshot.entries.len(),
                    commit_seq = snapshot.commit_seq,
                    "loaded engine snapshot"
                );
                Store {
                    entries: snapshot.entries.into_iter().collect(),
                    queue: snapshot.queue,
                    commit_seq: snapshot.commit_seq,
                }
            }
            _ => Store::default(),
        };
        Ok(Self {
            inner: Arc::new(Inner {
                store: RwLock::new(store),
                watchers: Mutex::new(HashMap::new()),
                next_watcher_id: AtomicU64::new(1),
                snapshot_path: path.map(Path::to_path_buf),
            }),
        })
    }

    /// Write the snapshot file, if the engine was opened with a path.
    pub fn flush(&self) -> EngineResult<()> {
        let Some(path) = &self.inner.snapshot_path else {
            return Ok(());
        };
        let snapshot = {
            let store = read_store(&self.inner.store);
            Snapshot {
                commit_seq: store.commit_seq,
                entries: store.entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                queue: store.queue.clone(),
            }
        };
        let bytes = serde_json::to_vec(&snapshot).context(SnapshotCorruptSnafu)?;
        std::fs::write(path, bytes).context(SnapshotIoSnafu)?;
        debug!(path = %path.display(), entries = snapshot.entries.len(), "wrote engine snapshot");
        Ok(())
    }

    /// Number of queue records accepted so far (test observability).
    #[cfg(test)]
    fn queue_len(&self) -> usize {
        read_store(&self.inner.store).queue.len()
    }
}

/// Read the store, recovering from a poisoned lock: the map has no
/// invariants a panicking reader could have violated.
fn read_store(lock: &RwLock<Store>) -> std::sync::RwLockReadGuard<'_, Store> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_store(lock: &RwLock<Store>) -> std::sync::RwLockWriteGuard<'_, Store> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wall clock in epoch milliseconds.
fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Render a commit counter as the raw 10-byte versionstamp.
fn versionstamp_raw(seq: u64) -> [u8; VERSIONSTAMP_LEN] {
    let mut raw = [0u8; VERSIONSTAMP_LEN];
    raw[..8].copy_from_slice(&seq.to_be_bytes());
    raw
}

/// Render a commit counter as the hex versionstamp used on the engine
/// boundary.
fn versionstamp_hex(seq: u64) -> String {
    format!("{seq:016x}0000")
}

/// Exclusive upper bound of a prefix scan: the prefix with its last
/// non-0xFF byte incremented. `None` means unbounded.
fn prefix_upper(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(&last) = upper.last() {
        if last < 0xFF {
            *upper.last_mut().expect("non-empty") = last + 1;
            return Some(upper);
        }
        upper.pop();
    }
    None
}

/// Staged effect of one transaction, merged only after full validation.
#[derive(Debug, Default)]
struct Overlay {
    entries: HashMap<Vec<u8>, Option<StoredEntry>>,
}

impl Overlay {
    /// Read through the overlay to the base store, honoring expiry.
    fn live<'a>(&'a self, store: &'a Store, key: &[u8], now: i64) -> Option<&'a StoredEntry> {
        if let Some(staged) = self.entries.get(key) {
            return staged.as_ref().filter(|e| e.is_live(now));
        }
        store.entries.get(key).filter(|e| e.is_live(now))
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn list(
        &self,
        selector: ListSelector,
        options: ListOptions,
    ) -> EngineResult<Vec<EngineEntry>> {
        let now = now_ms();
        let store = read_store(&self.inner.store);

        let (lower, upper) = match selector {
            ListSelector::Range { start, end } => (start, Some(end)),
            ListSelector::Prefix { start, prefix } => {
                let lower = if start > prefix { start } else { prefix.clone() };
                (lower, prefix_upper(&prefix))
            }
        };

        // An inverted interval selects nothing; BTreeMap::range would panic.
        if let Some(end) = &upper {
            if *end <= lower {
                return Ok(Vec::new());
            }
        }
        let upper_bound = match upper {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };

        let range = store.entries.range((Bound::Included(lower), upper_bound));
        let limit = options.limit.unwrap_or(usize::MAX);

        let entries = if options.reverse {
            collect_entries(range.rev(), now, limit)
        } else {
            collect_entries(range, now, limit)
        };
        Ok(entries)
    }

    async fn atomic(&self, write: EngineAtomicWrite) -> EngineResult<CommitResult> {
        let now = now_ms();
        let mut notify_keys: Vec<Vec<u8>> = Vec::new();

        let result = {
            let mut store = write_store(&self.inner.store);

            for EngineCheck { key, versionstamp } in &write.checks {
                let current = store
                    .entries
                    .get(key)
                    .filter(|e| e.is_live(now))
                    .map(|e| versionstamp_hex(e.versionstamp));
                if current != *versionstamp {
                    return Ok(CommitResult::CheckFailed);
                }
            }

            let seq = store.commit_seq + 1;
            let mut overlay = Overlay::default();

            for mutation in &write.mutations {
                match mutation {
                    EngineMutation::Set { key, value, expire_in_ms } => {
                        overlay.entries.insert(
                            key.clone(),
                            Some(StoredEntry {
                                value: value.clone(),
                                versionstamp: seq,
                                expires_at_ms: expire_in_ms.map(|d| now + d),
                            }),
                        );
                    }
                    EngineMutation::SetSuffixVersionstampedKey { key, value, expire_in_ms } => {
                        let suffix = Key::new()
                            .push(KeyPart::Bytes(versionstamp_raw(seq).to_vec()))
                            .pack()
                            .map_err(|e| EngineError::Key { message: e.to_string() })?;
                        let mut stamped = key.clone();
                        stamped.extend_from_slice(&suffix);
                        overlay.entries.insert(
                            stamped,
                            Some(StoredEntry {
                                value: value.clone(),
                                versionstamp: seq,
                                expires_at_ms: expire_in_ms.map(|d| now + d),
                            }),
                        );
                    }
                    EngineMutation::Delete { key } => {
                        overlay.entries.insert(key.clone(), None);
                    }
                    EngineMutation::Sum { key, operand }
                    | EngineMutation::Max { key, operand }
                    | EngineMutation::Min { key, operand } => {
                        let current = match overlay.live(&store, key, now) {
                            None => None,
                            Some(StoredEntry { value: EngineValue::Counter(c), .. }) => Some(*c),
                            Some(_) => return Err(EngineError::CounterTypeMismatch),
                        };
                        let updated = match (mutation, current) {
                            (_, None) => *operand,
                            (EngineMutation::Sum { .. }, Some(c)) => c.wrapping_add(*operand),
                            (EngineMutation::Max { .. }, Some(c)) => c.max(*operand),
                            (EngineMutation::Min { .. }, Some(c)) => c.min(*operand),
                            _ => unreachable!("outer match covers counter mutations only"),
                        };
                        overlay.entries.insert(
                            key.clone(),
                            Some(StoredEntry {
                                value: EngineValue::Counter(updated),
                                versionstamp: seq,
                                expires_at_ms: None,
                            }),
                        );
                    }
                }
            }

            for enqueue in &write.enqueues {
                store.queue.push(QueueRecord {
                    payload: enqueue.payload.clone(),
                    deliver_at_ms: now + enqueue.delay_ms.unwrap_or(0).max(0),
                    keys_if_undelivered: enqueue.keys_if_undelivered.clone(),
                    backoff_schedule: enqueue.backoff_schedule.clone(),
                });
            }

            // Every mutation validated; merge the overlay and commit.
            for (key, staged) in overlay.entries {
                notify_keys.push(key.clone());
                match staged {
                    Some(entry) => {
                        store.entries.insert(key, entry);
                    }
                    None => {
                        store.entries.remove(&key);
                    }
                }
            }
            store.commit_seq = seq;
            CommitResult::Committed { versionstamp: versionstamp_hex(seq) }
        };

        self.notify_watchers(&notify_keys);
        Ok(result)
    }

    async fn watch(&self, keys: Vec<Vec<u8>>) -> EngineResult<WatchStream> {
        let (tx, rx) = mpsc::channel(1);
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut watchers =
                self.inner.watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            watchers.insert(id, Watcher { keys: keys.clone(), tx });
        }
        debug!(watcher_id = id, keys = keys.len(), "watch registered");

        let inner = self.inner.clone();
        let initial = current_batch(&inner, &keys);

        struct State {
            inner: Arc<Inner>,
            keys: Vec<Vec<u8>>,
            rx: mpsc::Receiver<()>,
            pending: Option<WatchBatch>,
        }

        let stream = futures::stream::unfold(
            State { inner, keys, rx, pending: Some(initial) },
            |mut state| async move {
                if let Some(batch) = state.pending.take() {
                    return Some((batch, state));
                }
                match state.rx.recv().await {
                    Some(()) => {
                        let batch = current_batch(&state.inner, &state.keys);
                        Some((batch, state))
                    }
                    None => None,
                }
            },
        );
        Ok(stream.boxed())
    }
}

impl MemoryEngine {
    /// Wake every watcher whose key set intersects the commit, dropping
    /// watchers whose stream is gone.
    fn notify_watchers(&self, touched: &[Vec<u8>]) {
        if touched.is_empty() {
            return;
        }
        let mut watchers =
            self.inner.watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        watchers.retain(|id, watcher| {
            if watcher.tx.is_closed() {
                debug!(watcher_id = *id, "watch dropped by subscriber");
                return false;
            }
            if watcher.keys.iter().any(|k| touched.contains(k)) {
                // A full channel already has a wakeup pending; batches are
                // state snapshots, so coalescing is lossless.
                let _ = watcher.tx.try_send(());
            }
            true
        });
    }
}

/// Materialize live entries from an ordered iterator, honoring the limit.
fn collect_entries<'a>(
    iter: impl Iterator<Item = (&'a Vec<u8>, &'a StoredEntry)>,
    now: i64,
    limit: usize,
) -> Vec<EngineEntry> {
    iter.filter(|(_, entry)| entry.is_live(now))
        .take(limit)
        .map(|(key, entry)| EngineEntry {
            key: key.clone(),
            value: entry.value.clone(),
            versionstamp: versionstamp_hex(entry.versionstamp),
        })
        .collect()
}

/// Snapshot the current state of the watched keys, in subscription order.
fn current_batch(inner: &Inner, keys: &[Vec<u8>]) -> WatchBatch {
    let now = now_ms();
    let store = read_store(&inner.store);
    keys.iter()
        .map(|key| WatchEntry {
            key: key.clone(),
            entry: store
                .entries
                .get(key)
                .filter(|e| e.is_live(now))
                .map(|e| (e.value.clone(), versionstamp_hex(e.versionstamp))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineEnqueue;

    fn set(key: &[u8], value: EngineValue) -> EngineAtomicWrite {
        EngineAtomicWrite {
            mutations: vec![EngineMutation::Set {
                key: key.to_vec(),
                value,
                expire_in_ms: None,
            }],
            ..Default::default()
        }
    }

    async fn list_all(engine: &MemoryEngine) -> Vec<EngineEntry> {
        engine
            .list(
                ListSelector::Range { start: vec![0x00], end: vec![0xFF; 8] },
                ListOptions::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_then_list() {
        let engine = MemoryEngine::open(None).unwrap();
        let result = engine.atomic(set(b"a", EngineValue::Bytes(b"hi".to_vec()))).await.unwrap();
        let versionstamp = match result {
            CommitResult::Committed { versionstamp } => versionstamp,
            other => panic!("expected commit, got {other:?}"),
        };
        assert_eq!(versionstamp.len(), 20);
        assert_eq!(versionstamp, versionstamp_hex(1));

        let entries = list_all(&engine).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, b"a");
        assert_eq!(entries[0].value, EngineValue::Bytes(b"hi".to_vec()));
        assert_eq!(entries[0].versionstamp, versionstamp);
    }

    #[tokio::test]
    async fn test_versionstamps_are_monotonic() {
        let engine = MemoryEngine::open(None).unwrap();
        let mut last = String::new();
        for i in 0..5u8 {
            let result = engine
                .atomic(set(&[i], EngineValue::Bytes(vec![i])))
                .await
                .unwrap();
            let CommitResult::Committed { versionstamp } = result else {
                panic!("expected commit");
            };
            assert!(versionstamp > last, "versionstamp must increase");
            last = versionstamp;
        }
    }

    #[tokio::test]
    async fn test_check_absent_and_present() {
        let engine = MemoryEngine::open(None).unwrap();

        // Expect-absent check on an empty store passes.
        let write = EngineAtomicWrite {
            checks: vec![EngineCheck { key: b"k".to_vec(), versionstamp: None }],
            mutations: vec![EngineMutation::Set {
                key: b"k".to_vec(),
                value: EngineValue::Bytes(b"1".to_vec()),
                expire_in_ms: None,
            }],
            ..Default::default()
        };
        let CommitResult::Committed { versionstamp } = engine.atomic(write).await.unwrap() else {
            panic!("expected commit");
        };

        // Expect-absent now fails.
        let write = EngineAtomicWrite {
            checks: vec![EngineCheck { key: b"k".to_vec(), versionstamp: None }],
            ..Default::default()
        };
        assert_eq!(engine.atomic(write).await.unwrap(), CommitResult::CheckFailed);

        // Matching versionstamp passes.
        let write = EngineAtomicWrite {
            checks: vec![EngineCheck { key: b"k".to_vec(), versionstamp: Some(versionstamp) }],
            ..Default::default()
        };
        assert!(matches!(engine.atomic(write).await.unwrap(), CommitResult::Committed { .. }));
    }

    #[tokio::test]
    async fn test_failed_check_applies_nothing() {
        let engine = MemoryEngine::open(None).unwrap();
        engine.atomic(set(b"k", EngineValue::Bytes(b"1".to_vec()))).await.unwrap();

        let write = EngineAtomicWrite {
            checks: vec![EngineCheck { key: b"k".to_vec(), versionstamp: None }],
            mutations: vec![EngineMutation::Set {
                key: b"other".to_vec(),
                value: EngineValue::Bytes(b"2".to_vec()),
                expire_in_ms: None,
            }],
            ..Default::default()
        };
        assert_eq!(engine.atomic(write).await.unwrap(), CommitResult::CheckFailed);
        assert_eq!(list_all(&engine).await.len(), 1);
    }

    #[tokio::test]
    async fn test_counter_mutations() {
        let engine = MemoryEngine::open(None).unwrap();

        let sum = |operand| EngineAtomicWrite {
            mutations: vec![EngineMutation::Sum { key: b"c".to_vec(), operand }],
            ..Default::default()
        };

        engine.atomic(sum(5)).await.unwrap();
        assert_eq!(list_all(&engine).await[0].value, EngineValue::Counter(5));
        engine.atomic(sum(5)).await.unwrap();
        assert_eq!(list_all(&engine).await[0].value, EngineValue::Counter(10));

        // Sum wraps.
        engine.atomic(sum(u64::MAX)).await.unwrap();
        assert_eq!(list_all(&engine).await[0].value, EngineValue::Counter(9));

        let max = EngineAtomicWrite {
            mutations: vec![EngineMutation::Max { key: b"c".to_vec(), operand: 100 }],
            ..Default::default()
        };
        engine.atomic(max).await.unwrap();
        assert_eq!(list_all(&engine).await[0].value, EngineValue::Counter(100));

        let min = EngineAtomicWrite {
            mutations: vec![EngineMutation::Min { key: b"c".to_vec(), operand: 7 }],
            ..Default::default()
        };
        engine.atomic(min).await.unwrap();
        assert_eq!(list_all(&engine).await[0].value, EngineValue::Counter(7));
    }

    #[tokio::test]
    async fn test_counter_mutation_on_bytes_fails_atomically() {
        let engine = MemoryEngine::open(None).unwrap();
        engine.atomic(set(b"c", EngineValue::Bytes(b"x".to_vec()))).await.unwrap();

        let write = EngineAtomicWrite {
            mutations: vec![
                EngineMutation::Set {
                    key: b"a".to_vec(),
                    value: EngineValue::Bytes(b"1".to_vec()),
                    expire_in_ms: None,
                },
                EngineMutation::Sum { key: b"c".to_vec(), operand: 1 },
            ],
            ..Default::default()
        };
        assert!(matches!(
            engine.atomic(write).await,
            Err(EngineError::CounterTypeMismatch)
        ));
        // The earlier Set in the same transaction must not have landed.
        let entries = list_all(&engine).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, b"c");
    }

    #[tokio::test]
    async fn test_sum_sees_earlier_mutation_in_same_transaction() {
        let engine = MemoryEngine::open(None).unwrap();
        let write = EngineAtomicWrite {
            mutations: vec![
                EngineMutation::Set {
                    key: b"c".to_vec(),
                    value: EngineValue::Counter(2),
                    expire_in_ms: None,
                },
                EngineMutation::Sum { key: b"c".to_vec(), operand: 3 },
            ],
            ..Default::default()
        };
        engine.atomic(write).await.unwrap();
        assert_eq!(list_all(&engine).await[0].value, EngineValue::Counter(5));
    }

    #[tokio::test]
    async fn test_negative_expiry_is_immediately_absent() {
        let engine = MemoryEngine::open(None).unwrap();
        let write = EngineAtomicWrite {
            mutations: vec![EngineMutation::Set {
                key: b"gone".to_vec(),
                value: EngineValue::Bytes(b"x".to_vec()),
                expire_in_ms: Some(-1000),
            }],
            ..Default::default()
        };
        engine.atomic(write).await.unwrap();
        assert!(list_all(&engine).await.is_empty());
    }

    #[tokio::test]
    async fn test_versionstamped_key_suffix() {
        let engine = MemoryEngine::open(None).unwrap();
        let prefix = Key::new().push("q").pack().unwrap();
        let write = EngineAtomicWrite {
            mutations: vec![EngineMutation::SetSuffixVersionstampedKey {
                key: prefix.clone(),
                value: EngineValue::Bytes(b"v".to_vec()),
                expire_in_ms: None,
            }],
            ..Default::default()
        };
        engine.atomic(write).await.unwrap();

        let entries = list_all(&engine).await;
        assert_eq!(entries.len(), 1);
        let key = Key::unpack(&entries[0].key).unwrap();
        assert_eq!(key.len(), 2);
        match key.get(1) {
            Some(KeyPart::Bytes(suffix)) => {
                assert_eq!(suffix, &versionstamp_raw(1).to_vec());
            }
            other => panic!("expected versionstamp suffix, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_limit_and_reverse() {
        let engine = MemoryEngine::open(None).unwrap();
        for i in 1..=5u8 {
            engine.atomic(set(&[i], EngineValue::Bytes(vec![i]))).await.unwrap();
        }

        let selector = ListSelector::Range { start: vec![0x00], end: vec![0xFF] };
        let forward = engine
            .list(selector.clone(), ListOptions { limit: Some(2), reverse: false })
            .await
            .unwrap();
        assert_eq!(forward.iter().map(|e| e.key.clone()).collect::<Vec<_>>(), vec![vec![1], vec![2]]);

        let reverse = engine
            .list(selector, ListOptions { limit: Some(2), reverse: true })
            .await
            .unwrap();
        assert_eq!(reverse.iter().map(|e| e.key.clone()).collect::<Vec<_>>(), vec![vec![5], vec![4]]);
    }

    #[tokio::test]
    async fn test_prefix_selector() {
        let engine = MemoryEngine::open(None).unwrap();
        let a1 = Key::new().push("a").push(1i64).pack().unwrap();
        let a2 = Key::new().push("a").push(2i64).pack().unwrap();
        let b1 = Key::new().push("b").push(1i64).pack().unwrap();
        for key in [&a1, &a2, &b1] {
            engine.atomic(set(key, EngineValue::Bytes(b"v".to_vec()))).await.unwrap();
        }

        let prefix = Key::new().push("a").pack().unwrap();
        let entries = engine
            .list(
                ListSelector::Prefix { start: prefix.clone(), prefix },
                ListOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(entries.iter().map(|e| e.key.clone()).collect::<Vec<_>>(), vec![a1, a2]);
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty() {
        let engine = MemoryEngine::open(None).unwrap();
        engine.atomic(set(b"a", EngineValue::Bytes(b"v".to_vec()))).await.unwrap();
        let entries = engine
            .list(
                ListSelector::Range { start: vec![0xFF], end: vec![0x00] },
                ListOptions::default(),
            )
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_records() {
        let engine = MemoryEngine::open(None).unwrap();
        let write = EngineAtomicWrite {
            enqueues: vec![EngineEnqueue {
                payload: b"msg".to_vec(),
                delay_ms: Some(500),
                keys_if_undelivered: vec![b"dead".to_vec()],
                backoff_schedule: vec![100, 200],
            }],
            ..Default::default()
        };
        assert!(matches!(engine.atomic(write).await.unwrap(), CommitResult::Committed { .. }));
        assert_eq!(engine.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_watch_initial_and_update_batches() {
        let engine = MemoryEngine::open(None).unwrap();
        let key = Key::new().push("w").pack().unwrap();
        let mut stream = engine.watch(vec![key.clone()]).await.unwrap();

        // Initial batch: no current entry.
        let batch = stream.next().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key, key);
        assert!(batch[0].entry.is_none());

        engine.atomic(set(&key, EngineValue::Bytes(b"x".to_vec()))).await.unwrap();

        let batch = stream.next().await.unwrap();
        let (value, versionstamp) = batch[0].entry.clone().unwrap();
        assert_eq!(value, EngineValue::Bytes(b"x".to_vec()));
        assert_eq!(versionstamp, versionstamp_hex(1));
    }

    #[tokio::test]
    async fn test_watch_ignores_unrelated_keys() {
        let engine = MemoryEngine::open(None).unwrap();
        let watched = Key::new().push("w").pack().unwrap();
        let other = Key::new().push("o").pack().unwrap();
        let mut stream = engine.watch(vec![watched.clone()]).await.unwrap();
        let _ = stream.next().await.unwrap();

        engine.atomic(set(&other, EngineValue::Bytes(b"x".to_vec()))).await.unwrap();
        engine.atomic(set(&watched, EngineValue::Bytes(b"y".to_vec()))).await.unwrap();

        // The next batch reflects the watched key's write only.
        let batch = stream.next().await.unwrap();
        let (value, _) = batch[0].entry.clone().unwrap();
        assert_eq!(value, EngineValue::Bytes(b"y".to_vec()));
    }

    #[tokio::test]
    async fn test_dropped_watcher_is_pruned() {
        let engine = MemoryEngine::open(None).unwrap();
        let key = Key::new().push("w").pack().unwrap();
        let stream = engine.watch(vec![key.clone()]).await.unwrap();
        drop(stream);

        engine.atomic(set(&key, EngineValue::Bytes(b"x".to_vec()))).await.unwrap();
        let watchers =
            engine.inner.watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        assert!(watchers.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = std::env::temp_dir().join(format!("alder-engine-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("snapshot.json");
        let _ = std::fs::remove_file(&path);

        {
            let engine = MemoryEngine::open(Some(&path)).unwrap();
            engine.atomic(set(b"k", EngineValue::Counter(7))).await.unwrap();
            engine.flush().unwrap();
        }

        let reopened = MemoryEngine::open(Some(&path)).unwrap();
        let entries = list_all(&reopened).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, EngineValue::Counter(7));
        // The commit counter continues past the snapshot.
        let CommitResult::Committed { versionstamp } =
            reopened.atomic(set(b"k2", EngineValue::Counter(1))).await.unwrap()
        else {
            panic!("expected commit");
        };
        assert_eq!(versionstamp, versionstamp_hex(2));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_fatal() {
        let dir = std::env::temp_dir().join(format!("alder-engine-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("snapshot.json");
        std::fs::write(&path, b"not json").unwrap();

        assert!(matches!(
            MemoryEngine::open(Some(&path)),
            Err(EngineError::SnapshotCorrupt { .. })
        ));
        let _ = std::fs::remove_file(&path);
    }
}
