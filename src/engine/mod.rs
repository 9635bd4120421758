//! The key-value engine seam.
//!
//! The relay is an adapter: everything below the wire codecs talks to an
//! [`Engine`], which provides the three primitives the datapath needs:
//! ranged listing, atomic commit, and key watching. Versionstamps are
//! lowercase hex strings on this boundary (10 raw bytes on the wire; the
//! relay converts at the edge).
//!
//! [`memory::MemoryEngine`] is the in-process implementation used by the
//! server binary and the test suite.

pub mod memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Errors surfaced by an engine.
#[derive(Debug, Snafu)]
pub enum EngineError {
    /// A mutation was applied to an entry of an incompatible type.
    #[snafu(display("counter mutation applied to a non-counter entry"))]
    CounterTypeMismatch,

    /// Reading or writing the engine's backing file failed.
    #[snafu(display("engine snapshot I/O failed: {source}"))]
    SnapshotIo {
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The engine's backing file could not be parsed.
    #[snafu(display("engine snapshot is malformed: {source}"))]
    SnapshotCorrupt {
        /// The underlying decode error.
        source: serde_json::Error,
    },

    /// Key manipulation inside the engine failed.
    #[snafu(display("engine key error: {message}"))]
    Key {
        /// Description of the key failure.
        message: String,
    },
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// A value as the engine stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineValue {
    /// Raw byte string.
    Bytes(Vec<u8>),
    /// 64-bit unsigned counter, the target of SUM/MAX/MIN mutations.
    Counter(u64),
    /// Structured blob produced by the engine's serializer; the relay never
    /// inspects it, only hands it back.
    Serialized(Vec<u8>),
}

/// One stored entry returned by [`Engine::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEntry {
    /// Tuple-encoded key bytes.
    pub key: Vec<u8>,
    /// The stored value.
    pub value: EngineValue,
    /// Hex-encoded 10-byte versionstamp of the writing commit.
    pub versionstamp: String,
}

/// Bounds of one ranged listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSelector {
    /// Half-open interval `[start, end)` over encoded keys.
    Range {
        /// Inclusive lower bound.
        start: Vec<u8>,
        /// Exclusive upper bound.
        end: Vec<u8>,
    },
    /// All keys with `prefix`, starting at `start`.
    Prefix {
        /// Inclusive lower bound.
        start: Vec<u8>,
        /// Key-prefix bound.
        prefix: Vec<u8>,
    },
}

/// Iteration options of one ranged listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListOptions {
    /// Maximum number of entries; `None` is unbounded.
    pub limit: Option<usize>,
    /// Iterate from the end of the range toward the start.
    pub reverse: bool,
}

/// Optimistic precondition attached to an atomic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCheck {
    /// Tuple-encoded key bytes.
    pub key: Vec<u8>,
    /// Expected versionstamp (hex); `None` expects no entry.
    pub versionstamp: Option<String>,
}

/// One mutation of an atomic write, applied in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMutation {
    /// Store `value` under `key`.
    Set {
        key: Vec<u8>,
        value: EngineValue,
        /// Relative expiry in milliseconds; non-positive values are already
        /// expired. `None` never expires.
        expire_in_ms: Option<i64>,
    },
    /// Store `value` under `key` extended with a final byte-string part
    /// holding the commit versionstamp, which the engine fills at commit.
    SetSuffixVersionstampedKey {
        key: Vec<u8>,
        value: EngineValue,
        expire_in_ms: Option<i64>,
    },
    /// Remove the entry under `key`.
    Delete { key: Vec<u8> },
    /// Wrapping 64-bit add into the counter under `key`.
    Sum { key: Vec<u8>, operand: u64 },
    /// Keep the larger of the existing counter and `operand`.
    Max { key: Vec<u8>, operand: u64 },
    /// Keep the smaller of the existing counter and `operand`.
    Min { key: Vec<u8>, operand: u64 },
}

/// One queue message attached to an atomic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEnqueue {
    /// Structured payload blob.
    pub payload: Vec<u8>,
    /// Delivery delay in milliseconds from commit; `None` delivers
    /// immediately.
    pub delay_ms: Option<i64>,
    /// Keys that receive the payload if delivery ultimately fails.
    pub keys_if_undelivered: Vec<Vec<u8>>,
    /// Retry backoff schedule in milliseconds.
    pub backoff_schedule: Vec<u32>,
}

/// A full atomic transaction: checks, then mutations, then enqueues, all
/// committed together in the order given.
#[derive(Debug, Clone, Default)]
pub struct EngineAtomicWrite {
    /// Preconditions, verified first.
    pub checks: Vec<EngineCheck>,
    /// Mutations, applied in order.
    pub mutations: Vec<EngineMutation>,
    /// Queue messages accepted with the commit.
    pub enqueues: Vec<EngineEnqueue>,
}

/// Outcome of an atomic commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitResult {
    /// Everything applied; carries the hex commit versionstamp.
    Committed {
        /// Hex-encoded 10-byte versionstamp assigned to the commit.
        versionstamp: String,
    },
    /// At least one check was not satisfied; nothing was applied.
    CheckFailed,
}

/// Per-key element of a watch batch, in subscription order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    /// Tuple-encoded key bytes.
    pub key: Vec<u8>,
    /// Current value and versionstamp, or `None` when the key has no entry.
    pub entry: Option<(EngineValue, String)>,
}

/// One watch update batch: the current state of every watched key.
pub type WatchBatch = Vec<WatchEntry>;

/// Lazy sequence of watch batches. The first batch reflects the state at
/// subscription time; later batches follow commits touching watched keys.
pub type WatchStream = BoxStream<'static, WatchBatch>;

/// The transactional key-value engine underneath the relay.
///
/// Implementations must be task-safe: one engine handle is shared immutably
/// across all request tasks.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// List entries in one range, honoring limit and direction.
    async fn list(&self, selector: ListSelector, options: ListOptions)
        -> EngineResult<Vec<EngineEntry>>;

    /// Atomically verify every check and, if all hold, apply every mutation
    /// and enqueue in order.
    async fn atomic(&self, write: EngineAtomicWrite) -> EngineResult<CommitResult>;

    /// Subscribe to a set of keys. Dropping the stream cancels the watch.
    async fn watch(&self, keys: Vec<Vec<u8>>) -> EngineResult<WatchStream>;
}
