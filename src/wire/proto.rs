//! Message codecs for the datapath schema.
//!
//! One struct per protocol message, each with an `encode`/`decode` pair
//! layered on [`RecordReader`](crate::wire::RecordReader) and the field
//! writers. Decoding is a loop over records dispatching on known field
//! numbers; unknown fields fall through to the catch-all arm and are
//! skipped, nested messages are LEN payloads decoded recursively, and
//! fields at their default value are omitted on encode.

use crate::wire::error::{WireError, WireResult};
use crate::wire::record::{
    parse_packed_u32, put_bool_field, put_bytes_field, put_i64_field, put_len_field,
    put_packed_u32_field, put_u64_field, RecordReader, RecordValue,
};

/// Outcome of a snapshot read, also reused by watch outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotReadStatus {
    /// No status reported.
    #[default]
    Unspecified,
    /// The read was served.
    Success,
    /// Reads are disabled for this database.
    ReadDisabled,
}

impl SnapshotReadStatus {
    const fn discriminant(self) -> i32 {
        match self {
            SnapshotReadStatus::Unspecified => 0,
            SnapshotReadStatus::Success => 1,
            SnapshotReadStatus::ReadDisabled => 2,
        }
    }
}

impl TryFrom<i32> for SnapshotReadStatus {
    type Error = WireError;

    fn try_from(value: i32) -> WireResult<Self> {
        match value {
            0 => Ok(SnapshotReadStatus::Unspecified),
            1 => Ok(SnapshotReadStatus::Success),
            2 => Ok(SnapshotReadStatus::ReadDisabled),
            other => Err(WireError::UnknownEnumValue { what: "SnapshotReadStatus", value: other }),
        }
    }
}

/// Outcome of an atomic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AtomicWriteStatus {
    /// No status reported (commit failed for an unspecified reason).
    #[default]
    Unspecified,
    /// The transaction committed.
    Success,
    /// At least one check was not satisfied.
    CheckFailure,
    /// Writes are disabled for this database.
    WriteDisabled,
}

impl AtomicWriteStatus {
    const fn discriminant(self) -> i32 {
        match self {
            AtomicWriteStatus::Unspecified => 0,
            AtomicWriteStatus::Success => 1,
            AtomicWriteStatus::CheckFailure => 2,
            AtomicWriteStatus::WriteDisabled => 5,
        }
    }
}

impl TryFrom<i32> for AtomicWriteStatus {
    type Error = WireError;

    fn try_from(value: i32) -> WireResult<Self> {
        match value {
            0 => Ok(AtomicWriteStatus::Unspecified),
            1 => Ok(AtomicWriteStatus::Success),
            2 => Ok(AtomicWriteStatus::CheckFailure),
            5 => Ok(AtomicWriteStatus::WriteDisabled),
            other => Err(WireError::UnknownEnumValue { what: "AtomicWriteStatus", value: other }),
        }
    }
}

/// Kind of mutation inside an atomic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    /// Store the value.
    Set,
    /// Remove the entry.
    Delete,
    /// Wrapping 64-bit sum into the existing counter.
    Sum,
    /// Keep the larger of existing and operand.
    Max,
    /// Keep the smaller of existing and operand.
    Min,
    /// Set under a key whose final part is the commit versionstamp.
    SetSuffixVersionstampedKey,
}

impl TryFrom<i32> for MutationType {
    type Error = WireError;

    fn try_from(value: i32) -> WireResult<Self> {
        match value {
            1 => Ok(MutationType::Set),
            2 => Ok(MutationType::Delete),
            3 => Ok(MutationType::Sum),
            4 => Ok(MutationType::Max),
            5 => Ok(MutationType::Min),
            9 => Ok(MutationType::SetSuffixVersionstampedKey),
            other => Err(WireError::UnknownEnumValue { what: "MutationType", value: other }),
        }
    }
}

impl MutationType {
    /// Wire discriminant of this mutation type.
    pub const fn discriminant(self) -> i32 {
        match self {
            MutationType::Set => 1,
            MutationType::Delete => 2,
            MutationType::Sum => 3,
            MutationType::Max => 4,
            MutationType::Min => 5,
            MutationType::SetSuffixVersionstampedKey => 9,
        }
    }
}

/// Discriminator for value envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueEncoding {
    /// Engine-defined structured blob, opaque to the relay.
    V8,
    /// 8 bytes, little-endian unsigned 64-bit counter.
    Le64,
    /// Raw bytes.
    Bytes,
}

impl TryFrom<i32> for ValueEncoding {
    type Error = WireError;

    fn try_from(value: i32) -> WireResult<Self> {
        match value {
            1 => Ok(ValueEncoding::V8),
            2 => Ok(ValueEncoding::Le64),
            3 => Ok(ValueEncoding::Bytes),
            other => Err(WireError::UnknownEnumValue { what: "ValueEncoding", value: other }),
        }
    }
}

impl ValueEncoding {
    /// Wire discriminant of this encoding.
    pub const fn discriminant(self) -> i32 {
        match self {
            ValueEncoding::V8 => 1,
            ValueEncoding::Le64 => 2,
            ValueEncoding::Bytes => 3,
        }
    }
}

/// A tagged value envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvValue {
    /// Payload bytes; interpretation depends on `encoding`.
    pub data: Vec<u8>,
    /// Encoding discriminator.
    pub encoding: ValueEncoding,
}

impl KvValue {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bytes_field(&mut buf, 1, &self.data);
        put_i64_field(&mut buf, 2, i64::from(self.encoding.discriminant()));
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut data = Vec::new();
        let mut encoding = 0i32;
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => data = value.into_bytes(1)?,
                2 => encoding = value.int32(2)?,
                _ => {}
            }
        }
        Ok(Self { data, encoding: ValueEncoding::try_from(encoding)? })
    }
}

/// One endpoint-bounded range of a snapshot read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadRange {
    /// Encoded range-start key (range-endpoint form).
    pub start: Vec<u8>,
    /// Encoded range-end key (range-endpoint form).
    pub end: Vec<u8>,
    /// Maximum entries to return; zero means unbounded.
    pub limit: u32,
    /// Iterate from end toward start.
    pub reverse: bool,
}

impl ReadRange {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bytes_field(&mut buf, 1, &self.start);
        put_bytes_field(&mut buf, 2, &self.end);
        put_u64_field(&mut buf, 3, u64::from(self.limit));
        put_bool_field(&mut buf, 4, self.reverse);
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.start = value.into_bytes(1)?,
                2 => msg.end = value.into_bytes(2)?,
                3 => msg.limit = value.uint32(3)?,
                4 => msg.reverse = value.bool(4)?,
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// Snapshot read request: an ordered list of ranges.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotRead {
    /// Requested ranges, answered in order.
    pub ranges: Vec<ReadRange>,
}

impl SnapshotRead {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for range in &self.ranges {
            put_len_field(&mut buf, 1, &range.encode());
        }
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.ranges.push(ReadRange::decode(value.into_bytes(1)?)?),
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// A single stored entry as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KvEntry {
    /// Tuple-encoded key.
    pub key: Vec<u8>,
    /// Envelope payload bytes.
    pub value: Vec<u8>,
    /// Envelope encoding discriminant.
    pub encoding: i32,
    /// 10 raw versionstamp bytes.
    pub versionstamp: Vec<u8>,
}

impl KvEntry {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bytes_field(&mut buf, 1, &self.key);
        put_bytes_field(&mut buf, 2, &self.value);
        put_i64_field(&mut buf, 3, i64::from(self.encoding));
        put_bytes_field(&mut buf, 4, &self.versionstamp);
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.key = value.into_bytes(1)?,
                2 => msg.value = value.into_bytes(2)?,
                3 => msg.encoding = value.int32(3)?,
                4 => msg.versionstamp = value.into_bytes(4)?,
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// Entries returned for one requested range.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadRangeOutput {
    /// Entries in engine order.
    pub values: Vec<KvEntry>,
}

impl ReadRangeOutput {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for entry in &self.values {
            put_len_field(&mut buf, 1, &entry.encode());
        }
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.values.push(KvEntry::decode(value.into_bytes(1)?)?),
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// Snapshot read response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SnapshotReadOutput {
    /// One output per requested range, in request order.
    pub ranges: Vec<ReadRangeOutput>,
    /// Whether reads are disabled for this database.
    pub read_disabled: bool,
    /// Whether the read was served with strong consistency.
    pub read_is_strongly_consistent: bool,
    /// Overall outcome.
    pub status: SnapshotReadStatus,
}

impl SnapshotReadOutput {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for range in &self.ranges {
            put_len_field(&mut buf, 1, &range.encode());
        }
        put_bool_field(&mut buf, 2, self.read_disabled);
        put_bool_field(&mut buf, 4, self.read_is_strongly_consistent);
        put_i64_field(&mut buf, 8, i64::from(self.status.discriminant()));
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.ranges.push(ReadRangeOutput::decode(value.into_bytes(1)?)?),
                2 => msg.read_disabled = value.bool(2)?,
                4 => msg.read_is_strongly_consistent = value.bool(4)?,
                8 => msg.status = SnapshotReadStatus::try_from(value.int32(8)?)?,
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// Optimistic precondition on one key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Check {
    /// Tuple-encoded key.
    pub key: Vec<u8>,
    /// Expected versionstamp; empty means "expect no entry".
    pub versionstamp: Vec<u8>,
}

impl Check {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bytes_field(&mut buf, 1, &self.key);
        put_bytes_field(&mut buf, 2, &self.versionstamp);
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.key = value.into_bytes(1)?,
                2 => msg.versionstamp = value.into_bytes(2)?,
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// One mutation of an atomic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// Tuple-encoded key.
    pub key: Vec<u8>,
    /// Value envelope; absent for DELETE.
    pub value: Option<KvValue>,
    /// Dispatch discriminant; validated when the mutation is applied.
    pub mutation_type: i32,
    /// Absolute expiry in epoch milliseconds; zero means no expiry.
    pub expire_at_ms: i64,
}

impl Default for Mutation {
    fn default() -> Self {
        Self { key: Vec::new(), value: None, mutation_type: 0, expire_at_ms: 0 }
    }
}

impl Mutation {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bytes_field(&mut buf, 1, &self.key);
        if let Some(value) = &self.value {
            put_len_field(&mut buf, 2, &value.encode());
        }
        put_i64_field(&mut buf, 3, i64::from(self.mutation_type));
        put_i64_field(&mut buf, 4, self.expire_at_ms);
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.key = value.into_bytes(1)?,
                2 => msg.value = Some(KvValue::decode(value.into_bytes(2)?)?),
                3 => msg.mutation_type = value.int32(3)?,
                4 => msg.expire_at_ms = value.int64(4)?,
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// One queue message attached to an atomic write.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Enqueue {
    /// Structured (V8-encoded) payload bytes.
    pub payload: Vec<u8>,
    /// Earliest delivery time in epoch milliseconds.
    pub deadline_ms: i64,
    /// Keys that receive the payload if delivery ultimately fails.
    pub keys_if_undelivered: Vec<Vec<u8>>,
    /// Retry backoff schedule in milliseconds.
    pub backoff_schedule: Vec<u32>,
}

impl Enqueue {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bytes_field(&mut buf, 1, &self.payload);
        put_i64_field(&mut buf, 2, self.deadline_ms);
        for key in &self.keys_if_undelivered {
            put_len_field(&mut buf, 3, key);
        }
        put_packed_u32_field(&mut buf, 4, &self.backoff_schedule);
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.payload = value.into_bytes(1)?,
                2 => msg.deadline_ms = value.int64(2)?,
                3 => msg.keys_if_undelivered.push(value.into_bytes(3)?),
                // Packed and unpacked forms are both accepted.
                4 => match value {
                    RecordValue::Len(payload) => {
                        msg.backoff_schedule.extend(parse_packed_u32(payload, 4)?);
                    }
                    other => msg.backoff_schedule.push(other.uint32(4)?),
                },
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// Atomic write request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AtomicWrite {
    /// Preconditions, verified before anything is applied.
    pub checks: Vec<Check>,
    /// Mutations, applied in order after the checks pass.
    pub mutations: Vec<Mutation>,
    /// Queue messages accepted with the commit.
    pub enqueues: Vec<Enqueue>,
}

impl AtomicWrite {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for check in &self.checks {
            put_len_field(&mut buf, 1, &check.encode());
        }
        for mutation in &self.mutations {
            put_len_field(&mut buf, 2, &mutation.encode());
        }
        for enqueue in &self.enqueues {
            put_len_field(&mut buf, 3, &enqueue.encode());
        }
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.checks.push(Check::decode(value.into_bytes(1)?)?),
                2 => msg.mutations.push(Mutation::decode(value.into_bytes(2)?)?),
                3 => msg.enqueues.push(Enqueue::decode(value.into_bytes(3)?)?),
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// Atomic write response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AtomicWriteOutput {
    /// Commit outcome.
    pub status: AtomicWriteStatus,
    /// 10 raw commit versionstamp bytes; empty unless the commit succeeded.
    pub versionstamp: Vec<u8>,
    /// Indices of failed checks; the engine does not report them, so this
    /// stays empty even on check failure.
    pub failed_checks: Vec<u32>,
}

impl AtomicWriteOutput {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_i64_field(&mut buf, 1, i64::from(self.status.discriminant()));
        put_bytes_field(&mut buf, 2, &self.versionstamp);
        put_packed_u32_field(&mut buf, 4, &self.failed_checks);
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.status = AtomicWriteStatus::try_from(value.int32(1)?)?,
                2 => msg.versionstamp = value.into_bytes(2)?,
                4 => match value {
                    RecordValue::Len(payload) => {
                        msg.failed_checks.extend(parse_packed_u32(payload, 4)?);
                    }
                    other => msg.failed_checks.push(other.uint32(4)?),
                },
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// One key of a watch request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchKey {
    /// Tuple-encoded key.
    pub key: Vec<u8>,
}

impl WatchKey {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bytes_field(&mut buf, 1, &self.key);
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.key = value.into_bytes(1)?,
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// Watch request: the set of keys to observe.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Watch {
    /// Keys to observe, defining the per-batch output order.
    pub keys: Vec<WatchKey>,
}

impl Watch {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for key in &self.keys {
            put_len_field(&mut buf, 1, &key.encode());
        }
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.keys.push(WatchKey::decode(value.into_bytes(1)?)?),
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// Per-key element of a watch batch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchKeyOutput {
    /// Whether this key changed in the batch. Always true in batches the
    /// relay emits; the engine reports whole-batch updates.
    pub changed: bool,
    /// The current entry, or `None` when the key has no entry.
    pub entry_if_changed: Option<KvEntry>,
}

impl WatchKeyOutput {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_bool_field(&mut buf, 1, self.changed);
        if let Some(entry) = &self.entry_if_changed {
            put_len_field(&mut buf, 2, &entry.encode());
        }
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.changed = value.bool(1)?,
                2 => msg.entry_if_changed = Some(KvEntry::decode(value.into_bytes(2)?)?),
                _ => {}
            }
        }
        Ok(msg)
    }
}

/// One watch batch: a status plus one output per watched key, in request
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchOutput {
    /// Batch status.
    pub status: SnapshotReadStatus,
    /// One output per watched key, in request order.
    pub keys: Vec<WatchKeyOutput>,
}

impl WatchOutput {
    /// Encode as a record stream, omitting default-valued fields.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_i64_field(&mut buf, 1, i64::from(self.status.discriminant()));
        for key in &self.keys {
            put_len_field(&mut buf, 2, &key.encode());
        }
        buf
    }

    /// Decode from a record stream, skipping unknown fields.
    pub fn decode(buf: Vec<u8>) -> WireResult<Self> {
        let mut msg = Self::default();
        let mut reader = RecordReader::new(buf);
        while let Some((field, value)) = reader.next_record()? {
            match field {
                1 => msg.status = SnapshotReadStatus::try_from(value.int32(1)?)?,
                2 => msg.keys.push(WatchKeyOutput::decode(value.into_bytes(2)?)?),
                _ => {}
            }
        }
        Ok(msg)
    }
}
