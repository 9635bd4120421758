//! Datapath translation: decoded requests in, engine operations out.
//!
//! Each operation follows the same shape: decode the request message,
//! validate and re-encode every key through the tuple layer (responses carry
//! canonical encodings, not the client's bytes), call the engine, and encode
//! the response message. Watch additionally frames each engine batch with a
//! 4-byte little-endian length prefix and hands back a lazy stream: one
//! batch in, one frame out, no buffering beyond the frame in flight.

use futures::stream::{Stream, StreamExt};
use tracing::warn;

use crate::engine::{
    CommitResult, Engine, EngineAtomicWrite, EngineCheck, EngineEnqueue, EngineMutation,
    ListOptions, ListSelector, WatchBatch,
};
use crate::error::{RelayError, RelayResult};
use crate::layer::{Key, KeyPart, RangeKey, RangeMode};
use crate::value::{decode_counter_operand, decode_value, encode_value};
use crate::wire::proto::{
    AtomicWrite, AtomicWriteOutput, AtomicWriteStatus, KvEntry, MutationType, ReadRangeOutput,
    SnapshotRead, SnapshotReadOutput, SnapshotReadStatus, Watch, WatchKeyOutput, WatchOutput,
};

/// Length of a raw versionstamp in bytes.
const VERSIONSTAMP_LEN: usize = 10;

/// Serve a snapshot read: request bytes in, response bytes out.
pub async fn snapshot_read(engine: &dyn Engine, body: Vec<u8>) -> RelayResult<Vec<u8>> {
    let request = SnapshotRead::decode(body)?;
    let mut ranges = Vec::with_capacity(request.ranges.len());

    for range in request.ranges {
        let start = RangeKey::unpack(&range.start)?;
        let end = RangeKey::unpack(&range.end)?;
        if start.mode == RangeMode::Before {
            return Err(RelayError::UnsupportedSelector);
        }

        let start_key = promote_endpoint(start)?;
        let selector = match end.mode {
            RangeMode::Before => {
                ListSelector::Prefix { start: start_key, prefix: end.key.pack()? }
            }
            _ => ListSelector::Range { start: start_key, end: promote_endpoint(end)? },
        };
        let options = ListOptions {
            limit: (range.limit > 0).then_some(range.limit as usize),
            reverse: range.reverse,
        };

        let entries = engine.list(selector, options).await?;
        let mut values = Vec::with_capacity(entries.len());
        for entry in entries {
            values.push(KvEntry {
                key: entry.key,
                versionstamp: versionstamp_from_hex(&entry.versionstamp)?,
                ..envelope_fields(&entry.value)
            });
        }
        ranges.push(ReadRangeOutput { values });
    }

    let response = SnapshotReadOutput {
        ranges,
        read_disabled: false,
        read_is_strongly_consistent: true,
        status: SnapshotReadStatus::Success,
    };
    Ok(response.encode())
}

/// Serve an atomic write: request bytes in, response bytes out.
///
/// Checks, mutations, and enqueues are attached to the engine transaction in
/// the exact order received. The wall clock is captured once so every
/// relative expiry and delay in the transaction shares the same `now`.
pub async fn atomic_write(engine: &dyn Engine, body: Vec<u8>) -> RelayResult<Vec<u8>> {
    let request = AtomicWrite::decode(body)?;
    let now = now_ms();
    let mut write = EngineAtomicWrite::default();

    for check in request.checks {
        let key = canonical_key(&check.key)?;
        let versionstamp = if check.versionstamp.is_empty() {
            None
        } else if check.versionstamp.len() == VERSIONSTAMP_LEN {
            Some(hex_string(&check.versionstamp))
        } else {
            return Err(RelayError::InvalidVersionstamp { len: check.versionstamp.len() });
        };
        write.checks.push(EngineCheck { key, versionstamp });
    }

    for mutation in request.mutations {
        let key = canonical_key(&mutation.key)?;
        let mutation_type = MutationType::try_from(mutation.mutation_type)?;
        // Non-positive expiry passes through; the engine defines the
        // behavior of an already-elapsed deadline.
        let expire_in_ms = (mutation.expire_at_ms > 0).then(|| mutation.expire_at_ms - now);

        let require_value = || {
            mutation.value.clone().ok_or(RelayError::MissingValue {
                mutation_type: mutation.mutation_type,
            })
        };

        let engine_mutation = match mutation_type {
            MutationType::Set => EngineMutation::Set {
                key,
                value: decode_value(require_value()?)?,
                expire_in_ms,
            },
            MutationType::SetSuffixVersionstampedKey => {
                EngineMutation::SetSuffixVersionstampedKey {
                    key,
                    value: decode_value(require_value()?)?,
                    expire_in_ms,
                }
            }
            MutationType::Delete => EngineMutation::Delete { key },
            MutationType::Sum => EngineMutation::Sum {
                key,
                operand: decode_counter_operand(require_value()?)?,
            },
            MutationType::Max => EngineMutation::Max {
                key,
                operand: decode_counter_operand(require_value()?)?,
            },
            MutationType::Min => EngineMutation::Min {
                key,
                operand: decode_counter_operand(require_value()?)?,
            },
        };
        write.mutations.push(engine_mutation);
    }

    for enqueue in request.enqueues {
        let mut keys_if_undelivered = Vec::with_capacity(enqueue.keys_if_undelivered.len());
        for key in &enqueue.keys_if_undelivered {
            keys_if_undelivered.push(canonical_key(key)?);
        }
        write.enqueues.push(EngineEnqueue {
            payload: enqueue.payload,
            delay_ms: (enqueue.deadline_ms > now).then(|| enqueue.deadline_ms - now),
            keys_if_undelivered,
            backoff_schedule: enqueue.backoff_schedule,
        });
    }

    let response = match engine.atomic(write).await {
        Ok(CommitResult::Committed { versionstamp }) => AtomicWriteOutput {
            status: AtomicWriteStatus::Success,
            versionstamp: versionstamp_from_hex(&versionstamp)?,
            failed_checks: Vec::new(),
        },
        Ok(CommitResult::CheckFailed) => AtomicWriteOutput {
            status: AtomicWriteStatus::CheckFailure,
            versionstamp: Vec::new(),
            // The engine does not report which check failed.
            failed_checks: Vec::new(),
        },
        Err(error) => {
            warn!(error = %error, "atomic write failed to commit");
            AtomicWriteOutput {
                status: AtomicWriteStatus::Unspecified,
                versionstamp: Vec::new(),
                failed_checks: Vec::new(),
            }
        }
    };
    Ok(response.encode())
}

/// Open a watch: request bytes in, a lazy stream of framed batches out.
///
/// Each frame is a 4-byte little-endian length followed by one encoded
/// watch-output message. Dropping the stream cancels the engine watch.
pub async fn watch(
    engine: &dyn Engine,
    body: Vec<u8>,
) -> RelayResult<impl Stream<Item = Vec<u8>> + Send + 'static> {
    let request = Watch::decode(body)?;
    let mut keys = Vec::with_capacity(request.keys.len());
    for watch_key in &request.keys {
        keys.push(canonical_key(&watch_key.key)?);
    }

    let batches = engine.watch(keys).await?;
    Ok(batches.map(|batch| frame_batch(&batch)))
}

/// Encode one engine batch as a length-prefixed watch-output frame.
fn frame_batch(batch: &WatchBatch) -> Vec<u8> {
    let output = WatchOutput {
        status: SnapshotReadStatus::Success,
        keys: batch
            .iter()
            .map(|entry| WatchKeyOutput {
                changed: true,
                entry_if_changed: entry.entry.as_ref().and_then(|(value, versionstamp)| {
                    let raw = versionstamp_from_hex(versionstamp).ok()?;
                    Some(KvEntry {
                        key: entry.key.clone(),
                        versionstamp: raw,
                        ..envelope_fields(value)
                    })
                }),
            })
            .collect(),
    };
    let payload = output.encode();
    let mut frame = Vec::with_capacity(4 + payload.len());
    crate::wire::put_u32_le(&mut frame, payload.len() as u32);
    frame.extend_from_slice(&payload);
    frame
}

/// Validate a client key and return its canonical encoding.
fn canonical_key(encoded: &[u8]) -> RelayResult<Vec<u8>> {
    Ok(Key::unpack(encoded)?.pack()?)
}

/// Promote a range endpoint to an exact key.
///
/// An `after` endpoint becomes the prefix extended with an empty byte-string
/// part: the lexicographically-smallest key strictly greater than every key
/// with that prefix.
fn promote_endpoint(endpoint: RangeKey) -> RelayResult<Vec<u8>> {
    let key = match endpoint.mode {
        RangeMode::After => endpoint.key.push(KeyPart::Bytes(Vec::new())),
        _ => endpoint.key,
    };
    Ok(key.pack()?)
}

/// Entry template carrying the envelope fields of a value.
fn envelope_fields(value: &crate::engine::EngineValue) -> KvEntry {
    let envelope = encode_value(value);
    KvEntry {
        key: Vec::new(),
        value: envelope.data,
        encoding: envelope.encoding.discriminant(),
        versionstamp: Vec::new(),
    }
}

/// Wall clock in epoch milliseconds.
fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Decode a lowercase hex versionstamp into its 10 raw bytes.
fn versionstamp_from_hex(hex: &str) -> RelayResult<Vec<u8>> {
    let malformed = || RelayError::MalformedEngineVersionstamp { versionstamp: hex.to_string() };
    if hex.len() != VERSIONSTAMP_LEN * 2 {
        return Err(malformed());
    }
    let mut raw = Vec::with_capacity(VERSIONSTAMP_LEN);
    let bytes = hex.as_bytes();
    for pair in bytes.chunks_exact(2) {
        let high = (pair[0] as char).to_digit(16).ok_or_else(malformed)?;
        let low = (pair[1] as char).to_digit(16).ok_or_else(malformed)?;
        raw.push(((high << 4) | low) as u8);
    }
    Ok(raw)
}

/// Hex-encode raw versionstamp bytes for the engine boundary.
fn hex_string(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len() * 2);
    for byte in raw {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use crate::wire::proto::{Check, Enqueue, KvValue, Mutation, ReadRange, ValueEncoding};

    fn set_mutation(key: &Key, value: &[u8]) -> Mutation {
        Mutation {
            key: key.pack().unwrap(),
            value: Some(KvValue { data: value.to_vec(), encoding: ValueEncoding::Bytes }),
            mutation_type: 1,
            expire_at_ms: 0,
        }
    }

    async fn read_one_range(engine: &MemoryEngine, range: ReadRange) -> ReadRangeOutput {
        let request = SnapshotRead { ranges: vec![range] };
        let bytes = snapshot_read(engine, request.encode()).await.unwrap();
        let mut output = SnapshotReadOutput::decode(bytes).unwrap();
        assert!(output.read_is_strongly_consistent);
        assert!(!output.read_disabled);
        assert_eq!(output.status, SnapshotReadStatus::Success);
        assert_eq!(output.ranges.len(), 1);
        output.ranges.remove(0)
    }

    fn after_endpoint(key: &Key) -> Vec<u8> {
        let mut bytes = key.pack().unwrap();
        bytes.push(0x00);
        bytes
    }

    fn before_endpoint(key: &Key) -> Vec<u8> {
        let mut bytes = key.pack().unwrap();
        bytes.push(0xFF);
        bytes
    }

    #[tokio::test]
    async fn test_empty_snapshot_read() {
        let engine = MemoryEngine::open(None).unwrap();
        let range = ReadRange {
            start: vec![0x01, 0x00],
            end: vec![0x01, 0x00, 0xFF],
            limit: 0,
            reverse: false,
        };
        let output = read_one_range(&engine, range).await;
        assert!(output.values.is_empty());
    }

    #[tokio::test]
    async fn test_set_then_read_prefix_range() {
        let engine = MemoryEngine::open(None).unwrap();
        let key = Key::new().push("a").push(1i64);
        let write = AtomicWrite {
            mutations: vec![set_mutation(&key, b"hi")],
            ..Default::default()
        };
        let bytes = atomic_write(&engine, write.encode()).await.unwrap();
        let output = AtomicWriteOutput::decode(bytes).unwrap();
        assert_eq!(output.status, AtomicWriteStatus::Success);
        assert_eq!(output.versionstamp.len(), 10);

        let prefix = Key::new().push("a");
        let range = ReadRange {
            start: after_endpoint(&prefix),
            end: before_endpoint(&prefix),
            limit: 0,
            reverse: false,
        };
        let result = read_one_range(&engine, range).await;
        assert_eq!(result.values.len(), 1);
        let entry = &result.values[0];
        assert_eq!(entry.key, key.pack().unwrap());
        assert_eq!(entry.value, b"hi");
        assert_eq!(entry.encoding, ValueEncoding::Bytes.discriminant());
        assert_eq!(entry.versionstamp.len(), 10);
    }

    #[tokio::test]
    async fn test_before_start_is_unsupported_selector() {
        let engine = MemoryEngine::open(None).unwrap();
        let key = Key::new().push("a");
        let request = SnapshotRead {
            ranges: vec![ReadRange {
                start: before_endpoint(&key),
                end: after_endpoint(&key),
                limit: 0,
                reverse: false,
            }],
        };
        assert!(matches!(
            snapshot_read(&engine, request.encode()).await,
            Err(RelayError::UnsupportedSelector)
        ));
    }

    #[tokio::test]
    async fn test_check_failure_reports_status_not_error() {
        let engine = MemoryEngine::open(None).unwrap();
        let key = Key::new().push("k");

        let first = AtomicWrite {
            mutations: vec![set_mutation(&key, b"1")],
            ..Default::default()
        };
        let output =
            AtomicWriteOutput::decode(atomic_write(&engine, first.encode()).await.unwrap())
                .unwrap();
        assert_eq!(output.status, AtomicWriteStatus::Success);

        // The all-zero versionstamp can never match a committed entry.
        let second = AtomicWrite {
            checks: vec![Check { key: key.pack().unwrap(), versionstamp: vec![0; 10] }],
            mutations: vec![set_mutation(&key, b"2")],
            ..Default::default()
        };
        let output =
            AtomicWriteOutput::decode(atomic_write(&engine, second.encode()).await.unwrap())
                .unwrap();
        assert_eq!(output.status, AtomicWriteStatus::CheckFailure);
        assert!(output.versionstamp.is_empty());
        assert!(output.failed_checks.is_empty());

        // The failed write must not have replaced the value.
        let range = ReadRange {
            start: after_endpoint(&Key::new()),
            end: before_endpoint(&Key::new()),
            limit: 0,
            reverse: false,
        };
        let result = read_one_range(&engine, range).await;
        assert_eq!(result.values[0].value, b"1");
    }

    #[tokio::test]
    async fn test_counter_sum_roundtrip() {
        let engine = MemoryEngine::open(None).unwrap();
        let key = Key::new().push("c");
        let sum = AtomicWrite {
            mutations: vec![Mutation {
                key: key.pack().unwrap(),
                value: Some(KvValue {
                    data: 5u64.to_le_bytes().to_vec(),
                    encoding: ValueEncoding::Le64,
                }),
                mutation_type: 3,
                expire_at_ms: 0,
            }],
            ..Default::default()
        };

        for expected in [5u64, 10] {
            let bytes = atomic_write(&engine, sum.encode()).await.unwrap();
            assert_eq!(
                AtomicWriteOutput::decode(bytes).unwrap().status,
                AtomicWriteStatus::Success
            );

            let range = ReadRange {
                start: after_endpoint(&Key::new()),
                end: before_endpoint(&Key::new()),
                limit: 0,
                reverse: false,
            };
            let result = read_one_range(&engine, range).await;
            assert_eq!(result.values[0].encoding, ValueEncoding::Le64.discriminant());
            assert_eq!(result.values[0].value, expected.to_le_bytes().to_vec());
        }
    }

    #[tokio::test]
    async fn test_sum_on_bytes_maps_to_unspecified() {
        let engine = MemoryEngine::open(None).unwrap();
        let key = Key::new().push("c");
        let set = AtomicWrite {
            mutations: vec![set_mutation(&key, b"not a counter")],
            ..Default::default()
        };
        atomic_write(&engine, set.encode()).await.unwrap();

        let sum = AtomicWrite {
            mutations: vec![Mutation {
                key: key.pack().unwrap(),
                value: Some(KvValue {
                    data: 1u64.to_le_bytes().to_vec(),
                    encoding: ValueEncoding::Le64,
                }),
                mutation_type: 3,
                expire_at_ms: 0,
            }],
            ..Default::default()
        };
        let output =
            AtomicWriteOutput::decode(atomic_write(&engine, sum.encode()).await.unwrap()).unwrap();
        assert_eq!(output.status, AtomicWriteStatus::Unspecified);
        assert!(output.versionstamp.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_mutation_type_is_bad_request() {
        let engine = MemoryEngine::open(None).unwrap();
        let request = AtomicWrite {
            mutations: vec![Mutation {
                key: Key::new().push("k").pack().unwrap(),
                value: None,
                mutation_type: 42,
                expire_at_ms: 0,
            }],
            ..Default::default()
        };
        assert!(matches!(
            atomic_write(&engine, request.encode()).await,
            Err(RelayError::Wire { .. })
        ));
    }

    #[tokio::test]
    async fn test_sum_with_bytes_operand_is_bad_request() {
        let engine = MemoryEngine::open(None).unwrap();
        let request = AtomicWrite {
            mutations: vec![Mutation {
                key: Key::new().push("k").pack().unwrap(),
                value: Some(KvValue { data: b"x".to_vec(), encoding: ValueEncoding::Bytes }),
                mutation_type: 3,
                expire_at_ms: 0,
            }],
            ..Default::default()
        };
        assert!(matches!(
            atomic_write(&engine, request.encode()).await,
            Err(RelayError::Value { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_without_value_is_bad_request() {
        let engine = MemoryEngine::open(None).unwrap();
        let request = AtomicWrite {
            mutations: vec![Mutation {
                key: Key::new().push("k").pack().unwrap(),
                value: None,
                mutation_type: 1,
                expire_at_ms: 0,
            }],
            ..Default::default()
        };
        assert!(matches!(
            atomic_write(&engine, request.encode()).await,
            Err(RelayError::MissingValue { mutation_type: 1 })
        ));
    }

    #[tokio::test]
    async fn test_check_versionstamp_length_validated() {
        let engine = MemoryEngine::open(None).unwrap();
        let request = AtomicWrite {
            checks: vec![Check {
                key: Key::new().push("k").pack().unwrap(),
                versionstamp: vec![0; 4],
            }],
            ..Default::default()
        };
        assert!(matches!(
            atomic_write(&engine, request.encode()).await,
            Err(RelayError::InvalidVersionstamp { len: 4 })
        ));
    }

    #[tokio::test]
    async fn test_enqueue_with_undelivered_keys() {
        let engine = MemoryEngine::open(None).unwrap();
        let request = AtomicWrite {
            enqueues: vec![Enqueue {
                payload: b"payload".to_vec(),
                deadline_ms: now_ms() + 60_000,
                keys_if_undelivered: vec![Key::new().push("dead").pack().unwrap()],
                backoff_schedule: vec![100],
            }],
            ..Default::default()
        };
        let output =
            AtomicWriteOutput::decode(atomic_write(&engine, request.encode()).await.unwrap())
                .unwrap();
        assert_eq!(output.status, AtomicWriteStatus::Success);
    }

    #[tokio::test]
    async fn test_versionstamped_key_mutation() {
        let engine = MemoryEngine::open(None).unwrap();
        let prefix = Key::new().push("log");
        let request = AtomicWrite {
            mutations: vec![Mutation {
                key: prefix.pack().unwrap(),
                value: Some(KvValue { data: b"v".to_vec(), encoding: ValueEncoding::Bytes }),
                mutation_type: 9,
                expire_at_ms: 0,
            }],
            ..Default::default()
        };
        let output =
            AtomicWriteOutput::decode(atomic_write(&engine, request.encode()).await.unwrap())
                .unwrap();
        assert_eq!(output.status, AtomicWriteStatus::Success);

        let range = ReadRange {
            start: after_endpoint(&Key::new()),
            end: before_endpoint(&Key::new()),
            limit: 0,
            reverse: false,
        };
        let result = read_one_range(&engine, range).await;
        assert_eq!(result.values.len(), 1);
        let stored = Key::unpack(&result.values[0].key).unwrap();
        assert_eq!(stored.len(), 2);
        // The appended part carries the raw commit versionstamp.
        match stored.get(1) {
            Some(KeyPart::Bytes(suffix)) => assert_eq!(suffix, &output.versionstamp),
            other => panic!("expected versionstamp part, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watch_frames() {
        let engine = MemoryEngine::open(None).unwrap();
        let key = Key::new().push("w");
        let request = Watch {
            keys: vec![crate::wire::proto::WatchKey { key: key.pack().unwrap() }],
        };
        let mut frames = Box::pin(watch(&engine, request.encode()).await.unwrap());

        // Initial frame: no current entry.
        let frame = frames.next().await.unwrap();
        let (length, payload) = frame.split_at(4);
        assert_eq!(u32::from_le_bytes(length.try_into().unwrap()) as usize, payload.len());
        let output = WatchOutput::decode(payload.to_vec()).unwrap();
        assert_eq!(output.keys.len(), 1);
        assert!(output.keys[0].changed);
        assert!(output.keys[0].entry_if_changed.is_none());

        // A write produces a frame carrying the new entry.
        let write = AtomicWrite {
            mutations: vec![set_mutation(&key, b"x")],
            ..Default::default()
        };
        atomic_write(&engine, write.encode()).await.unwrap();

        let frame = frames.next().await.unwrap();
        let output = WatchOutput::decode(frame[4..].to_vec()).unwrap();
        let entry = output.keys[0].entry_if_changed.as_ref().unwrap();
        assert_eq!(entry.key, key.pack().unwrap());
        assert_eq!(entry.value, b"x");
        assert_eq!(entry.versionstamp.len(), 10);
    }

    #[test]
    fn test_versionstamp_hex_roundtrip() {
        let raw = versionstamp_from_hex("000000000000002a0000").unwrap();
        assert_eq!(raw.len(), 10);
        assert_eq!(raw[7], 0x2a);
        assert_eq!(hex_string(&raw), "000000000000002a0000");

        assert!(versionstamp_from_hex("xyz").is_err());
        assert!(versionstamp_from_hex("00").is_err());
        assert!(versionstamp_from_hex("zz00000000000000002a").is_err());
    }
}
