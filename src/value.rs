//! Value envelope codec.
//!
//! Datapath messages carry values as `(data, encoding)` envelopes; the
//! engine stores them as [`EngineValue`]s. The mapping is mechanical but
//! direction-sensitive: counters become 8 little-endian bytes tagged `LE64`,
//! raw bytes stay raw, and structured blobs pass through verbatim under the
//! `V8` tag; the relay never looks inside them.

use snafu::{ensure, Snafu};

use crate::engine::EngineValue;
use crate::wire::proto::{KvValue, ValueEncoding};

/// Errors translating between wire envelopes and engine values.
#[derive(Debug, Snafu)]
pub enum ValueError {
    /// An `LE64` envelope arrived with a payload that is not 8 bytes.
    #[snafu(display("LE64 value must be 8 bytes, got {len}"))]
    InvalidCounterLength {
        /// Actual payload length.
        len: usize,
    },

    /// A counter mutation (SUM/MAX/MIN) carried a non-counter operand.
    #[snafu(display("counter mutation requires an LE64 operand, got {encoding:?}"))]
    NonCounterOperand {
        /// The encoding that was supplied instead.
        encoding: ValueEncoding,
    },
}

/// Translate an engine value into its wire envelope.
pub fn encode_value(value: &EngineValue) -> KvValue {
    match value {
        EngineValue::Bytes(data) => {
            KvValue { data: data.clone(), encoding: ValueEncoding::Bytes }
        }
        EngineValue::Counter(n) => {
            KvValue { data: n.to_le_bytes().to_vec(), encoding: ValueEncoding::Le64 }
        }
        EngineValue::Serialized(data) => {
            KvValue { data: data.clone(), encoding: ValueEncoding::V8 }
        }
    }
}

/// Translate a wire envelope into the engine value it denotes.
pub fn decode_value(value: KvValue) -> Result<EngineValue, ValueError> {
    match value.encoding {
        ValueEncoding::Bytes => Ok(EngineValue::Bytes(value.data)),
        ValueEncoding::Le64 => {
            ensure!(value.data.len() == 8, InvalidCounterLengthSnafu { len: value.data.len() });
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&value.data);
            Ok(EngineValue::Counter(u64::from_le_bytes(bytes)))
        }
        ValueEncoding::V8 => Ok(EngineValue::Serialized(value.data)),
    }
}

/// Decode a counter operand for SUM/MAX/MIN mutations.
pub fn decode_counter_operand(value: KvValue) -> Result<u64, ValueError> {
    let encoding = value.encoding;
    match decode_value(value)? {
        EngineValue::Counter(n) => Ok(n),
        _ => Err(ValueError::NonCounterOperand { encoding }),
    }
}
