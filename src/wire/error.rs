//! Error types for the wire-format layer.

use snafu::Snafu;

/// Result alias for wire operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors from decoding or encoding the field-wire format.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum WireError {
    /// Input ended before the expected number of bytes was available.
    #[snafu(display("unexpected end of input at offset {offset} (needed {needed} more bytes)"))]
    UnexpectedEof {
        /// Byte offset where the shortfall was detected.
        offset: usize,
        /// Number of bytes that were still required.
        needed: usize,
    },

    /// A varint ran past its 10-byte limit without terminating.
    #[snafu(display("varint exceeds 10 bytes at offset {offset}"))]
    VarintTooLong {
        /// Byte offset where the varint began.
        offset: usize,
    },

    /// A record tag declared a wire type outside the recognized set.
    #[snafu(display("unknown wire type {value} for field {field}"))]
    UnknownWireType {
        /// The raw wire-type bits.
        value: u8,
        /// Field number carrying the bad wire type.
        field: u32,
    },

    /// A known field arrived with a wire type other than its schema declares.
    #[snafu(display("field {field}: expected {expected} record, got {actual}"))]
    WireTypeMismatch {
        /// Field number that mismatched.
        field: u32,
        /// The wire type the schema declares.
        expected: &'static str,
        /// The wire type actually observed.
        actual: &'static str,
    },

    /// A varint-encoded value does not fit the declared integer width.
    #[snafu(display("field {field}: varint value {value} out of range"))]
    VarintOutOfRange {
        /// Field number carrying the oversized value.
        field: u32,
        /// The decoded 64-bit value.
        value: u64,
    },

    /// An enum field carried a discriminant outside the recognized set.
    #[snafu(display("unrecognized {what} discriminant {value}"))]
    UnknownEnumValue {
        /// Name of the enum being decoded.
        what: &'static str,
        /// The unrecognized discriminant.
        value: i32,
    },
}
