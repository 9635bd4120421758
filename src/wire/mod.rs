//! Wire-format layer for the datapath protocol.
//!
//! The external protocol is a tag-length-value field-wire format: every
//! message is a concatenation of records, each record a varint tag
//! `(field_number << 3) | wire_type` followed by a body whose shape is
//! determined by the wire type. The layering here is:
//!
//! - [`cursor`]: binary read/write primitives (fixed-width integers,
//!   LEB128 varints, length-checked byte runs)
//! - [`record`]: the generic record stream (tag decoding, wire-type
//!   dispatch, unknown-field skipping, default-omitting field writers)
//! - [`proto`]: per-message codecs for the datapath schema
//!
//! Unknown field numbers are skipped on decode according to their declared
//! wire type, which is what gives the format its forward compatibility.

mod cursor;
mod error;
mod record;
pub mod proto;

pub use cursor::{put_u32_le, put_u64_be, put_u64_le, put_u8, put_var_u64, Cursor};
pub use error::{WireError, WireResult};
pub use record::{
    put_bool_field, put_bytes_field, put_i64_field, put_len_field, put_packed_u32_field,
    put_u64_field, RecordReader, RecordValue, WireType,
};
