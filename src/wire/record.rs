//! Generic record stream for the field-wire format.
//!
//! Every record begins with a varint tag `(field_number << 3) | wire_type`.
//! The reader materializes one record at a time and signals end-of-input with
//! `None`, which lets message decoders loop over records and skip unknown
//! field numbers without knowing anything about the schema: the payload is
//! always consumed according to its declared wire type.
//!
//! The writers omit fields at their default value (numeric zero, empty
//! bytes, `false`); repeated and nested-message fields go through
//! [`put_len_field`], which always writes, since presence of an element is
//! itself information.

use crate::wire::cursor::{put_var_u64, Cursor};
use crate::wire::error::{WireError, WireResult};

/// Recognized wire types of the field-wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    /// LEB128 varint body.
    Varint,
    /// 8 bytes, little-endian.
    I64,
    /// Varint length followed by that many payload bytes.
    Len,
    /// Group start marker, no payload.
    StartGroup,
    /// Group end marker, no payload.
    EndGroup,
    /// 4 bytes, little-endian.
    I32,
}

impl WireType {
    fn from_bits(bits: u8, field: u32) -> WireResult<Self> {
        match bits {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::I32),
            other => Err(WireError::UnknownWireType { value: other, field }),
        }
    }

    const fn bits(self) -> u64 {
        match self {
            WireType::Varint => 0,
            WireType::I64 => 1,
            WireType::Len => 2,
            WireType::StartGroup => 3,
            WireType::EndGroup => 4,
            WireType::I32 => 5,
        }
    }
}

/// The decoded body of a single record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    /// VARINT body.
    Varint(u64),
    /// I64 body (bit pattern; signed/float interpretation is the caller's).
    I64(u64),
    /// LEN body.
    Len(Vec<u8>),
    /// I32 body.
    I32(u32),
    /// SGROUP/EGROUP marker. Accepted and carried, but payload-less.
    Group,
}

impl RecordValue {
    fn kind(&self) -> &'static str {
        match self {
            RecordValue::Varint(_) => "VARINT",
            RecordValue::I64(_) => "I64",
            RecordValue::Len(_) => "LEN",
            RecordValue::I32(_) => "I32",
            RecordValue::Group => "GROUP",
        }
    }

    /// Assert a VARINT record and return its value.
    pub fn varint(&self, field: u32) -> WireResult<u64> {
        match self {
            RecordValue::Varint(v) => Ok(*v),
            other => Err(WireError::WireTypeMismatch {
                field,
                expected: "VARINT",
                actual: other.kind(),
            }),
        }
    }

    /// Assert a VARINT record holding a value that fits in 32 bits.
    pub fn uint32(&self, field: u32) -> WireResult<u32> {
        let v = self.varint(field)?;
        u32::try_from(v).map_err(|_| WireError::VarintOutOfRange { field, value: v })
    }

    /// Assert a VARINT record and reinterpret it as a signed 32-bit value.
    ///
    /// Enum fields are int32 on the wire; negative values arrive as
    /// 10-byte sign-extended varints.
    pub fn int32(&self, field: u32) -> WireResult<i32> {
        let v = self.varint(field)?;
        Ok(v as i32)
    }

    /// Assert a VARINT record and reinterpret it as a signed 64-bit value.
    pub fn int64(&self, field: u32) -> WireResult<i64> {
        Ok(self.varint(field)? as i64)
    }

    /// Assert a VARINT record and map it onto a boolean (zero is false).
    pub fn bool(&self, field: u32) -> WireResult<bool> {
        Ok(self.varint(field)? != 0)
    }

    /// Assert a LEN record and take its payload.
    pub fn into_bytes(self, field: u32) -> WireResult<Vec<u8>> {
        match self {
            RecordValue::Len(bytes) => Ok(bytes),
            other => Err(WireError::WireTypeMismatch {
                field,
                expected: "LEN",
                actual: other.kind(),
            }),
        }
    }
}

/// Streaming reader over a record sequence.
#[derive(Debug)]
pub struct RecordReader {
    cursor: Cursor,
}

impl RecordReader {
    /// Read records from an owned message buffer.
    pub fn new(buf: Vec<u8>) -> Self {
        Self { cursor: Cursor::new(buf) }
    }

    /// Decode the next record, or `None` at end of input.
    pub fn next_record(&mut self) -> WireResult<Option<(u32, RecordValue)>> {
        if self.cursor.is_at_end() {
            return Ok(None);
        }
        let tag = self.cursor.read_var_u64()?;
        let field = (tag >> 3) as u32;
        let value = match WireType::from_bits((tag & 0x7) as u8, field)? {
            WireType::Varint => RecordValue::Varint(self.cursor.read_var_u64()?),
            WireType::I64 => RecordValue::I64(self.cursor.read_u64_le()?),
            WireType::Len => {
                let len = self.cursor.read_var_u64()? as usize;
                RecordValue::Len(self.cursor.read_exact(len)?.to_vec())
            }
            WireType::I32 => RecordValue::I32(self.cursor.read_u32_le()?),
            WireType::StartGroup | WireType::EndGroup => RecordValue::Group,
        };
        Ok(Some((field, value)))
    }
}

fn put_tag(buf: &mut Vec<u8>, field: u32, wire_type: WireType) {
    put_var_u64(buf, (u64::from(field) << 3) | wire_type.bits());
}

/// Write a VARINT field, omitting the record when the value is zero.
pub fn put_u64_field(buf: &mut Vec<u8>, field: u32, value: u64) {
    if value == 0 {
        return;
    }
    put_tag(buf, field, WireType::Varint);
    put_var_u64(buf, value);
}

/// Write a signed VARINT field (two's complement), omitting zero.
pub fn put_i64_field(buf: &mut Vec<u8>, field: u32, value: i64) {
    put_u64_field(buf, field, value as u64);
}

/// Write a bool VARINT field, omitting `false`.
pub fn put_bool_field(buf: &mut Vec<u8>, field: u32, value: bool) {
    if value {
        put_u64_field(buf, field, 1);
    }
}

/// Write a LEN field, omitting the record when the payload is empty.
pub fn put_bytes_field(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    put_len_field(buf, field, bytes);
}

/// Write a LEN field unconditionally.
///
/// Repeated elements and present nested messages must be written even when
/// their payload happens to be empty.
pub fn put_len_field(buf: &mut Vec<u8>, field: u32, bytes: &[u8]) {
    put_tag(buf, field, WireType::Len);
    put_var_u64(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

/// Write a packed repeated uint32 field, omitting the record when empty.
pub fn put_packed_u32_field(buf: &mut Vec<u8>, field: u32, values: &[u32]) {
    if values.is_empty() {
        return;
    }
    let mut payload = Vec::with_capacity(values.len());
    for &v in values {
        put_var_u64(&mut payload, u64::from(v));
    }
    put_len_field(buf, field, &payload);
}

/// Decode a packed repeated uint32 payload.
pub fn parse_packed_u32(payload: Vec<u8>, field: u32) -> WireResult<Vec<u32>> {
    let mut cursor = Cursor::new(payload);
    let mut values = Vec::new();
    while !cursor.is_at_end() {
        let v = cursor.read_var_u64()?;
        values.push(u32::try_from(v).map_err(|_| WireError::VarintOutOfRange { field, value: v })?);
    }
    Ok(values)
}
