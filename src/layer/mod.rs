//! Order-preserving key encoding.
//!
//! Keys on the datapath are ordered sequences of typed parts packed into a
//! byte string whose lexicographic order matches the type-aware order of the
//! parts. The encoding follows the classic tuple-layer scheme: a 1-byte type
//! tag followed by a self-delimited body, with null-escaping for byte runs
//! and sign-aware bit transforms for integers and doubles.
//!
//! Range reads extend the encoding with endpoint markers: a trailing `0x00`
//! selects "just after this prefix", a trailing `0xFF` selects the
//! complementary lower bound. See [`tuple::RangeMode`].

mod tuple;

pub use tuple::{Key, KeyPart, RangeKey, RangeMode, TupleError};
