//! Relay-level error type.
//!
//! Everything that can go wrong translating a datapath request bottoms out
//! here. The disposition is uniform: every variant is a client-visible
//! bad-request. Commit failures are not errors (they are statuses in the
//! response body), and engine errors during a commit are mapped to an
//! unspecified-status response by the caller, not raised through this type.

use snafu::Snafu;

use crate::engine::EngineError;
use crate::layer::TupleError;
use crate::value::ValueError;
use crate::wire::WireError;

/// Result alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors from translating a datapath request.
#[derive(Debug, Snafu)]
pub enum RelayError {
    /// The request body failed wire-format decoding.
    #[snafu(display("malformed request message: {source}"))]
    Wire {
        /// The underlying wire error.
        source: WireError,
    },

    /// A key inside the request failed tuple decoding.
    #[snafu(display("malformed key: {source}"))]
    Key {
        /// The underlying tuple error.
        source: TupleError,
    },

    /// A value envelope inside the request was invalid.
    #[snafu(display("malformed value: {source}"))]
    Value {
        /// The underlying value error.
        source: ValueError,
    },

    /// A range used the unsupported `before` mode on its start endpoint.
    #[snafu(display("unsupported selector: range start cannot be a 'before' endpoint"))]
    UnsupportedSelector,

    /// A versionstamp field was neither empty nor 10 bytes.
    #[snafu(display("versionstamp must be empty or 10 bytes, got {len}"))]
    InvalidVersionstamp {
        /// Actual length observed.
        len: usize,
    },

    /// A mutation that requires a value arrived without one.
    #[snafu(display("mutation type {mutation_type} requires a value"))]
    MissingValue {
        /// The wire discriminant of the mutation.
        mutation_type: i32,
    },

    /// The engine failed while serving a read or watch subscription.
    #[snafu(display("engine error: {source}"))]
    Engine {
        /// The underlying engine error.
        source: EngineError,
    },

    /// The engine produced a versionstamp the relay could not interpret.
    #[snafu(display("engine produced malformed versionstamp {versionstamp:?}"))]
    MalformedEngineVersionstamp {
        /// The offending hex string.
        versionstamp: String,
    },
}

impl From<WireError> for RelayError {
    fn from(source: WireError) -> Self {
        RelayError::Wire { source }
    }
}

impl From<TupleError> for RelayError {
    fn from(source: TupleError) -> Self {
        RelayError::Key { source }
    }
}

impl From<ValueError> for RelayError {
    fn from(source: ValueError) -> Self {
        RelayError::Value { source }
    }
}

impl From<EngineError> for RelayError {
    fn from(source: EngineError) -> Self {
        RelayError::Engine { source }
    }
}
