//! Pickle decoder error type.

use thiserror::Error;
use unpickle_buffers::BufferError;

/// Error type for pickle decoding.
///
/// Offsets point at the opcode byte being executed when the error occurred.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PickleError {
    #[error("truncated pickle: {0}")]
    Truncated(#[from] BufferError),
    #[error("unsupported pickle protocol {0}")]
    UnsupportedProtocol(u8),
    #[error("unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },
    #[error("opcode 0x{opcode:02x} at offset {offset} is not supported: {reason}")]
    UnsupportedOpcode {
        opcode: u8,
        offset: usize,
        reason: &'static str,
    },
    #[error("stack underflow at offset {0}")]
    StackUnderflow(usize),
    #[error("mark not found at offset {0}")]
    MarkNotFound(usize),
    #[error("memo key {key} not found at offset {offset}")]
    MemoKeyNotFound { key: u64, offset: usize },
    #[error("pickle ended without a STOP opcode")]
    MissingStop,
    #[error("invalid {what} literal `{literal}` at offset {offset}")]
    InvalidLiteral {
        what: &'static str,
        literal: String,
        offset: usize,
    },
    #[error("invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),
    #[error("invalid code point U+{0:04X} in unicode array")]
    InvalidCodePoint(u32),
    #[error("negative length {length} at offset {offset}")]
    NegativeLength { length: i64, offset: usize },
    #[error("integer wider than 128 bits at offset {0}")]
    IntegerTooLarge(usize),
    #[error("expected {expected}, found {found} at offset {offset}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
        offset: usize,
    },
    #[error("{callable} received invalid arguments at offset {offset}")]
    InvalidArguments { callable: String, offset: usize },
    #[error("unsupported dtype `{0}`")]
    UnsupportedDtype(String),
    #[error("unsupported text encoding `{0}`")]
    UnsupportedEncoding(String),
    #[error("array of shape {shape:?} needs {expected} element(s), payload holds {actual}")]
    ArrayShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("array payload of {len} byte(s) is not a multiple of the {itemsize}-byte item size")]
    ArrayPayloadSize { len: usize, itemsize: usize },
    #[error("ndarray was reconstructed but never received its state")]
    IncompleteArray,
    #[error("circular reference detected")]
    CircularReference,
    #[error("nesting deeper than {0} levels")]
    NestingTooDeep(usize),
}
