//! Binary buffer utilities for unpickle.
//!
//! This crate provides bounds-checked reading and simple writing of binary
//! data together with the small text helpers the pickle format needs.
//!
//! # Overview
//!
//! - [`Reader`] - Reads binary data from a byte slice with cursor tracking
//! - [`Writer`] - Appends binary data to a growing buffer
//! - [`decode_f16`] - Decodes IEEE 754 half-precision floats
//! - [`latin1_decode`] / [`latin1_encode`] - One byte per code point text
//!
//! # Example
//!
//! ```
//! use unpickle_buffers::Reader;
//!
//! let data = [0x01, 0x03, 0x02, b'o', b'k', b'\n'];
//! let mut reader = Reader::new(&data);
//! assert_eq!(reader.u8().unwrap(), 0x01);
//! assert_eq!(reader.u16_le().unwrap(), 0x0203);
//! assert_eq!(reader.line().unwrap(), b"ok");
//! assert!(reader.u8().is_err());
//! ```

mod f16;
mod reader;
mod strings;
mod writer;

pub use f16::decode_f16;
pub use reader::Reader;
pub use strings::{latin1_decode, latin1_encode};
pub use writer::Writer;

/// Error type for buffer operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Attempted to read past the end of the buffer.
    EndOfBuffer {
        /// Cursor position at the time of the read.
        offset: usize,
        /// Number of bytes the read asked for.
        wanted: usize,
    },
    /// Invalid UTF-8 sequence.
    InvalidUtf8 {
        /// Position of the first byte of the string.
        offset: usize,
    },
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::EndOfBuffer { offset, wanted } => {
                write!(f, "end of buffer: wanted {wanted} byte(s) at offset {offset}")
            }
            BufferError::InvalidUtf8 { offset } => {
                write!(f, "invalid UTF-8 sequence at offset {offset}")
            }
        }
    }
}

impl std::error::Error for BufferError {}
