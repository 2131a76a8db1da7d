//! Error types for pickle to JSON conversion.

use std::io;
use std::path::PathBuf;

use thiserror::Error;
use unpickle_pack::PickleError;

use crate::pointer::describe;

/// A value that cannot be represented in the JSON document.
///
/// `path` is the JSON Pointer of the offending node.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Object of type {type_name} is not JSON serializable (at {})", describe(.path))]
    Unsupported { type_name: String, path: String },
    #[error(
        "keys must be str, int, float, bool or None, not {type_name} (at {})",
        describe(.path)
    )]
    UnsupportedKey { type_name: String, path: String },
    #[error("out of range float value {value} is not JSON compliant (at {})", describe(.path))]
    NonFiniteFloat { value: f64, path: String },
    #[error("failed to render JSON: {0}")]
    Render(#[from] serde_json::Error),
}

impl ConversionError {
    /// JSON Pointer of the offending node, if the error has one.
    pub fn path(&self) -> Option<&str> {
        match self {
            ConversionError::Unsupported { path, .. }
            | ConversionError::UnsupportedKey { path, .. }
            | ConversionError::NonFiniteFloat { path, .. } => Some(path),
            ConversionError::Render(_) => None,
        }
    }
}

/// Failure of a whole [`convert`](crate::convert) run.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not a valid pickle: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: PickleError,
    },
    #[error(transparent)]
    Convert(#[from] ConversionError),
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ConvertError {
    /// Process exit code for this kind of failure. Usage errors exit with 2.
    pub fn exit_code(&self) -> u8 {
        match self {
            ConvertError::Read { .. } => 3,
            ConvertError::Decode { .. } => 4,
            ConvertError::Convert(_) => 5,
            ConvertError::Write { .. } => 6,
        }
    }
}
