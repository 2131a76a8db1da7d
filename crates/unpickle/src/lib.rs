//! Convert Python pickles to indented JSON.
//!
//! The input is decoded with the data-only [`unpickle_pack::PickleDecoder`],
//! so nothing in the file is ever executed. NumPy arrays become nested JSON
//! arrays, and any value JSON cannot hold fails the run with its Python type
//! name and JSON Pointer.
//!
//! # Example
//!
//! ```no_run
//! use unpickle::{convert_with, ConvertOptions, NonFinite};
//!
//! convert_with(
//!     "animations.pkl",
//!     "animations.json",
//!     &ConvertOptions::default().with_non_finite(NonFinite::Null),
//! )?;
//! # Ok::<(), unpickle::ConvertError>(())
//! ```

mod error;
mod kind;
mod options;
mod pointer;
mod to_json;
mod writer;

use std::fs;
use std::path::Path;

use tracing::{debug, info};
use unpickle_pack::{PickleDecoder, PickleValue};

pub use error::{ConversionError, ConvertError};
pub use kind::{Scalar, ValueKind};
pub use options::{ConvertOptions, NonFinite};
pub use pointer::{escape_component, format_pointer};
pub use to_json::JsonConverter;
pub use writer::{render, write_output};

/// Converts the pickle at `input` into a JSON document at `output` with the
/// default options: 4-space indentation, non-finite floats rejected, atomic
/// replace of `output`.
pub fn convert(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<(), ConvertError> {
    convert_with(input, output, &ConvertOptions::default())
}

/// Converts the pickle at `input` into a JSON document at `output`.
///
/// The whole document is built in memory before `output` is touched, so a
/// decode or conversion failure never writes anything.
pub fn convert_with(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: &ConvertOptions,
) -> Result<(), ConvertError> {
    let input = input.as_ref();
    let output = output.as_ref();
    info!(input = %input.display(), output = %output.display(), "converting pickle");

    let data = fs::read(input).map_err(|source| ConvertError::Read {
        path: input.to_path_buf(),
        source,
    })?;
    debug!(bytes = data.len(), "read input");

    let mut decoder = PickleDecoder::new();
    let value = decoder
        .decode(&data)
        .map_err(|source| ConvertError::Decode {
            path: input.to_path_buf(),
            source,
        })?;
    debug!(
        protocol = decoder.protocol(),
        opcodes = decoder.opcode_count(),
        objects = decoder.object_count(),
        "decoded pickle"
    );

    let json = to_json_bytes(&value, options)?;
    write_output(output, &json, options.atomic).map_err(|source| ConvertError::Write {
        path: output.to_path_buf(),
        source,
    })?;
    info!(bytes = json.len(), output = %output.display(), "wrote json");
    Ok(())
}

/// Converts a decoded value and renders it as pretty JSON.
pub fn to_json_bytes(
    value: &PickleValue,
    options: &ConvertOptions,
) -> Result<Vec<u8>, ConversionError> {
    let json = JsonConverter::new(options.non_finite).convert(value)?;
    Ok(render(&json, options.indent)?)
}
