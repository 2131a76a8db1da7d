//! Safe decoding of Python pickles into a plain value tree.
//!
//! [`PickleDecoder`] runs the pickle opcode stream without importing or
//! calling anything. Built-in containers and scalars are reconstructed
//! directly, NumPy arrays and scalars are rebuilt from their pickled buffers,
//! and every other class instance becomes an opaque [`PickleValue::Object`]
//! that only remembers its class name.
//!
//! [`PickleEncoder`] writes protocol 3 pickles in the same layout CPython
//! and NumPy use.
//!
//! # Example
//!
//! ```
//! use unpickle_pack::{from_slice, PickleValue};
//!
//! // pickle.dumps((1, "x"), protocol=0)
//! let value = from_slice(b"(I1\nVx\ntp0\n.").unwrap();
//! assert_eq!(
//!     value,
//!     PickleValue::Tuple(vec![PickleValue::Int(1), PickleValue::str("x")])
//! );
//! ```

mod callables;
mod decoder;
mod dtype;
mod encoder;
mod error;
mod value;

pub mod constants;

pub use decoder::PickleDecoder;
pub use dtype::{ByteOrder, Dtype, ElementKind};
pub use encoder::PickleEncoder;
pub use error::PickleError;
pub use value::{ArrayData, NdArray, NdScalar, PickleValue, ScalarValue};

/// Decodes a single pickle with a fresh [`PickleDecoder`].
pub fn from_slice(data: &[u8]) -> Result<PickleValue, PickleError> {
    PickleDecoder::new().decode(data)
}

/// Encodes `value` as a protocol 3 pickle.
pub fn to_vec(value: &PickleValue) -> Vec<u8> {
    PickleEncoder::new().encode(value)
}
