//! Closed classification of decoded values by how they convert to JSON.

use std::borrow::Cow;

use unpickle_pack::{ElementKind, NdArray, PickleValue, ScalarValue};

/// How a [`PickleValue`] is written to JSON.
///
/// Every value falls into exactly one kind; [`ValueKind::Unsupported`]
/// carries the Python type name reported in the error.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind<'a> {
    Mapping(&'a [(PickleValue, PickleValue)]),
    Sequence(&'a [PickleValue]),
    Scalar(Scalar<'a>),
    NumericArray(&'a NdArray),
    Unsupported(Cow<'a, str>),
}

/// A value JSON holds natively.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar<'a> {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(&'a str),
}

impl<'a> ValueKind<'a> {
    pub fn of(value: &'a PickleValue) -> Self {
        match value {
            PickleValue::None => ValueKind::Scalar(Scalar::Null),
            PickleValue::Bool(b) => ValueKind::Scalar(Scalar::Bool(*b)),
            PickleValue::Int(i) => ValueKind::Scalar(Scalar::Int((*i).into())),
            PickleValue::BigInt(i) => ValueKind::Scalar(Scalar::Int(*i)),
            PickleValue::Float(f) => ValueKind::Scalar(Scalar::Float(*f)),
            PickleValue::Str(s) => ValueKind::Scalar(Scalar::Str(s)),
            PickleValue::List(items) | PickleValue::Tuple(items) => ValueKind::Sequence(items),
            PickleValue::Dict(pairs) => ValueKind::Mapping(pairs),
            PickleValue::Array(array) => ValueKind::NumericArray(array),
            // numpy.float64 subclasses float and numpy.str_ subclasses str;
            // no other NumPy scalar has a JSON form.
            PickleValue::Scalar(scalar) => match (&scalar.value, scalar.dtype.kind) {
                (ScalarValue::Float(f), ElementKind::Float) if scalar.dtype.size == 8 => {
                    ValueKind::Scalar(Scalar::Float(*f))
                }
                (ScalarValue::Str(s), ElementKind::Str) => ValueKind::Scalar(Scalar::Str(s)),
                _ => ValueKind::Unsupported(value.type_name()),
            },
            PickleValue::Bytes(_)
            | PickleValue::ByteArray(_)
            | PickleValue::Set(_)
            | PickleValue::FrozenSet(_)
            | PickleValue::Global { .. }
            | PickleValue::Object { .. } => ValueKind::Unsupported(value.type_name()),
        }
    }
}
