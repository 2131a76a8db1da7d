//! The decoded object graph.

use std::borrow::Cow;

use crate::dtype::Dtype;
use crate::PickleError;

/// A value reconstructed from a pickle.
///
/// The set of variants is closed: anything the decoder does not recognize is
/// kept as an opaque [`PickleValue::Object`] carrying only its class name.
#[derive(Debug, Clone, PartialEq)]
pub enum PickleValue {
    None,
    Bool(bool),
    Int(i64),
    /// Integers that do not fit in `i64`.
    BigInt(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    ByteArray(Vec<u8>),
    List(Vec<PickleValue>),
    Tuple(Vec<PickleValue>),
    /// Key/value pairs in insertion order.
    Dict(Vec<(PickleValue, PickleValue)>),
    Set(Vec<PickleValue>),
    FrozenSet(Vec<PickleValue>),
    /// A NumPy `ndarray`.
    Array(NdArray),
    /// A NumPy scalar such as `numpy.int64(3)`.
    Scalar(NdScalar),
    /// A class or function reference used as a plain value.
    Global { module: String, name: String },
    /// An instance of a class the decoder does not model.
    Object { module: String, name: String },
}

impl PickleValue {
    /// Python type name of the value, as reported in conversion errors.
    pub fn type_name(&self) -> Cow<'_, str> {
        match self {
            PickleValue::None => Cow::Borrowed("NoneType"),
            PickleValue::Bool(_) => Cow::Borrowed("bool"),
            PickleValue::Int(_) | PickleValue::BigInt(_) => Cow::Borrowed("int"),
            PickleValue::Float(_) => Cow::Borrowed("float"),
            PickleValue::Str(_) => Cow::Borrowed("str"),
            PickleValue::Bytes(_) => Cow::Borrowed("bytes"),
            PickleValue::ByteArray(_) => Cow::Borrowed("bytearray"),
            PickleValue::List(_) => Cow::Borrowed("list"),
            PickleValue::Tuple(_) => Cow::Borrowed("tuple"),
            PickleValue::Dict(_) => Cow::Borrowed("dict"),
            PickleValue::Set(_) => Cow::Borrowed("set"),
            PickleValue::FrozenSet(_) => Cow::Borrowed("frozenset"),
            PickleValue::Array(_) => Cow::Borrowed("ndarray"),
            PickleValue::Scalar(scalar) => Cow::Owned(scalar.dtype.name()),
            PickleValue::Global { .. } => Cow::Borrowed("type"),
            PickleValue::Object { name, .. } => Cow::Borrowed(name),
        }
    }

    /// Convenience constructor for string values.
    pub fn str(s: impl Into<String>) -> Self {
        PickleValue::Str(s.into())
    }

    /// Convenience constructor for string-keyed dicts.
    pub fn dict<K: Into<String>>(fields: impl IntoIterator<Item = (K, PickleValue)>) -> Self {
        PickleValue::Dict(
            fields
                .into_iter()
                .map(|(k, v)| (PickleValue::Str(k.into()), v))
                .collect(),
        )
    }
}

/// Element storage of an [`NdArray`], always in C (row-major) order.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    UInt(Vec<u64>),
    Float(Vec<f64>),
    Str(Vec<String>),
    /// Elements of an `object` dtype array.
    Object(Vec<PickleValue>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::UInt(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Str(v) => v.len(),
            ArrayData::Object(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reorders column-major (Fortran) elements into row-major order.
    pub(crate) fn fortran_to_c(self, shape: &[usize]) -> Self {
        match self {
            ArrayData::Bool(v) => ArrayData::Bool(fortran_to_c(v, shape)),
            ArrayData::Int(v) => ArrayData::Int(fortran_to_c(v, shape)),
            ArrayData::UInt(v) => ArrayData::UInt(fortran_to_c(v, shape)),
            ArrayData::Float(v) => ArrayData::Float(fortran_to_c(v, shape)),
            ArrayData::Str(v) => ArrayData::Str(fortran_to_c(v, shape)),
            ArrayData::Object(v) => ArrayData::Object(fortran_to_c(v, shape)),
        }
    }
}

/// A NumPy `ndarray`.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data: ArrayData,
}

impl NdArray {
    /// Builds an array, checking that `data` holds exactly as many elements
    /// as `shape` describes.
    pub fn new(dtype: Dtype, shape: Vec<usize>, data: ArrayData) -> Result<Self, PickleError> {
        // An overflowing shape can never match a real payload.
        let expected = element_count(&shape).unwrap_or(usize::MAX);
        if expected != data.len() {
            return Err(PickleError::ArrayShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { dtype, shape, data })
    }
}

/// A NumPy scalar: a dtype plus one element.
#[derive(Debug, Clone, PartialEq)]
pub struct NdScalar {
    pub dtype: Dtype,
    pub value: ScalarValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

/// Number of elements described by `shape`; `None` on overflow.
pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
}

pub(crate) fn fortran_to_c<T: Clone>(data: Vec<T>, shape: &[usize]) -> Vec<T> {
    if shape.len() < 2 || data.is_empty() {
        return data;
    }
    let mut strides = vec![1usize; shape.len()];
    for axis in 1..shape.len() {
        strides[axis] = strides[axis - 1] * shape[axis - 1];
    }
    let mut index = vec![0usize; shape.len()];
    let mut out = Vec::with_capacity(data.len());
    for _ in 0..data.len() {
        let offset: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
        out.push(data[offset].clone());
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}
