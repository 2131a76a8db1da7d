//! Conversion of decoded pickles to [`serde_json::Value`].
//!
//! Follows the rules of Python's `json` module with a default hook that turns
//! NumPy arrays into nested lists: tuples become arrays, mapping keys are
//! stringified, and anything else without a JSON form is an error naming
//! its Python type.

use serde_json::{Map, Number, Value};
use unpickle_pack::{ArrayData, NdArray, PickleValue};

use crate::kind::{Scalar, ValueKind};
use crate::options::NonFinite;
use crate::pointer::format_pointer;
use crate::ConversionError;

/// Walks a [`PickleValue`] tree, tracking the JSON Pointer of the node being
/// converted so errors can point at it.
pub struct JsonConverter {
    non_finite: NonFinite,
    path: Vec<String>,
}

impl JsonConverter {
    pub fn new(non_finite: NonFinite) -> Self {
        Self {
            non_finite,
            path: Vec::new(),
        }
    }

    pub fn convert(&mut self, value: &PickleValue) -> Result<Value, ConversionError> {
        self.path.clear();
        self.value(value)
    }

    fn value(&mut self, value: &PickleValue) -> Result<Value, ConversionError> {
        match ValueKind::of(value) {
            ValueKind::Scalar(scalar) => self.scalar(scalar),
            ValueKind::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    self.path.push(i.to_string());
                    out.push(self.value(item)?);
                    self.path.pop();
                }
                Ok(Value::Array(out))
            }
            ValueKind::Mapping(pairs) => {
                let mut out = Map::new();
                for (key, item) in pairs {
                    let key = self.key(key)?;
                    self.path.push(key.clone());
                    let item = self.value(item)?;
                    self.path.pop();
                    out.insert(key, item);
                }
                Ok(Value::Object(out))
            }
            ValueKind::NumericArray(array) => self.array(array),
            ValueKind::Unsupported(type_name) => Err(ConversionError::Unsupported {
                type_name: type_name.into_owned(),
                path: self.pointer(),
            }),
        }
    }

    fn scalar(&self, scalar: Scalar<'_>) -> Result<Value, ConversionError> {
        Ok(match scalar {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Int(i) => self.int(i)?,
            Scalar::Float(f) => self.float(f)?,
            Scalar::Str(s) => Value::String(s.to_string()),
        })
    }

    /// Python ints have no width limit; neither does the JSON text.
    fn int(&self, value: i128) -> Result<Value, ConversionError> {
        if let Ok(i) = i64::try_from(value) {
            return Ok(Value::from(i));
        }
        if let Ok(u) = u64::try_from(value) {
            return Ok(Value::from(u));
        }
        Ok(Value::Number(value.to_string().parse::<Number>()?))
    }

    fn float(&self, value: f64) -> Result<Value, ConversionError> {
        match Number::from_f64(value) {
            Some(n) => Ok(Value::Number(n)),
            None => match self.non_finite {
                NonFinite::Null => Ok(Value::Null),
                NonFinite::Reject => Err(ConversionError::NonFiniteFloat {
                    value,
                    path: self.pointer(),
                }),
            },
        }
    }

    /// Stringifies a mapping key the way `json.dumps` does.
    fn key(&self, key: &PickleValue) -> Result<String, ConversionError> {
        match ValueKind::of(key) {
            ValueKind::Scalar(Scalar::Str(s)) => Ok(s.to_string()),
            ValueKind::Scalar(Scalar::Int(i)) => Ok(i.to_string()),
            ValueKind::Scalar(Scalar::Bool(b)) => Ok(b.to_string()),
            ValueKind::Scalar(Scalar::Null) => Ok("null".to_string()),
            ValueKind::Scalar(Scalar::Float(f)) => Ok(float_key(f)),
            _ => Err(ConversionError::UnsupportedKey {
                type_name: key.type_name().into_owned(),
                path: self.pointer(),
            }),
        }
    }

    /// `ndarray.tolist()`: nested lists, outermost axis first.
    fn array(&mut self, array: &NdArray) -> Result<Value, ConversionError> {
        let mut items = Vec::with_capacity(array.data.len());
        match &array.data {
            ArrayData::Bool(v) => items.extend(v.iter().map(|b| Value::Bool(*b))),
            ArrayData::Int(v) => items.extend(v.iter().map(|i| Value::from(*i))),
            ArrayData::UInt(v) => items.extend(v.iter().map(|u| Value::from(*u))),
            ArrayData::Str(v) => items.extend(v.iter().map(|s| Value::String(s.clone()))),
            ArrayData::Float(v) => {
                for (flat, f) in v.iter().enumerate() {
                    let item = self.element(&array.shape, flat, |this| this.float(*f))?;
                    items.push(item);
                }
            }
            ArrayData::Object(v) => {
                for (flat, item) in v.iter().enumerate() {
                    let item = self.element(&array.shape, flat, |this| this.value(item))?;
                    items.push(item);
                }
            }
        }
        let mut items = items.into_iter();
        Ok(nest(&array.shape, &mut items))
    }

    /// Runs `f` with the element's multi-index appended to the path.
    fn element<F>(&mut self, shape: &[usize], flat: usize, f: F) -> Result<Value, ConversionError>
    where
        F: FnOnce(&mut Self) -> Result<Value, ConversionError>,
    {
        let depth = self.path.len();
        self.path.extend(unravel(shape, flat).into_iter().map(|i| i.to_string()));
        let result = f(self);
        self.path.truncate(depth);
        result
    }

    fn pointer(&self) -> String {
        format_pointer(&self.path)
    }
}

/// Python's `json` spells non-finite float keys as JavaScript does.
fn float_key(value: f64) -> String {
    match Number::from_f64(value) {
        Some(n) => n.to_string(),
        None if value.is_nan() => "NaN".to_string(),
        None if value > 0.0 => "Infinity".to_string(),
        None => "-Infinity".to_string(),
    }
}

fn nest(shape: &[usize], items: &mut impl Iterator<Item = Value>) -> Value {
    match shape.split_first() {
        // The array constructor guarantees one item per position.
        None => items.next().unwrap_or(Value::Null),
        Some((&len, rest)) => Value::Array((0..len).map(|_| nest(rest, items)).collect()),
    }
}

/// Row-major multi-index of the `flat`-th element.
fn unravel(shape: &[usize], mut flat: usize) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (axis, len) in shape.iter().enumerate().rev() {
        if *len > 0 {
            index[axis] = flat % len;
            flat /= len;
        }
    }
    index
}
