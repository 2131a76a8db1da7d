//! Protocol 3 pickle encoder.
//!
//! Emits the opcode sequences CPython and NumPy produce for protocol 3, so a
//! value tree can be turned back into a pickle that Python itself would load
//! the same way. No memo is written; shared values are serialized once per
//! occurrence.

use unpickle_buffers::Writer;

use crate::constants::{op, ENCODER_PROTOCOL};
use crate::dtype::{ByteOrder, Dtype, ElementKind};
use crate::value::{ArrayData, NdArray, NdScalar, PickleValue, ScalarValue};

/// Pickle encoder.
///
/// # Example
///
/// ```
/// use unpickle_pack::{PickleDecoder, PickleEncoder, PickleValue};
///
/// let value = PickleValue::List(vec![PickleValue::Int(1), PickleValue::str("two")]);
/// let bytes = PickleEncoder::new().encode(&value);
/// assert_eq!(&bytes[..2], b"\x80\x03");
/// assert_eq!(PickleDecoder::new().decode(&bytes).unwrap(), value);
/// ```
pub struct PickleEncoder {
    pub writer: Writer,
}

impl Default for PickleEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PickleEncoder {
    pub fn new() -> Self {
        Self {
            writer: Writer::new(),
        }
    }

    /// Encodes `value` as a complete pickle, `PROTO` through `STOP`.
    pub fn encode(&mut self, value: &PickleValue) -> Vec<u8> {
        self.writer.reset();
        self.writer.u8(op::PROTO);
        self.writer.u8(ENCODER_PROTOCOL);
        self.write_any(value);
        self.writer.u8(op::STOP);
        self.writer.flush()
    }

    pub fn write_any(&mut self, value: &PickleValue) {
        match value {
            PickleValue::None => self.writer.u8(op::NONE),
            PickleValue::Bool(true) => self.writer.u8(op::NEWTRUE),
            PickleValue::Bool(false) => self.writer.u8(op::NEWFALSE),
            PickleValue::Int(i) => self.write_int(*i),
            PickleValue::BigInt(i) => self.write_long(*i),
            PickleValue::Float(f) => {
                self.writer.u8(op::BINFLOAT);
                self.writer.f64_be(*f);
            }
            PickleValue::Str(s) => self.write_str(s),
            PickleValue::Bytes(b) => self.write_bytes(b),
            PickleValue::ByteArray(b) => {
                self.write_global("builtins", "bytearray");
                self.write_bytes(b);
                self.writer.u8(op::TUPLE1);
                self.writer.u8(op::REDUCE);
            }
            PickleValue::List(items) => self.write_list(items),
            PickleValue::Tuple(items) => self.write_tuple(items),
            PickleValue::Dict(pairs) => self.write_dict(pairs),
            PickleValue::Set(items) => self.write_set("set", items),
            PickleValue::FrozenSet(items) => self.write_set("frozenset", items),
            PickleValue::Array(array) => self.write_array(array),
            PickleValue::Scalar(scalar) => self.write_scalar(scalar),
            PickleValue::Global { module, name } => self.write_global(module, name),
            PickleValue::Object { module, name } => {
                self.write_global(module, name);
                self.writer.u8(op::EMPTY_TUPLE);
                self.writer.u8(op::NEWOBJ);
            }
        }
    }

    pub fn write_int(&mut self, value: i64) {
        match value {
            0..=0xff => {
                self.writer.u8(op::BININT1);
                self.writer.u8(value as u8);
            }
            0x100..=0xffff => {
                self.writer.u8(op::BININT2);
                self.writer.u16_le(value as u16);
            }
            _ => match i32::try_from(value) {
                Ok(small) => {
                    self.writer.u8(op::BININT);
                    self.writer.i32_le(small);
                }
                Err(_) => self.write_long(value.into()),
            },
        }
    }

    /// `LONG1` with the shortest two's complement encoding.
    pub fn write_long(&mut self, value: i128) {
        let bytes = long_bytes(value);
        self.writer.u8(op::LONG1);
        self.writer.u8(bytes.len() as u8);
        self.writer.buf(&bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.writer.u8(op::BINUNICODE);
        self.writer.u32_le(s.len() as u32);
        self.writer.buf(s.as_bytes());
    }

    pub fn write_bytes(&mut self, b: &[u8]) {
        match u8::try_from(b.len()) {
            Ok(len) => {
                self.writer.u8(op::SHORT_BINBYTES);
                self.writer.u8(len);
            }
            Err(_) => {
                self.writer.u8(op::BINBYTES);
                self.writer.u32_le(b.len() as u32);
            }
        }
        self.writer.buf(b);
    }

    pub fn write_global(&mut self, module: &str, name: &str) {
        self.writer.u8(op::GLOBAL);
        self.writer.buf(module.as_bytes());
        self.writer.u8(b'\n');
        self.writer.buf(name.as_bytes());
        self.writer.u8(b'\n');
    }

    fn write_list(&mut self, items: &[PickleValue]) {
        self.writer.u8(op::EMPTY_LIST);
        match items {
            [] => {}
            [item] => {
                self.write_any(item);
                self.writer.u8(op::APPEND);
            }
            _ => {
                self.writer.u8(op::MARK);
                for item in items {
                    self.write_any(item);
                }
                self.writer.u8(op::APPENDS);
            }
        }
    }

    fn write_tuple(&mut self, items: &[PickleValue]) {
        if items.is_empty() {
            self.writer.u8(op::EMPTY_TUPLE);
            return;
        }
        if items.len() > 3 {
            self.writer.u8(op::MARK);
        }
        for item in items {
            self.write_any(item);
        }
        self.writer.u8(match items.len() {
            1 => op::TUPLE1,
            2 => op::TUPLE2,
            3 => op::TUPLE3,
            _ => op::TUPLE,
        });
    }

    fn write_dict(&mut self, pairs: &[(PickleValue, PickleValue)]) {
        self.writer.u8(op::EMPTY_DICT);
        if pairs.is_empty() {
            return;
        }
        self.writer.u8(op::MARK);
        for (key, value) in pairs {
            self.write_any(key);
            self.write_any(value);
        }
        self.writer.u8(op::SETITEMS);
    }

    /// Protocol 3 has no set opcodes: `set([items])`.
    fn write_set(&mut self, class: &str, items: &[PickleValue]) {
        self.write_global("builtins", class);
        self.write_list(items);
        self.writer.u8(op::TUPLE1);
        self.writer.u8(op::REDUCE);
    }

    /// `numpy.dtype(descr, False, True)` followed by its `__setstate__`.
    fn write_dtype(&mut self, dtype: &Dtype) {
        self.write_global("numpy", "dtype");
        self.write_str(&dtype.descr());
        self.writer.u8(op::NEWFALSE);
        self.writer.u8(op::NEWTRUE);
        self.writer.u8(op::TUPLE3);
        self.writer.u8(op::REDUCE);

        self.writer.u8(op::MARK);
        self.write_int(3);
        self.write_str(dtype.byte_order_char());
        for _ in 0..3 {
            self.writer.u8(op::NONE);
        }
        self.write_int(-1);
        self.write_int(-1);
        self.write_int(if dtype.kind == ElementKind::Object { 63 } else { 0 });
        self.writer.u8(op::TUPLE);
        self.writer.u8(op::BUILD);
    }

    /// `_reconstruct(ndarray, (0,), b'b')` followed by
    /// `__setstate__((1, shape, dtype, False, payload))`.
    fn write_array(&mut self, array: &NdArray) {
        let dtype = storage_dtype(array.dtype);
        self.write_global("numpy.core.multiarray", "_reconstruct");
        self.write_global("numpy", "ndarray");
        self.write_tuple(&[PickleValue::Int(0)]);
        self.write_bytes(b"b");
        self.writer.u8(op::TUPLE3);
        self.writer.u8(op::REDUCE);

        self.writer.u8(op::MARK);
        self.write_int(1);
        let shape: Vec<PickleValue> = array
            .shape
            .iter()
            .map(|dim| PickleValue::Int(*dim as i64))
            .collect();
        self.write_tuple(&shape);
        self.write_dtype(&dtype);
        self.writer.u8(op::NEWFALSE);
        match &array.data {
            ArrayData::Object(items) => self.write_list(items),
            data => self.write_bytes(&element_bytes(&dtype, data)),
        }
        self.writer.u8(op::TUPLE);
        self.writer.u8(op::BUILD);
    }

    fn write_scalar(&mut self, scalar: &NdScalar) {
        let dtype = storage_dtype(scalar.dtype);
        self.write_global("numpy.core.multiarray", "scalar");
        self.write_dtype(&dtype);
        let data = match &scalar.value {
            ScalarValue::Bool(b) => ArrayData::Bool(vec![*b]),
            ScalarValue::Int(i) => ArrayData::Int(vec![*i]),
            ScalarValue::UInt(u) => ArrayData::UInt(vec![*u]),
            ScalarValue::Float(f) => ArrayData::Float(vec![*f]),
            ScalarValue::Str(s) => ArrayData::Str(vec![s.clone()]),
        };
        self.write_bytes(&element_bytes(&dtype, &data));
        self.writer.u8(op::TUPLE2);
        self.writer.u8(op::REDUCE);
    }
}

/// Half floats are written as `float64`.
fn storage_dtype(dtype: Dtype) -> Dtype {
    if dtype.kind == ElementKind::Float && dtype.size == 2 {
        Dtype {
            size: 8,
            order: ByteOrder::Little,
            ..dtype
        }
    } else {
        dtype
    }
}

fn element_bytes(dtype: &Dtype, data: &ArrayData) -> Vec<u8> {
    if let ArrayData::Str(items) = data {
        return text_bytes(dtype, items);
    }
    let mut out = Vec::with_capacity(data.len() * dtype.size);
    let mut push = |le: &[u8]| {
        let item = &le[..dtype.size];
        if dtype.order == ByteOrder::Big {
            out.extend(item.iter().rev());
        } else {
            out.extend_from_slice(item);
        }
    };
    match data {
        ArrayData::Bool(v) => v.iter().for_each(|b| push(&[u8::from(*b)])),
        ArrayData::Int(v) => v.iter().for_each(|i| push(&i.to_le_bytes())),
        ArrayData::UInt(v) => v.iter().for_each(|u| push(&u.to_le_bytes())),
        ArrayData::Float(v) => v.iter().for_each(|f| {
            if dtype.size == 4 {
                push(&(*f as f32).to_le_bytes())
            } else {
                push(&f.to_le_bytes())
            }
        }),
        ArrayData::Str(_) | ArrayData::Object(_) => {}
    }
    out
}

/// UCS-4 units, NUL-padded or cut to the declared character count.
fn text_bytes(dtype: &Dtype, items: &[String]) -> Vec<u8> {
    let mut out = Vec::with_capacity(items.len() * dtype.size);
    for item in items {
        let units = item.chars().map(u32::from).chain(std::iter::repeat(0));
        for unit in units.take(dtype.size / 4) {
            match dtype.order {
                ByteOrder::Big => out.extend_from_slice(&unit.to_be_bytes()),
                _ => out.extend_from_slice(&unit.to_le_bytes()),
            }
        }
    }
    out
}

fn long_bytes(value: i128) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let bytes = value.to_le_bytes();
    let mut len = bytes.len();
    while len > 1 {
        let top = bytes[len - 1];
        let next_negative = bytes[len - 2] & 0x80 != 0;
        let redundant = (top == 0x00 && !next_negative) || (top == 0xff && next_negative);
        if !redundant {
            break;
        }
        len -= 1;
    }
    bytes[..len].to_vec()
}
