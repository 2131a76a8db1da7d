//! NumPy dtype descriptors and element decoding.

use unpickle_buffers::decode_f16;

use crate::value::{ArrayData, ScalarValue};
use crate::PickleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Bool,
    Int,
    UInt,
    Float,
    /// Fixed-width UCS-4 text, NumPy's `U<n>`.
    Str,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
    /// Single-byte and object types, spelled `|` by NumPy.
    NotApplicable,
}

/// The subset of NumPy dtypes whose elements map onto plain numbers or text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtype {
    pub kind: ElementKind,
    /// Item size in bytes. Four per character for [`ElementKind::Str`].
    pub size: usize,
    pub order: ByteOrder,
}

impl Dtype {
    /// Parses an array-protocol type string such as `<f8`, `|b1`, `i4`, `<U5`
    /// or `O8`. The number after `U` counts characters, not bytes.
    ///
    /// A missing or `=` byte-order prefix means native order, which is taken to
    /// be little-endian: NumPy records the real order in the dtype state, and
    /// [`Dtype::set_byte_order`] applies it.
    pub fn parse(descr: &str) -> Result<Self, PickleError> {
        let unsupported = || PickleError::UnsupportedDtype(descr.to_string());
        let (order, rest) = match descr.as_bytes().first() {
            Some(b'<') | Some(b'=') => (Some(ByteOrder::Little), &descr[1..]),
            Some(b'>') => (Some(ByteOrder::Big), &descr[1..]),
            Some(b'|') => (Some(ByteOrder::NotApplicable), &descr[1..]),
            _ => (None, descr),
        };
        let mut chars = rest.chars();
        let kind = match chars.next() {
            Some('b') | Some('?') => ElementKind::Bool,
            Some('i') => ElementKind::Int,
            Some('u') => ElementKind::UInt,
            Some('f') => ElementKind::Float,
            Some('U') => ElementKind::Str,
            Some('O') => ElementKind::Object,
            _ => return Err(unsupported()),
        };
        let digits = chars.as_str();
        let size = if digits.is_empty() {
            match kind {
                ElementKind::Bool => 1,
                ElementKind::Object => 8,
                _ => return Err(unsupported()),
            }
        } else {
            let count = digits.parse::<usize>().map_err(|_| unsupported())?;
            match kind {
                ElementKind::Str => count.checked_mul(4).ok_or_else(unsupported)?,
                _ => count,
            }
        };
        let valid = match kind {
            ElementKind::Bool => size == 1,
            ElementKind::Int | ElementKind::UInt => matches!(size, 1 | 2 | 4 | 8),
            ElementKind::Float => matches!(size, 2 | 4 | 8),
            ElementKind::Str => size > 0,
            ElementKind::Object => matches!(size, 4 | 8),
        };
        if !valid {
            return Err(unsupported());
        }
        let order = match order {
            _ if size == 1 || kind == ElementKind::Object => ByteOrder::NotApplicable,
            Some(order) => order,
            None => ByteOrder::Little,
        };
        Ok(Self { kind, size, order })
    }

    /// Applies the byte-order character stored in a pickled dtype state.
    pub fn set_byte_order(&mut self, order: &str) -> Result<(), PickleError> {
        if self.size == 1 || self.kind == ElementKind::Object {
            return Ok(());
        }
        self.order = match order {
            "<" | "=" => ByteOrder::Little,
            ">" => ByteOrder::Big,
            "|" => ByteOrder::NotApplicable,
            _ => return Err(PickleError::UnsupportedDtype(format!("byte order {order}"))),
        };
        Ok(())
    }

    /// NumPy's name for the dtype, e.g. `float32` or `uint8`.
    pub fn name(&self) -> String {
        let bits = self.size * 8;
        match self.kind {
            ElementKind::Bool => "bool".to_string(),
            ElementKind::Int => format!("int{bits}"),
            ElementKind::UInt => format!("uint{bits}"),
            ElementKind::Float => format!("float{bits}"),
            ElementKind::Str => format!("str{bits}"),
            ElementKind::Object => "object".to_string(),
        }
    }

    /// The type string NumPy uses when pickling, without byte order.
    pub fn descr(&self) -> String {
        match self.kind {
            ElementKind::Bool => "b1".to_string(),
            ElementKind::Int => format!("i{}", self.size),
            ElementKind::UInt => format!("u{}", self.size),
            ElementKind::Float => format!("f{}", self.size),
            ElementKind::Str => format!("U{}", self.size / 4),
            ElementKind::Object => format!("O{}", self.size),
        }
    }

    /// The byte-order character NumPy stores in the dtype state.
    pub fn byte_order_char(&self) -> &'static str {
        match self.order {
            ByteOrder::Little => "<",
            ByteOrder::Big => ">",
            ByteOrder::NotApplicable => "|",
        }
    }

    /// Decodes a raw element buffer.
    pub fn decode_elements(&self, bytes: &[u8]) -> Result<ArrayData, PickleError> {
        if bytes.len() % self.size != 0 {
            return Err(PickleError::ArrayPayloadSize {
                len: bytes.len(),
                itemsize: self.size,
            });
        }
        let items = bytes.chunks_exact(self.size);
        Ok(match self.kind {
            ElementKind::Bool => ArrayData::Bool(items.map(|b| b[0] != 0).collect()),
            ElementKind::Int => ArrayData::Int(items.map(|b| self.signed(b)).collect()),
            ElementKind::UInt => ArrayData::UInt(items.map(|b| self.unsigned(b)).collect()),
            ElementKind::Float => ArrayData::Float(items.map(|b| self.float(b)).collect()),
            ElementKind::Str => ArrayData::Str(items.map(|b| self.text(b)).collect::<Result<_, _>>()?),
            ElementKind::Object => {
                return Err(PickleError::UnsupportedDtype(
                    "object array with a raw byte payload".to_string(),
                ))
            }
        })
    }

    /// Decodes the single element of a NumPy scalar.
    pub fn decode_scalar(&self, bytes: &[u8]) -> Result<ScalarValue, PickleError> {
        if bytes.len() != self.size {
            return Err(PickleError::ArrayPayloadSize {
                len: bytes.len(),
                itemsize: self.size,
            });
        }
        Ok(match self.kind {
            ElementKind::Bool => ScalarValue::Bool(bytes[0] != 0),
            ElementKind::Int => ScalarValue::Int(self.signed(bytes)),
            ElementKind::UInt => ScalarValue::UInt(self.unsigned(bytes)),
            ElementKind::Float => ScalarValue::Float(self.float(bytes)),
            ElementKind::Str => ScalarValue::Str(self.text(bytes)?),
            ElementKind::Object => {
                return Err(PickleError::UnsupportedDtype("object scalar".to_string()))
            }
        })
    }

    fn unsigned(&self, item: &[u8]) -> u64 {
        let mut buf = [0u8; 8];
        match self.order {
            ByteOrder::Big => {
                buf[8 - item.len()..].copy_from_slice(item);
                u64::from_be_bytes(buf)
            }
            _ => {
                buf[..item.len()].copy_from_slice(item);
                u64::from_le_bytes(buf)
            }
        }
    }

    fn signed(&self, item: &[u8]) -> i64 {
        let shift = 64 - 8 * item.len() as u32;
        // Sign-extend by moving the item's top bit into bit 63 and back.
        ((self.unsigned(item) << shift) as i64) >> shift
    }

    /// UCS-4 code units; NumPy pads short strings with trailing NULs.
    fn text(&self, item: &[u8]) -> Result<String, PickleError> {
        let mut text: String = item
            .chunks_exact(4)
            .map(|unit| {
                let code = self.unsigned(unit) as u32;
                char::from_u32(code).ok_or(PickleError::InvalidCodePoint(code))
            })
            .collect::<Result<_, _>>()?;
        let len = text.trim_end_matches('\0').len();
        text.truncate(len);
        Ok(text)
    }

    fn float(&self, item: &[u8]) -> f64 {
        let bits = self.unsigned(item);
        match item.len() {
            2 => decode_f16(bits as u16),
            4 => f64::from(f32::from_bits(bits as u32)),
            _ => f64::from_bits(bits),
        }
    }
}
