//! Binary buffer reader with cursor tracking.

use std::str;

use crate::BufferError;

/// A binary buffer reader that reads data from a byte slice.
///
/// The reader maintains a cursor position. Every read is bounds-checked and
/// fails with [`BufferError::EndOfBuffer`] instead of panicking, leaving the
/// cursor where it was.
///
/// Pickle mixes byte orders: length prefixes and integer opcodes are
/// little-endian while `BINFLOAT` is big-endian, so both flavors are exposed.
///
/// # Example
///
/// ```
/// use unpickle_buffers::Reader;
///
/// let data = [0x01, 0x00, 0x00, 0x00, 0xff];
/// let mut reader = Reader::new(&data);
///
/// assert_eq!(reader.u32_le().unwrap(), 1);
/// assert_eq!(reader.u8().unwrap(), 0xff);
/// ```
pub struct Reader<'a> {
    /// The underlying byte slice.
    pub uint8: &'a [u8],
    /// Current cursor position.
    pub x: usize,
}

impl<'a> Reader<'a> {
    /// Creates a new reader for the given byte slice.
    pub fn new(uint8: &'a [u8]) -> Self {
        Self { uint8, x: 0 }
    }

    /// Returns a subarray of the given size and advances the cursor.
    pub fn buf(&mut self, size: usize) -> Result<&'a [u8], BufferError> {
        let x = self.x;
        let end = x
            .checked_add(size)
            .filter(|end| *end <= self.uint8.len())
            .ok_or(BufferError::EndOfBuffer {
                offset: x,
                wanted: size,
            })?;
        self.x = end;
        Ok(&self.uint8[x..end])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let bytes = self.buf(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Reads an unsigned 8-bit integer.
    #[inline]
    pub fn u8(&mut self) -> Result<u8, BufferError> {
        Ok(self.array::<1>()?[0])
    }

    /// Reads an unsigned 16-bit integer (little-endian).
    #[inline]
    pub fn u16_le(&mut self) -> Result<u16, BufferError> {
        self.array().map(u16::from_le_bytes)
    }

    /// Reads an unsigned 32-bit integer (little-endian).
    #[inline]
    pub fn u32_le(&mut self) -> Result<u32, BufferError> {
        self.array().map(u32::from_le_bytes)
    }

    /// Reads a signed 32-bit integer (little-endian).
    #[inline]
    pub fn i32_le(&mut self) -> Result<i32, BufferError> {
        self.array().map(i32::from_le_bytes)
    }

    /// Reads an unsigned 64-bit integer (little-endian).
    #[inline]
    pub fn u64_le(&mut self) -> Result<u64, BufferError> {
        self.array().map(u64::from_le_bytes)
    }

    /// Reads a 64-bit floating point number (big-endian).
    #[inline]
    pub fn f64_be(&mut self) -> Result<f64, BufferError> {
        self.array().map(f64::from_be_bytes)
    }

    /// Reads a UTF-8 string of the given size.
    pub fn utf8(&mut self, size: usize) -> Result<&'a str, BufferError> {
        let offset = self.x;
        let bytes = self.buf(size)?;
        str::from_utf8(bytes).map_err(|_| {
            self.x = offset;
            BufferError::InvalidUtf8 { offset }
        })
    }

    /// Reads bytes up to the next `\n`, consuming the newline but not
    /// returning it.
    pub fn line(&mut self) -> Result<&'a [u8], BufferError> {
        let uint8 = self.uint8;
        let rest = &uint8[self.x..];
        let len = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or(BufferError::EndOfBuffer {
                offset: self.x,
                wanted: rest.len() + 1,
            })?;
        let line = &rest[..len];
        self.x += len + 1;
        Ok(line)
    }
}
