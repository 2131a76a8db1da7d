//! Auto-growing binary buffer writer.

/// Appends binary data to an in-memory buffer.
///
/// # Example
///
/// ```
/// use unpickle_buffers::Writer;
///
/// let mut writer = Writer::new();
/// writer.u8(b'K');
/// writer.u32_le(7);
/// assert_eq!(writer.flush(), vec![b'K', 7, 0, 0, 0]);
/// assert_eq!(writer.flush(), Vec::<u8>::new());
/// ```
#[derive(Debug, Default)]
pub struct Writer {
    uint8: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards everything written so far.
    pub fn reset(&mut self) {
        self.uint8.clear();
    }

    /// Takes the written bytes, leaving the writer empty.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.uint8)
    }

    pub fn u8(&mut self, value: u8) {
        self.uint8.push(value);
    }

    pub fn u16_le(&mut self, value: u16) {
        self.uint8.extend_from_slice(&value.to_le_bytes());
    }

    pub fn u32_le(&mut self, value: u32) {
        self.uint8.extend_from_slice(&value.to_le_bytes());
    }

    pub fn i32_le(&mut self, value: i32) {
        self.uint8.extend_from_slice(&value.to_le_bytes());
    }

    pub fn f64_be(&mut self, value: f64) {
        self.uint8.extend_from_slice(&value.to_be_bytes());
    }

    /// Appends raw bytes.
    pub fn buf(&mut self, data: &[u8]) {
        self.uint8.extend_from_slice(data);
    }
}
