//! Latin-1 text helpers.
//!
//! Protocol 0-2 pickles carry raw bytes as text: byte `n` is code point `n`.

/// Decodes bytes as Latin-1, mapping every byte to the code point of the
/// same value.
///
/// # Example
///
/// ```
/// use unpickle_buffers::latin1_decode;
///
/// assert_eq!(latin1_decode(b"abc"), "abc");
/// assert_eq!(latin1_decode(&[0xe9]), "\u{e9}");
/// ```
pub fn latin1_decode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| char::from(*b)).collect()
}

/// Encodes a string as Latin-1.
///
/// Returns `None` if any character lies above U+00FF.
///
/// # Example
///
/// ```
/// use unpickle_buffers::latin1_encode;
///
/// assert_eq!(latin1_encode("\u{0}\u{ff}"), Some(vec![0x00, 0xff]));
/// assert_eq!(latin1_encode("\u{100}"), None);
/// ```
pub fn latin1_encode(s: &str) -> Option<Vec<u8>> {
    s.chars().map(|c| u8::try_from(u32::from(c)).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_roundtrip_all_bytes() {
        let bytes: Vec<u8> = (0..=255).collect();
        let text = latin1_decode(&bytes);
        assert_eq!(text.chars().count(), 256);
        assert_eq!(latin1_encode(&text), Some(bytes));
    }

    #[test]
    fn test_latin1_encode_rejects_wide_chars() {
        assert_eq!(latin1_encode("ok"), Some(b"ok".to_vec()));
        assert_eq!(latin1_encode("€"), None);
    }
}
