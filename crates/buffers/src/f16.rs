//! Half-precision (16-bit) floating point decoding.

/// Decodes a half-precision (16-bit) floating point value.
///
/// The input is the raw bit pattern of an IEEE 754 binary16 value, as stored
/// in NumPy `float16` arrays. Every binary16 value is exactly representable
/// as an `f64`.
///
/// # Example
///
/// ```
/// use unpickle_buffers::decode_f16;
///
/// assert_eq!(decode_f16(0x3C00), 1.0);
/// assert_eq!(decode_f16(0xC000), -2.0);
/// assert_eq!(decode_f16(0x7BFF), 65504.0);
/// assert!(decode_f16(0x7C00).is_infinite());
/// assert!(decode_f16(0x7E00).is_nan());
/// ```
pub fn decode_f16(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = i32::from((bits >> 10) & 0x1f);
    let mantissa = f64::from(bits & 0x03ff);
    match exponent {
        0 => sign * mantissa * 2f64.powi(-24),
        0x1f if mantissa == 0.0 => sign * f64::INFINITY,
        0x1f => f64::NAN,
        _ => sign * (1024.0 + mantissa) * 2f64.powi(exponent - 25),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_f16_zeroes() {
        assert_eq!(decode_f16(0x0000), 0.0);
        assert!(decode_f16(0x0000).is_sign_positive());
        assert!(decode_f16(0x8000).is_sign_negative());
    }

    #[test]
    fn test_decode_f16_normals() {
        assert_eq!(decode_f16(0x3C00), 1.0);
        assert_eq!(decode_f16(0xBC00), -1.0);
        assert_eq!(decode_f16(0x3800), 0.5);
        assert_eq!(decode_f16(0x4248), 3.140625);
        assert_eq!(decode_f16(0x0400), 2f64.powi(-14));
    }

    #[test]
    fn test_decode_f16_subnormals() {
        assert_eq!(decode_f16(0x0001), 2f64.powi(-24));
        assert_eq!(decode_f16(0x03FF), 1023.0 * 2f64.powi(-24));
    }

    #[test]
    fn test_decode_f16_specials() {
        assert_eq!(decode_f16(0x7C00), f64::INFINITY);
        assert_eq!(decode_f16(0xFC00), f64::NEG_INFINITY);
        assert!(decode_f16(0x7C01).is_nan());
        assert!(decode_f16(0xFE00).is_nan());
    }
}
