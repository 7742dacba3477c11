//! Morton (Z-order) keys for 2D coordinates.
//!
//! The bits of `x` go to the even positions of the key and the bits of `y` to the
//! odd positions. Nearby points tend to get nearby keys, with the usual jumps at
//! power-of-two boundaries.

use crate::error::{CjdbError, Result};

/// Coordinates are multiplied by this factor and truncated before encoding, which
/// keeps two decimal digits.
pub const QUANTIZATION: f64 = 100.0;

fn part1by1(n: u32) -> u64 {
    let mut n = n as u64;
    n = (n | (n << 16)) & 0x0000_FFFF_0000_FFFF;
    n = (n | (n << 8)) & 0x00FF_00FF_00FF_00FF;
    n = (n | (n << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
    n = (n | (n << 2)) & 0x3333_3333_3333_3333;
    n = (n | (n << 1)) & 0x5555_5555_5555_5555;
    n
}

fn unpart1by1(n: u64) -> u32 {
    let mut n = n & 0x5555_5555_5555_5555;
    n = (n ^ (n >> 1)) & 0x3333_3333_3333_3333;
    n = (n ^ (n >> 2)) & 0x0F0F_0F0F_0F0F_0F0F;
    n = (n ^ (n >> 4)) & 0x00FF_00FF_00FF_00FF;
    n = (n ^ (n >> 8)) & 0x0000_FFFF_0000_FFFF;
    n = (n ^ (n >> 16)) & 0x0000_0000_FFFF_FFFF;
    n as u32
}

/// Interleave two integers into one Morton key.
///
/// # Examples
///
/// ```
/// use cjdb::tiling::morton::{deinterleave, interleave};
///
/// let key = interleave(9666325, 43971894);
/// assert_eq!(deinterleave(key), (9666325, 43971894));
/// ```
#[inline]
pub fn interleave(x: u32, y: u32) -> u64 {
    part1by1(x) | (part1by1(y) << 1)
}

/// Split a Morton key back into its two integers.
#[inline]
pub fn deinterleave(key: u64) -> (u32, u32) {
    (unpart1by1(key), unpart1by1(key >> 1))
}

/// Negative values wrap to their 32-bit two's complement, so they sort after
/// every non-negative value and do not survive [`rev_morton_code`].
fn quantize(value: f64, axis: &str) -> Result<u32> {
    let scaled = (value * QUANTIZATION).trunc();
    if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > u32::MAX as f64 {
        return Err(CjdbError::InvalidInput(format!(
            "{axis}={value} cannot be quantized into a 32-bit Morton coordinate"
        )));
    }
    Ok(scaled as i64 as u32)
}

/// Morton key of a coordinate, quantized to two decimal digits.
///
/// Keys round-trip through [`rev_morton_code`] for non-negative coordinates.
///
/// # Errors
///
/// Returns [`CjdbError::InvalidInput`] when a quantized coordinate is not finite
/// or does not fit in 32 bits.
pub fn morton_code(x: f64, y: f64) -> Result<u64> {
    Ok(interleave(quantize(x, "x")?, quantize(y, "y")?))
}

/// The quantized coordinate a Morton key was built from.
pub fn rev_morton_code(key: u64) -> (f64, f64) {
    let (x, y) = deinterleave(key);
    (x as f64 / QUANTIZATION, y as f64 / QUANTIZATION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interleave_small_values() {
        assert_eq!(interleave(0, 0), 0);
        assert_eq!(interleave(1, 0), 0b01);
        assert_eq!(interleave(0, 1), 0b10);
        assert_eq!(interleave(3, 3), 0b1111);
        assert_eq!(interleave(2, 1), 0b1010);
    }

    #[test]
    fn test_roundtrip_integers() {
        for (x, y) in [
            (0, 0),
            (1, 2),
            (9666325, 43971894),
            (u32::MAX, 0),
            (0, u32::MAX),
            (u32::MAX, u32::MAX),
            (0xDEAD_BEEF, 0x1234_5678),
        ] {
            assert_eq!(deinterleave(interleave(x, y)), (x, y));
        }
    }

    #[test]
    fn test_roundtrip_quantized_coordinate() {
        let key = morton_code(252914.232, 608211.603).unwrap();
        let (x, y) = rev_morton_code(key);
        assert!((x - 252914.232).abs() < 0.01);
        assert!((y - 608211.603).abs() < 0.01);
    }

    #[test]
    fn test_locality_within_quadrant() {
        // The four cells of one 2x2 block get consecutive keys.
        let keys: Vec<u64> = [(0, 0), (1, 0), (0, 1), (1, 1)]
            .iter()
            .map(|&(x, y)| interleave(x, y))
            .collect();
        assert_eq!(keys, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_negative_coordinates_wrap() {
        let key = morton_code(0.0, -0.01).unwrap();
        assert_eq!(deinterleave(key), (0, u32::MAX));
        assert!(key > morton_code(0.0, 1000.0).unwrap());
    }

    #[test]
    fn test_rejects_unrepresentable_coordinates() {
        assert!(morton_code(-3.0e7, 0.0).is_err());
        assert!(morton_code(0.0, f64::NAN).is_err());
        assert!(morton_code(f64::INFINITY, 0.0).is_err());
        assert!(morton_code(1.0e9, 0.0).is_err());
    }
}
