//! Bit-field helpers shared by cache geometry and paging.

/// width of every address handled by the cache engine
pub const ADDRESS_WIDTH: u32 = 32;

#[inline]
pub const fn is_pow2(v: u64) -> bool {
    v != 0 && v & (v - 1) == 0
}

/// exact base-2 logarithm; `None` unless `v` is a positive power of two.
/// ```
/// use memsim::bits::log2_exact;
///
/// assert_eq!(log2_exact(4096), Some(12));
/// assert_eq!(log2_exact(1), Some(0));
/// assert_eq!(log2_exact(48), None);
/// assert_eq!(log2_exact(0), None);
/// ```
#[inline]
pub const fn log2_exact(v: u64) -> Option<u32> {
    if is_pow2(v) {
        Some(v.trailing_zeros())
    } else {
        None
    }
}

/// mask with the lowest `width` bits set.
#[inline]
pub const fn bit_range_lower(width: u32) -> u64 {
    if width >= u64::BITS {
        u64::MAX
    } else {
        (1 << width) - 1
    }
}

#[inline]
pub const fn mask_lower(bin: u64, width: u32) -> u64 {
    bin & bit_range_lower(width)
}

/// `width` bits of `bin` starting at bit `start`.
#[inline]
pub const fn extract(bin: u64, start: u32, width: u32) -> u64 {
    mask_lower(shr(bin, start), width)
}

/// logical shift right that yields 0 instead of overflowing.
#[inline]
pub const fn shr(bin: u64, amount: u32) -> u64 {
    if amount >= u64::BITS {
        0
    } else {
        bin >> amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_range_lower() {
        assert_eq!(0, bit_range_lower(0));
        assert_eq!(0b1111, bit_range_lower(4));
        assert_eq!(u64::MAX, bit_range_lower(64));
    }
    #[test]
    fn test_extract() {
        // 5000 = 0b1_0011_1000_1000
        assert_eq!(904, extract(5000, 0, 12));
        assert_eq!(1, extract(5000, 12, 4));
        assert_eq!(0, extract(5000, 64, 4));
    }
    #[test]
    fn test_pow2() {
        assert!(is_pow2(1));
        assert!(is_pow2(1 << 31));
        assert!(!is_pow2(0));
        assert!(!is_pow2(24));
    }
}
