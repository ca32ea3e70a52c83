//! Compact-form difficulty targets and the weighted-target arithmetic
//! used by the proof-of-stake kernel check.

use ethnum::U256;

use crate::amount::Amount;
use crate::buf::Buf32;

/// Compact-form ("nBits") difficulty as carried in block headers.
pub type Difficulty = u32;

/// Expands a compact-form difficulty into a 256-bit target.
///
/// Returns `None` for encodings that are negative, zero or overflow
/// 256 bits; such a block can never be valid.
pub fn expand_compact(bits: Difficulty) -> Option<U256> {
    let exponent = (bits >> 24) as u32;
    let mantissa = bits & 0x007f_ffff;
    if mantissa == 0 || bits & 0x0080_0000 != 0 {
        return None;
    }
    let overflows = exponent > 34
        || (mantissa > 0xff && exponent > 33)
        || (mantissa > 0xffff && exponent > 32);
    if overflows {
        return None;
    }
    let target = if exponent <= 3 {
        U256::from(mantissa >> (8 * (3 - exponent)))
    } else {
        U256::from(mantissa) << (8 * (exponent - 3))
    };
    if target == U256::ZERO {
        None
    } else {
        Some(target)
    }
}

/// Compresses a 256-bit target into compact form.
pub fn compress_target(target: U256) -> Difficulty {
    let bits = 256 - target.leading_zeros();
    let mut exponent = (bits + 7) / 8;
    let mut mantissa = if exponent <= 3 {
        (target.as_u32()) << (8 * (3 - exponent))
    } else {
        (target >> (8 * (exponent - 3))).as_u32()
    };
    // The mantissa is signed in the compact encoding; shift out the sign bit.
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }
    mantissa | (exponent << 24)
}

/// Interprets a hash as a 256-bit big-endian integer.
pub fn hash_to_uint(hash: &Buf32) -> U256 {
    U256::from_be_bytes(hash.0)
}

/// The per-coin target: the block target weighted by the staked amount.
///
/// Saturates at the maximum representable target so that very large
/// stakes cannot wrap around into tiny targets.
pub fn weighted_target(target: U256, stake: Amount) -> U256 {
    let stake = U256::from(stake.max(0) as u64);
    target.checked_mul(stake).unwrap_or(U256::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_genesis_bits() {
        // The classic 0x1d00ffff: 0xffff << 208.
        let target = expand_compact(0x1d00ffff).unwrap();
        assert_eq!(target, U256::from(0xffffu32) << 208);
        assert_eq!(compress_target(target), 0x1d00ffff);
    }

    #[test]
    fn test_expand_rejects_degenerate() {
        assert_eq!(expand_compact(0), None);
        assert_eq!(expand_compact(0x00800000), None);
        // Negative sign bit set.
        assert_eq!(expand_compact(0x1d80ffff), None);
        // Overflows 256 bits.
        assert_eq!(expand_compact(0xff00ffff), None);
    }

    #[test]
    fn test_compress_small_target() {
        let target = U256::from(0x12u32);
        assert_eq!(expand_compact(compress_target(target)).unwrap(), target);
    }

    #[test]
    fn test_weighted_target_scales_with_stake() {
        let target = expand_compact(0x1d00ffff).unwrap();
        assert_eq!(weighted_target(target, 2), target * U256::from(2u8));
        assert_eq!(weighted_target(U256::MAX, i64::MAX), U256::MAX);
    }
}
