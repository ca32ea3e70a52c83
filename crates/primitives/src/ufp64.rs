//! Unsigned fixed-point arithmetic with 8 decimal fraction digits.
//!
//! Used for the deposit scale factors and reward/penalty factors of the
//! finalization state. All intermediate math widens to 128 bits so that
//! products of deposit-sized numbers cannot overflow.

use std::fmt;
use std::ops::{Add, Sub};

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Scaling factor: 10^8.
const SCALE: u128 = 100_000_000;

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Arbitrary,
    BorshDeserialize,
    BorshSerialize,
    Deserialize,
    Serialize,
)]
pub struct Ufp64(u64);

impl Ufp64 {
    pub const ZERO: Ufp64 = Ufp64(0);
    pub const ONE: Ufp64 = Ufp64(SCALE as u64);

    /// Constructs from a raw scaled representation (`value × 10^8`).
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }

    pub fn from_uint(value: u64) -> Self {
        Self(value * SCALE as u64)
    }

    /// Truncates towards zero.
    pub fn to_uint(self) -> u64 {
        self.0 / SCALE as u64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn mul(self, other: Ufp64) -> Ufp64 {
        Self((self.0 as u128 * other.0 as u128 / SCALE) as u64)
    }

    pub fn div(self, other: Ufp64) -> Ufp64 {
        Self((self.0 as u128 * SCALE / other.0 as u128) as u64)
    }

    pub fn add_uint(self, value: u64) -> Ufp64 {
        Self(self.0 + value * SCALE as u64)
    }

    pub fn mul_by_uint(self, value: u64) -> Ufp64 {
        Self((self.0 as u128 * value as u128) as u64)
    }

    /// Multiplies by an integer and truncates the result to an integer.
    pub fn mul_to_uint(self, value: u64) -> u64 {
        (self.0 as u128 * value as u128 / SCALE) as u64
    }

    pub fn div_by_uint(self, value: u64) -> Ufp64 {
        Self(self.0 / value)
    }

    /// The ratio of two integers as a fixed-point number.
    pub fn div_2uints(numerator: u64, denominator: u64) -> Ufp64 {
        Self((numerator as u128 * SCALE / denominator as u128) as u64)
    }

    /// Divides an integer by this fixed-point number, truncating.
    pub fn div_uint_by(self, value: u64) -> u64 {
        (value as u128 * SCALE / self.0 as u128) as u64
    }

    /// Square root of an integer, as a fixed-point number.
    pub fn sqrt_uint(value: u64) -> Ufp64 {
        Self(isqrt(value as u128 * SCALE * SCALE) as u64)
    }
}

impl Add for Ufp64 {
    type Output = Ufp64;

    fn add(self, other: Ufp64) -> Ufp64 {
        Ufp64(self.0 + other.0)
    }
}

impl Sub for Ufp64 {
    type Output = Ufp64;

    fn sub(self, other: Ufp64) -> Ufp64 {
        Ufp64(self.0 - other.0)
    }
}

impl fmt::Display for Ufp64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{:08}",
            self.0 / SCALE as u64,
            self.0 % SCALE as u64
        )
    }
}

/// Integer square root by Newton iteration.
fn isqrt(n: u128) -> u128 {
    if n < 2 {
        return n;
    }
    let mut x = 1u128 << ((128 - n.leading_zeros()).div_ceil(2));
    loop {
        let next = (x + n / x) / 2;
        if next >= x {
            return x;
        }
        x = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_roundtrip() {
        let a = Ufp64::div_2uints(3, 4); // 0.75
        let b = Ufp64::from_uint(8);
        assert_eq!(a.mul(b).to_uint(), 6);
        assert_eq!(b.div(a).to_uint(), 10); // 8 / 0.75 = 10.66..
    }

    #[test]
    fn test_sqrt() {
        assert_eq!(Ufp64::sqrt_uint(0), Ufp64::ZERO);
        assert_eq!(Ufp64::sqrt_uint(1), Ufp64::ONE);
        assert_eq!(Ufp64::sqrt_uint(4).to_uint(), 2);
        assert_eq!(Ufp64::sqrt_uint(15_000).to_raw(), 12_247_448_713); // 122.47448713
    }

    #[test]
    fn test_display() {
        assert_eq!(Ufp64::div_2uints(1, 2).to_string(), "0.50000000");
        assert_eq!(Ufp64::from_uint(12).to_string(), "12.00000000");
    }

    #[test]
    fn test_mul_to_uint_truncates() {
        let factor = Ufp64::div_2uints(1, 3);
        assert_eq!(factor.mul_to_uint(10), 3);
    }
}
