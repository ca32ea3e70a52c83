//! Finalizer records.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

use unite_primitives::buf::{Buf20, Buf32};
use unite_primitives::params::Dynasty;

/// Sentinel for a finalizer that has not logged out.
pub const DEFAULT_END_DYNASTY: Dynasty = Dynasty::MAX;

/// A finalizer as tracked by the finalization state.
///
/// The deposit is stored in scaled units: the effective amount is
/// `deposit × deposit_scale_factor[epoch]`, which lets collective
/// rewards and penalties be applied with a single factor update.
#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct Validator {
    pub address: Buf20,
    pub deposit: u64,
    pub start_dynasty: Dynasty,
    pub end_dynasty: Dynasty,
    pub is_slashed: bool,
    /// Hash of the last finalization transaction seen from this
    /// finalizer; spends of finalizer funds must chain from it.
    pub last_transaction_hash: Buf32,
}

impl Validator {
    pub fn new(address: Buf20, deposit: u64, start_dynasty: Dynasty) -> Self {
        Self {
            address,
            deposit,
            start_dynasty,
            end_dynasty: DEFAULT_END_DYNASTY,
            is_slashed: false,
            last_transaction_hash: Buf32::zero(),
        }
    }

    pub fn is_in_dynasty(&self, dynasty: Dynasty) -> bool {
        self.start_dynasty <= dynasty && dynasty < self.end_dynasty
    }

    pub fn has_logged_out(&self) -> bool {
        self.end_dynasty != DEFAULT_END_DYNASTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynasty_window() {
        let mut v = Validator::new(Buf20::zero(), 100, 2);
        assert!(!v.is_in_dynasty(1));
        assert!(v.is_in_dynasty(2));
        assert!(v.is_in_dynasty(1000));
        assert!(!v.has_logged_out());

        v.end_dynasty = 5;
        assert!(v.has_logged_out());
        assert!(v.is_in_dynasty(4));
        assert!(!v.is_in_dynasty(5));
    }

    #[test]
    fn test_borsh_roundtrip() {
        let mut v = Validator::new(Buf20::new([7; 20]), 12_345, 3);
        v.last_transaction_hash = Buf32::new([9; 32]);
        let enc = borsh::to_vec(&v).unwrap();
        let dec: Validator = borsh::from_slice(&enc).unwrap();
        assert_eq!(v, dec);
    }
}
