//! Finalizer votes.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

use unite_primitives::buf::{Buf20, Buf32};
use unite_primitives::hash;
use unite_primitives::params::Epoch;

/// A finalizer's vote for a checkpoint.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Arbitrary,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct Vote {
    pub validator_address: Buf20,
    pub target_hash: Buf32,
    pub source_epoch: Epoch,
    pub target_epoch: Epoch,
}

impl Vote {
    pub fn hash(&self) -> Buf32 {
        hash::compute_borsh_hash(self)
    }

    /// Double vote: same target epoch, different target hash.
    pub fn is_double_vote(&self, other: &Vote) -> bool {
        self.validator_address == other.validator_address
            && self.target_epoch == other.target_epoch
            && self.target_hash != other.target_hash
    }

    /// Surround vote: one vote's span strictly contains the other's.
    pub fn is_surround_vote(&self, other: &Vote) -> bool {
        self.validator_address == other.validator_address
            && ((self.source_epoch < other.source_epoch && other.target_epoch < self.target_epoch)
                || (other.source_epoch < self.source_epoch
                    && self.target_epoch < other.target_epoch))
    }

    pub fn is_slashable_with(&self, other: &Vote) -> bool {
        self != other && (self.is_double_vote(other) || self.is_surround_vote(other))
    }
}

/// A vote together with the transaction that carried it, as kept by the
/// vote recorder and attached to slashing events.
#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct VoteRecord {
    pub vote: Vote,
    pub tx_hash: Buf32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(addr: u8, source: Epoch, target: Epoch, hash: u8) -> Vote {
        Vote {
            validator_address: Buf20::new([addr; 20]),
            target_hash: Buf32::new([hash; 32]),
            source_epoch: source,
            target_epoch: target,
        }
    }

    #[test]
    fn test_double_vote() {
        let a = vote(1, 5, 10, 1);
        let b = vote(1, 7, 10, 2);
        assert!(a.is_double_vote(&b));
        assert!(a.is_slashable_with(&b));
        // Different validators never conflict.
        assert!(!a.is_double_vote(&vote(2, 7, 10, 2)));
        // Same hash is the same vote, not a double vote.
        assert!(!a.is_double_vote(&vote(1, 5, 10, 1)));
    }

    #[test]
    fn test_surround_vote_is_symmetric() {
        let outer = vote(1, 1, 10, 1);
        let inner = vote(1, 2, 9, 2);
        assert!(outer.is_surround_vote(&inner));
        assert!(inner.is_surround_vote(&outer));
        assert!(outer.is_slashable_with(&inner));
    }

    #[test]
    fn test_touching_spans_are_not_surrounds() {
        let a = vote(1, 3, 10, 1);
        let b = vote(1, 3, 9, 2);
        assert!(!a.is_surround_vote(&b));
        let c = vote(1, 2, 10, 3);
        assert!(!a.is_surround_vote(&c));
    }

    #[test]
    fn test_equal_votes_not_slashable() {
        let a = vote(1, 3, 10, 1);
        assert!(!a.is_slashable_with(&a.clone()));
    }
}
