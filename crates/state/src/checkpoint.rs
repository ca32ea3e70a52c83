//! Per-epoch checkpoints.

use std::collections::{BTreeMap, BTreeSet};

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

use unite_primitives::buf::Buf20;
use unite_primitives::params::Epoch;

/// Voting bookkeeping for one epoch's checkpoint.
///
/// Vote weight is tallied separately for current- and previous-dynasty
/// membership and keyed by the source epoch of the vote, so votes built
/// on conflicting sources can never pool their weight towards the 2/3
/// threshold. The justification flags are monotone: once set they stay.
#[derive(
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Arbitrary,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct Checkpoint {
    pub is_justified: bool,
    pub is_finalized: bool,

    /// Finalizers that voted for this checkpoint.
    pub voted: BTreeSet<Buf20>,

    /// Scaled vote weight from current-dynasty finalizers, per source
    /// epoch.
    pub cur_dynasty_votes: BTreeMap<Epoch, u64>,

    /// Scaled vote weight from previous-dynasty finalizers, per source
    /// epoch.
    pub prev_dynasty_votes: BTreeMap<Epoch, u64>,
}

impl Checkpoint {
    pub fn cur_dynasty_votes(&self, source_epoch: Epoch) -> u64 {
        self.cur_dynasty_votes
            .get(&source_epoch)
            .copied()
            .unwrap_or(0)
    }

    pub fn prev_dynasty_votes(&self, source_epoch: Epoch) -> u64 {
        self.prev_dynasty_votes
            .get(&source_epoch)
            .copied()
            .unwrap_or(0)
    }
}
