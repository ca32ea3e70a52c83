//! The raw data of a finalization state.
//!
//! Split off from the state machine so storage and equality checks can
//! treat the state as plain data. All maps are ordered so the borsh
//! encoding of equal states is byte-identical.

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

use unite_primitives::buf::{Buf20, Buf32};
use unite_primitives::params::{Dynasty, Epoch};
use unite_primitives::ufp64::Ufp64;

use crate::admin::AdminState;
use crate::checkpoint::Checkpoint;
use crate::validator::Validator;

#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct FinalizationStateData {
    /// Checkpoints indexed by epoch, append-only.
    pub checkpoints: Vec<Checkpoint>,

    pub validators: BTreeMap<Buf20, Validator>,

    pub current_epoch: Epoch,
    pub current_dynasty: Dynasty,
    pub last_justified_epoch: Epoch,
    pub last_finalized_epoch: Epoch,

    /// Source epoch recommended votes should use for the rest of the
    /// current epoch.
    pub expected_source_epoch: Epoch,

    /// First epoch of each started dynasty.
    pub dynasty_start_epoch: BTreeMap<Dynasty, Epoch>,

    /// Pending scaled deposit changes taking effect at dynasty starts.
    pub dynasty_deltas: BTreeMap<Dynasty, i64>,

    /// Scaled deposit totals of the current and previous dynasties.
    pub total_cur_dyn_deposits: u64,
    pub total_prev_dyn_deposits: u64,

    pub deposit_scale_factor: BTreeMap<Epoch, Ufp64>,
    pub total_slashed: BTreeMap<Epoch, u64>,

    pub reward_factor: Ufp64,
    pub last_voter_rescale: Ufp64,
    pub last_non_voter_rescale: Ufp64,

    /// Checkpoint hash votes in the current epoch must target.
    pub recommended_target_hash: Buf32,
    pub recommended_target_epoch: Epoch,

    pub admin: Option<AdminState>,
}

impl FinalizationStateData {
    /// The pristine state at genesis: epoch 0 exists and counts as both
    /// justified and finalized, the scale factor starts at one.
    pub fn genesis(admin: Option<AdminState>) -> Self {
        let genesis_checkpoint = Checkpoint {
            is_justified: true,
            is_finalized: true,
            ..Checkpoint::default()
        };
        let mut deposit_scale_factor = BTreeMap::new();
        deposit_scale_factor.insert(0, Ufp64::ONE);
        let mut total_slashed = BTreeMap::new();
        total_slashed.insert(0, 0);
        let mut dynasty_start_epoch = BTreeMap::new();
        dynasty_start_epoch.insert(0, 0);

        Self {
            checkpoints: vec![genesis_checkpoint],
            validators: BTreeMap::new(),
            current_epoch: 0,
            current_dynasty: 0,
            last_justified_epoch: 0,
            last_finalized_epoch: 0,
            expected_source_epoch: 0,
            dynasty_start_epoch,
            dynasty_deltas: BTreeMap::new(),
            total_cur_dyn_deposits: 0,
            total_prev_dyn_deposits: 0,
            deposit_scale_factor,
            total_slashed,
            reward_factor: Ufp64::ZERO,
            last_voter_rescale: Ufp64::ONE,
            last_non_voter_rescale: Ufp64::ONE,
            recommended_target_hash: Buf32::zero(),
            recommended_target_epoch: 0,
            admin,
        }
    }
}
