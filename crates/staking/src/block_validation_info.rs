//! Memoization of block validation stages.
//!
//! Validation entry points are idempotent; a shared
//! `BlockValidationInfo` lets the different callers of the validator
//! (net processing, the proposer resubmitting its own block, reorg
//! handling) run each invariant only once per block.

use crate::validation_result::BlockValidationResult;

/// Tri-state memo for one validation stage.
#[derive(Clone, Debug, Default)]
enum Stage {
    #[default]
    Unknown,
    Done(BlockValidationResult),
}

#[derive(Clone, Debug, Default)]
pub struct BlockValidationInfo {
    check_block_header: Stage,
    contextual_check_block_header: Stage,
    check_block: Stage,
    contextual_check_block: Stage,
    check_stake: Stage,
}

macro_rules! stage_accessors {
    ($get:ident, $set:ident, $field:ident) => {
        pub fn $get(&self) -> Option<&BlockValidationResult> {
            match &self.$field {
                Stage::Unknown => None,
                Stage::Done(result) => Some(result),
            }
        }

        pub fn $set(&mut self, result: BlockValidationResult) {
            self.$field = Stage::Done(result);
        }
    };
}

impl BlockValidationInfo {
    pub fn new() -> Self {
        Self::default()
    }

    stage_accessors!(check_block_header_result, set_check_block_header, check_block_header);
    stage_accessors!(
        contextual_check_block_header_result,
        set_contextual_check_block_header,
        contextual_check_block_header
    );
    stage_accessors!(check_block_result, set_check_block, check_block);
    stage_accessors!(
        contextual_check_block_result,
        set_contextual_check_block,
        contextual_check_block
    );
    stage_accessors!(check_stake_result, set_check_stake, check_stake);

    /// Whether every performed stage passed so far.
    pub fn all_valid_so_far(&self) -> bool {
        [
            &self.check_block_header,
            &self.contextual_check_block_header,
            &self.check_block,
            &self.contextual_check_block,
            &self.check_stake,
        ]
        .into_iter()
        .all(|stage| match stage {
            Stage::Unknown => true,
            Stage::Done(result) => result.is_valid(),
        })
    }
}
