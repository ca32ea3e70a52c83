//! Staking-side validation: the read-only chain view, stakeable coins,
//! the proof-of-stake kernel, and the structural block/reward checks.

pub mod active_chain;
pub mod block_reward_validator;
pub mod block_validation_info;
pub mod block_validator;
pub mod coin;
pub mod proof_of_stake;
pub mod stake_validator;
pub mod validation_result;

pub use active_chain::{ActiveChain, BlockIndexMap, Network, SyncStatus};
pub use block_reward_validator::{BlockRewardError, BlockRewardValidator, FinalizationRewardLogic};
pub use block_validation_info::BlockValidationInfo;
pub use block_validator::BlockValidator;
pub use coin::Coin;
pub use stake_validator::StakeValidator;
pub use validation_result::{BlockValidationError, BlockValidationResult};
