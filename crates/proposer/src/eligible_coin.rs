//! A winning staking ticket.

use unite_primitives::amount::Amount;
use unite_primitives::buf::Buf32;
use unite_primitives::difficulty::Difficulty;
use unite_primitives::params::{Height, Time};
use unite_staking::coin::Coin;

/// A coin that won the kernel lottery for a particular slot, together
/// with everything needed to build the block around it.
#[derive(Clone, Debug)]
pub struct EligibleCoin {
    pub coin: Coin,

    /// The kernel hash that met the weighted target.
    pub kernel_hash: Buf32,

    /// The immediate block reward for the target height.
    pub reward: Amount,

    pub target_height: Height,

    /// The masked timestamp of the slot that was searched.
    pub target_time: Time,

    pub target_difficulty: Difficulty,
}
