//! Network parameters for a unit-e chain.
//!
//! `Parameters` is plain data; behavior derived from it (epoch math,
//! reward schedule lookups, masked timestamps) lives in free functions
//! so the same values serve the state machine, the validators and the
//! proposer without a facade object.

use serde::Deserialize;
use thiserror::Error;

use crate::amount::{Amount, UNIT};
use crate::difficulty::Difficulty;
use crate::ufp64::Ufp64;

pub type Height = u32;
pub type Epoch = u32;
pub type Dynasty = u32;
pub type Depth = u32;
pub type Time = u32;

/// A compressed secp256k1 public key authorized to sign admin commands.
pub type AdminKey = [u8; 33];

/// Number of keys in an admin key set; commands carry a 2-of-3 quorum.
pub const ADMIN_KEY_COUNT: usize = 3;

/// How the per-block reward is derived from the parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RewardFunction {
    /// `reward_schedule[height / period_blocks]`, zero past the schedule.
    Periodic,
}

/// How the difficulty for a block to be proposed is derived.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DifficultyFunction {
    /// A fixed difficulty for the lifetime of the network.
    Constant(Difficulty),
}

/// The defining parameters of a unit-e blockchain network.
#[derive(Clone, Debug)]
pub struct Parameters {
    /// A unique identifier for this network, usually one of "main",
    /// "test" or "regtest".
    pub network_name: String,

    /// Number of blocks per epoch. Epoch 0 contains only the genesis
    /// block; epoch `e >= 1` spans heights `[(e-1)*L + 1, e*L]`.
    pub epoch_length: u32,

    /// Smallest deposit that creates a finalizer.
    pub min_deposit_size: Amount,

    /// Dynasties a finalizer keeps voting after requesting logout.
    pub dynasty_logout_delay: u32,

    /// Epochs between the end of a finalizer's last dynasty and the
    /// epoch its deposit may be withdrawn.
    pub withdrawal_epoch_delay: u32,

    /// Scales the collective punishment of recently slashed deposits.
    pub slash_fraction_multiplier: u32,

    /// The slasher bounty is `deposit / bounty_fraction_denominator`.
    pub bounty_fraction_denominator: u32,

    /// Base factor of the per-epoch interest paid on voting deposits.
    pub base_interest_factor: Ufp64,

    /// Per-epoch escalation of the penalty while finalization stalls.
    pub base_penalty_factor: Ufp64,

    /// The kernel protocol masks timestamps such that a proposer can use
    /// the same stake only once per interval.
    pub block_stake_timestamp_interval_seconds: u32,

    /// Target frequency of blocks.
    pub block_time_seconds: u32,

    /// Maximum allowed drift of a block time past the adjusted time.
    pub max_future_block_time_seconds: u32,

    /// Proposal rewards can be spent only after this many blocks.
    pub coinbase_maturity: Height,

    /// Coins can be staked only this many blocks after confirmation.
    pub stake_maturity: Height,

    /// Amount of premined coins.
    pub initial_supply: Amount,

    /// The maximum amount of money that can ever be in the system.
    /// Invariant: `maximum_supply == initial_supply +
    /// sum(reward_schedule) * period_blocks`.
    pub maximum_supply: Amount,

    /// The base block reward for each period.
    pub reward_schedule: Vec<Amount>,

    /// The period size, in blocks.
    pub period_blocks: u32,

    /// Share of the block reward paid out immediately in the coinbase;
    /// the rest is deferred to the finalization reward outputs.
    pub immediate_reward_fraction: Ufp64,

    pub reward_function: RewardFunction,
    pub difficulty_function: DifficultyFunction,

    /// Admin key set for permissioned deployments. `None` disables
    /// permissioning entirely.
    pub admin_keys: Option<[AdminKey; ADMIN_KEY_COUNT]>,
}

impl Parameters {
    pub fn main_net() -> Parameters {
        Parameters {
            network_name: "main".into(),
            epoch_length: 50,
            min_deposit_size: 10_000 * UNIT,
            dynasty_logout_delay: 700,
            withdrawal_epoch_delay: 15_000,
            slash_fraction_multiplier: 3,
            bounty_fraction_denominator: 25,
            base_interest_factor: Ufp64::from_raw(7_000_000), // 0.07
            base_penalty_factor: Ufp64::from_raw(2),          // 0.00000002
            block_stake_timestamp_interval_seconds: 16,
            block_time_seconds: 16,
            max_future_block_time_seconds: 120,
            coinbase_maturity: 100,
            stake_maturity: 200,
            initial_supply: 1_500_000_000 * UNIT,
            maximum_supply: 0, // filled below
            reward_schedule: vec![
                375 * UNIT / 100, // 3.75
                170 * UNIT / 100,
                80 * UNIT / 100,
                37 * UNIT / 100,
            ],
            period_blocks: 1_971_000,
            immediate_reward_fraction: Ufp64::div_2uints(1, 10),
            reward_function: RewardFunction::Periodic,
            difficulty_function: DifficultyFunction::Constant(0x1d00ffff),
            admin_keys: None,
        }
        .with_computed_supply()
    }

    pub fn test_net() -> Parameters {
        let mut p = Parameters::main_net();
        p.network_name = "test".into();
        p.coinbase_maturity = 10;
        p.stake_maturity = 20;
        p.with_computed_supply()
    }

    pub fn reg_test() -> Parameters {
        let mut p = Parameters::main_net();
        p.network_name = "regtest".into();
        p.epoch_length = 5;
        p.min_deposit_size = 1_500 * UNIT;
        p.dynasty_logout_delay = 2;
        p.withdrawal_epoch_delay = 5;
        p.coinbase_maturity = 1;
        p.stake_maturity = 2;
        p.difficulty_function = DifficultyFunction::Constant(0x207fffff);
        p.with_computed_supply()
    }

    fn with_computed_supply(mut self) -> Parameters {
        let emitted: i128 = self
            .reward_schedule
            .iter()
            .map(|r| *r as i128 * self.period_blocks as i128)
            .sum();
        self.maximum_supply = self.initial_supply + emitted as Amount;
        self
    }
}

/// Error loading custom chain parameters.
#[derive(Debug, Error)]
pub enum ParametersError {
    #[error("malformed custom parameters: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("supply invariant violated: maximum_supply {maximum_supply} != initial_supply {initial_supply} + scheduled emission {emitted}")]
    SupplyInvariant {
        maximum_supply: Amount,
        initial_supply: Amount,
        emitted: Amount,
    },

    #[error("epoch_length must be positive")]
    ZeroEpochLength,
}

/// Partial override of [`Parameters`], as read from a
/// `-customchainparams` JSON file. Absent keys keep the base value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParametersOverride {
    pub epoch_length: Option<u32>,
    pub min_deposit_size: Option<Amount>,
    pub dynasty_logout_delay: Option<u32>,
    pub withdrawal_epoch_delay: Option<u32>,
    pub slash_fraction_multiplier: Option<u32>,
    pub bounty_fraction_denominator: Option<u32>,
    pub block_stake_timestamp_interval_seconds: Option<u32>,
    pub block_time_seconds: Option<u32>,
    pub max_future_block_time_seconds: Option<u32>,
    pub coinbase_maturity: Option<Height>,
    pub stake_maturity: Option<Height>,
    pub initial_supply: Option<Amount>,
    pub maximum_supply: Option<Amount>,
    pub reward_schedule: Option<Vec<Amount>>,
    pub period_blocks: Option<u32>,
}

/// Applies a JSON override file on top of base parameters.
///
/// The resulting parameter set is re-validated, in particular the
/// supply invariant; a file that breaks it is rejected rather than
/// silently producing a chain that can overflow its own supply.
pub fn from_json(base: Parameters, json: &str) -> Result<Parameters, ParametersError> {
    let ovr: ParametersOverride = serde_json::from_str(json)?;
    let mut p = base;
    macro_rules! apply {
        ($($field:ident),* $(,)?) => {
            $(if let Some(v) = ovr.$field { p.$field = v; })*
        };
    }
    apply!(
        epoch_length,
        min_deposit_size,
        dynasty_logout_delay,
        withdrawal_epoch_delay,
        slash_fraction_multiplier,
        bounty_fraction_denominator,
        block_stake_timestamp_interval_seconds,
        block_time_seconds,
        max_future_block_time_seconds,
        coinbase_maturity,
        stake_maturity,
        initial_supply,
        period_blocks,
    );
    if let Some(schedule) = ovr.reward_schedule {
        p.reward_schedule = schedule;
    }
    match ovr.maximum_supply {
        Some(v) => p.maximum_supply = v,
        None => p = p.with_computed_supply(),
    }
    validate(&p)?;
    Ok(p)
}

pub fn validate(p: &Parameters) -> Result<(), ParametersError> {
    if p.epoch_length == 0 {
        return Err(ParametersError::ZeroEpochLength);
    }
    let emitted: i128 = p
        .reward_schedule
        .iter()
        .map(|r| *r as i128 * p.period_blocks as i128)
        .sum();
    if p.maximum_supply as i128 != p.initial_supply as i128 + emitted {
        return Err(ParametersError::SupplyInvariant {
            maximum_supply: p.maximum_supply,
            initial_supply: p.initial_supply,
            emitted: emitted as Amount,
        });
    }
    Ok(())
}

/// The epoch a block height belongs to.
pub fn epoch_of(p: &Parameters, height: Height) -> Epoch {
    if height == 0 {
        0
    } else {
        (height - 1) / p.epoch_length + 1
    }
}

/// Height of the first block of an epoch.
pub fn epoch_start_height(p: &Parameters, epoch: Epoch) -> Height {
    if epoch == 0 {
        0
    } else {
        (epoch - 1) * p.epoch_length + 1
    }
}

/// Height of the checkpoint (last block) of an epoch.
pub fn epoch_checkpoint_height(p: &Parameters, epoch: Epoch) -> Height {
    epoch * p.epoch_length
}

/// Whether a block at this height is the first block of its epoch.
pub fn is_epoch_start(p: &Parameters, height: Height) -> bool {
    height > 0 && height % p.epoch_length == 1 % p.epoch_length
}

/// Block time rounded down to the staking timestamp grid.
pub fn masked_timestamp(p: &Parameters, time: Time) -> Time {
    time - time % p.block_stake_timestamp_interval_seconds
}

/// The full block reward to be created at the given height.
pub fn block_reward(p: &Parameters, height: Height) -> Amount {
    match p.reward_function {
        RewardFunction::Periodic => {
            let period = (height / p.period_blocks) as usize;
            p.reward_schedule.get(period).copied().unwrap_or(0)
        }
    }
}

/// The reward share paid in the coinbase's first output; the remainder
/// is deferred to the finalization reward outputs.
pub fn immediate_block_reward(p: &Parameters, height: Height) -> Amount {
    p.immediate_reward_fraction
        .mul_to_uint(block_reward(p, height) as u64) as Amount
}

/// Difficulty for a block to be proposed at the given height.
pub fn difficulty_at(p: &Parameters, _height: Height) -> Difficulty {
    match p.difficulty_function {
        DifficultyFunction::Constant(bits) => bits,
    }
}

/// Node-local settings consumed by the core (as opposed to consensus
/// parameters agreed by the network).
#[derive(Clone, Debug)]
pub struct Settings {
    pub node_is_proposer: bool,

    /// Minimum size of the coinbase outputs returning staked principal.
    pub stake_split_threshold: Amount,

    /// Cap on the total amount of combined stake inputs; zero disables
    /// combining limits.
    pub stake_combine_maximum: Amount,

    /// Key hash the block reward is sent to; `None` returns it to the
    /// staking script.
    pub reward_address: Option<crate::buf::Buf20>,

    /// Wipe and rebuild the finalization state database on startup.
    pub reindex: bool,

    /// Whether the node runs in pruning mode (restores only the tip
    /// state instead of replaying the chain).
    pub prune_mode: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            node_is_proposer: true,
            stake_split_threshold: 0,
            stake_combine_maximum: 0,
            reward_address: None,
            reindex: false,
            prune_mode: false,
        }
    }
}
