//! The per-wallet block proposal loop and its collaborators: eligible
//! stake search, block assembly and the wallet-facing traits.

pub mod block_builder;
pub mod eligible_coin;
pub mod logic;
pub mod proposer;
pub mod waiter;
pub mod wallet;

pub use block_builder::BlockBuilder;
pub use eligible_coin::EligibleCoin;
pub use logic::ProposerLogic;
pub use proposer::Proposer;
pub use waiter::Waiter;
pub use wallet::{
    MultiWallet, PickTransactionsResult, ProposerStatus, StakingWallet, TransactionPicker,
};
