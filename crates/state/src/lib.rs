//! Chain data model for the Unit-e finalization core: scripts,
//! transactions, blocks, votes, validators and the finalization state
//! data itself. Everything here is plain data with borsh encodings;
//! the rules that act on it live in the sibling crates.

pub mod admin;
pub mod block;
pub mod checkpoint;
pub mod data;
pub mod script;
pub mod transaction;
pub mod validator;
pub mod vote;

pub mod prelude {
    pub use crate::admin::{AdminCommand, AdminState};
    pub use crate::block::{Block, BlockHeader, BlockIndex};
    pub use crate::checkpoint::Checkpoint;
    pub use crate::data::FinalizationStateData;
    pub use crate::script::{Script, ScriptKind, Witness};
    pub use crate::transaction::{OutPoint, Transaction, TxIn, TxOut, TxPayload, TxType};
    pub use crate::validator::{Validator, DEFAULT_END_DYNASTY};
    pub use crate::vote::{Vote, VoteRecord};
}
