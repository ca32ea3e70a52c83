//! The finalization state machine: a deterministic function of
//! (parameters, previous state, block contents) that tracks finalizer
//! deposits, epoch checkpoints, justification, finalization, slashing,
//! rewards and dynasty transitions.

mod result;
mod state;

pub use result::ValidationError;
pub use state::{FinalizationState, InitStatus, STATE_ENCODING_VERSION};
