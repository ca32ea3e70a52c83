//! Fork-aware coordination of finalization states: the repository of
//! per-block states, the processor advancing it on new blocks and
//! commits, the process-wide vote recorder, the snapshot index and the
//! commits exchange.

pub mod commits;
pub mod errors;
pub mod processor;
pub mod repository;
pub mod snapshot;
pub mod vote_recorder;

pub use errors::ProcessError;
pub use processor::StateProcessor;
pub use repository::StateRepository;
pub use snapshot::SnapshotIndex;
pub use vote_recorder::{SlashingListener, VoteRecorder};
