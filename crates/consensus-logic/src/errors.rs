use thiserror::Error;

use unite_primitives::buf::Buf32;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no state for parent of block {0:?}")]
    MissingParentState(Buf32),

    #[error("block {0:?} not found in the index")]
    UnknownBlock(Buf32),

    #[error("block {0:?} cannot be read from disk")]
    UnreadableBlock(Buf32),

    #[error("database error: {0}")]
    Db(#[from] unite_db::DbError),
}
