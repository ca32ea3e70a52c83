use thiserror::Error;

use unite_primitives::buf::Buf32;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("corrupted state entry for block {0:?}: {1}")]
    CorruptedState(Buf32, std::io::Error),

    #[error("state entry for unknown block {0:?}")]
    UnknownBlock(Buf32),

    #[error("malformed database key")]
    MalformedKey,
}

pub type DbResult<T> = Result<T, DbError>;
