//! Persistence for finalization states, keyed by block hash.

mod errors;
mod state_db;

pub use errors::{DbError, DbResult};
pub use state_db::{InMemoryStateDb, SledStateDb, StateDb};
