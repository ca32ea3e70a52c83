//! The finalization state database.
//!
//! Key: 32-byte block hash. Value: versioned encoding of the
//! [`FinalizationState`] after that block. The database holds the
//! states the repository wants to survive a restart; on startup the
//! repository decides between loading the tip state (pruning) and
//! replaying the chain.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use unite_finality::FinalizationState;
use unite_primitives::buf::Buf32;
use unite_primitives::params::{Epoch, Height, Parameters};
use unite_state::block::BlockIndex;
use unite_staking::{ActiveChain, BlockIndexMap};

use crate::errors::{DbError, DbResult};

pub trait StateDb: Send + Sync {
    /// Writes a batch of states atomically.
    fn save(&self, states: &HashMap<Buf32, FinalizationState>) -> DbResult<()>;

    /// Loads every stored state whose block is known to the index map.
    fn load_all(
        &self,
        block_index_map: &dyn BlockIndexMap,
    ) -> DbResult<HashMap<Buf32, FinalizationState>>;

    /// Loads the state stored for one block, if any.
    fn load_for(&self, block_index: &BlockIndex) -> DbResult<Option<FinalizationState>>;

    /// Walks the active chain down from the tip until a persisted state
    /// is found and reports its last finalized epoch.
    fn find_last_finalized_epoch(&self, chain: &dyn ActiveChain) -> DbResult<Option<Epoch>>;

    /// Loads the states of all blocks whose fork origin on the active
    /// chain is above the given height.
    fn load_states_higher_than(
        &self,
        height: Height,
        chain: &dyn ActiveChain,
        block_index_map: &dyn BlockIndexMap,
    ) -> DbResult<HashMap<Buf32, FinalizationState>>;

    /// Drops everything (used by `-reindex`).
    fn wipe(&self) -> DbResult<()>;
}

/// Sled-backed implementation.
pub struct SledStateDb {
    params: Arc<Parameters>,
    db: sled::Db,
}

impl SledStateDb {
    pub fn open(path: &Path, params: Arc<Parameters>, wipe: bool) -> DbResult<Self> {
        let db = sled::open(path)?;
        let this = Self { params, db };
        if wipe {
            this.wipe()?;
        }
        Ok(this)
    }

    /// A temporary database for tests and `-regtest` runs.
    pub fn in_memory(params: Arc<Parameters>) -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { params, db })
    }

    fn decode_entry(&self, hash: Buf32, bytes: &[u8]) -> DbResult<FinalizationState> {
        FinalizationState::decode(self.params.clone(), bytes)
            .map_err(|err| DbError::CorruptedState(hash, err))
    }

    fn get(&self, hash: &Buf32) -> DbResult<Option<FinalizationState>> {
        match self.db.get(hash.as_slice())? {
            Some(bytes) => Ok(Some(self.decode_entry(*hash, &bytes)?)),
            None => Ok(None),
        }
    }
}

impl StateDb for SledStateDb {
    fn save(&self, states: &HashMap<Buf32, FinalizationState>) -> DbResult<()> {
        let mut batch = sled::Batch::default();
        for (hash, state) in states {
            batch.insert(hash.as_slice(), state.encode());
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        debug!(count = states.len(), "saved finalization states");
        Ok(())
    }

    fn load_all(
        &self,
        block_index_map: &dyn BlockIndexMap,
    ) -> DbResult<HashMap<Buf32, FinalizationState>> {
        let mut states = HashMap::new();
        for entry in self.db.iter() {
            let (key, value) = entry?;
            let hash = Buf32::from_slice(&key).ok_or(DbError::MalformedKey)?;
            if block_index_map.lookup(&hash).is_none() {
                return Err(DbError::UnknownBlock(hash));
            }
            states.insert(hash, self.decode_entry(hash, &value)?);
        }
        Ok(states)
    }

    fn load_for(&self, block_index: &BlockIndex) -> DbResult<Option<FinalizationState>> {
        self.get(&block_index.block_hash)
    }

    fn find_last_finalized_epoch(&self, chain: &dyn ActiveChain) -> DbResult<Option<Epoch>> {
        let mut walk = chain.tip();
        while let Some(index) = walk {
            if let Some(state) = self.get(&index.block_hash)? {
                return Ok(Some(state.last_finalized_epoch()));
            }
            walk = index.prev_hash.and_then(|h| chain.get_block_index(&h));
        }
        Ok(None)
    }

    fn load_states_higher_than(
        &self,
        height: Height,
        chain: &dyn ActiveChain,
        block_index_map: &dyn BlockIndexMap,
    ) -> DbResult<HashMap<Buf32, FinalizationState>> {
        let mut states = HashMap::new();
        let mut failure = None;
        block_index_map.for_each(&mut |hash, index| {
            if failure.is_some() {
                return;
            }
            let origin_height = match chain.find_fork_origin(index) {
                Some(origin) => origin.height,
                None => {
                    warn!(block = %hash, "block index with no path to the active chain");
                    return;
                }
            };
            if origin_height <= height {
                return;
            }
            match self.get(hash) {
                Ok(Some(state)) => {
                    states.insert(*hash, state);
                }
                Ok(None) => {}
                Err(err) => failure = Some(err),
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(states),
        }
    }

    fn wipe(&self) -> DbResult<()> {
        self.db.clear()?;
        self.db.flush()?;
        Ok(())
    }
}

/// Plain in-memory implementation for tests of components that only
/// need the interface.
#[derive(Default)]
pub struct InMemoryStateDb {
    params: Option<Arc<Parameters>>,
    entries: Mutex<HashMap<Buf32, Vec<u8>>>,
}

impl InMemoryStateDb {
    pub fn new(params: Arc<Parameters>) -> Self {
        Self {
            params: Some(params),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn decode(&self, hash: Buf32, bytes: &[u8]) -> DbResult<FinalizationState> {
        let params = self.params.clone().expect("constructed with parameters");
        FinalizationState::decode(params, bytes).map_err(|err| DbError::CorruptedState(hash, err))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl StateDb for InMemoryStateDb {
    fn save(&self, states: &HashMap<Buf32, FinalizationState>) -> DbResult<()> {
        let mut entries = self.entries.lock();
        for (hash, state) in states {
            entries.insert(*hash, state.encode());
        }
        Ok(())
    }

    fn load_all(
        &self,
        block_index_map: &dyn BlockIndexMap,
    ) -> DbResult<HashMap<Buf32, FinalizationState>> {
        let entries = self.entries.lock();
        let mut states = HashMap::new();
        for (hash, bytes) in entries.iter() {
            if block_index_map.lookup(hash).is_none() {
                return Err(DbError::UnknownBlock(*hash));
            }
            states.insert(*hash, self.decode(*hash, bytes)?);
        }
        Ok(states)
    }

    fn load_for(&self, block_index: &BlockIndex) -> DbResult<Option<FinalizationState>> {
        let entries = self.entries.lock();
        entries
            .get(&block_index.block_hash)
            .map(|bytes| self.decode(block_index.block_hash, bytes))
            .transpose()
    }

    fn find_last_finalized_epoch(&self, chain: &dyn ActiveChain) -> DbResult<Option<Epoch>> {
        let mut walk = chain.tip();
        while let Some(index) = walk {
            if let Some(state) = self.load_for(&index)? {
                return Ok(Some(state.last_finalized_epoch()));
            }
            walk = index.prev_hash.and_then(|h| chain.get_block_index(&h));
        }
        Ok(None)
    }

    fn load_states_higher_than(
        &self,
        height: Height,
        chain: &dyn ActiveChain,
        block_index_map: &dyn BlockIndexMap,
    ) -> DbResult<HashMap<Buf32, FinalizationState>> {
        let mut states = HashMap::new();
        block_index_map.for_each(&mut |hash, index| {
            let Some(origin) = chain.find_fork_origin(index) else {
                return;
            };
            if origin.height <= height {
                return;
            }
            let entries = self.entries.lock();
            if let Some(bytes) = entries.get(hash) {
                if let Ok(state) = self.decode(*hash, bytes) {
                    states.insert(*hash, state);
                }
            }
        });
        Ok(states)
    }

    fn wipe(&self) -> DbResult<()> {
        self.entries.lock().clear();
        Ok(())
    }
}
