//! Structural block validation.
//!
//! Everything here is stateless with respect to the chain: contextual
//! checks take the relevant ancestor entries as arguments. All entry
//! points are idempotent and can be memoized through a
//! [`BlockValidationInfo`].

use std::collections::HashSet;
use std::sync::Arc;

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SECP256K1};

use unite_primitives::buf::Buf32;
use unite_primitives::params::{self, Parameters, Time};
use unite_state::block::{Block, BlockHeader, BlockIndex};
use unite_state::transaction::Transaction;

use crate::active_chain::ActiveChain;
use crate::block_validation_info::BlockValidationInfo;
use crate::proof_of_stake;
use crate::validation_result::{BlockValidationError, BlockValidationResult};

/// Number of ancestors considered for the median-time-past rule.
const MEDIAN_TIME_SPAN: usize = 11;

pub struct BlockValidator {
    params: Arc<Parameters>,
}

impl BlockValidator {
    pub fn new(params: Arc<Parameters>) -> Self {
        Self { params }
    }

    /// Context-free header checks: the block time must sit on the
    /// staking timestamp grid.
    pub fn check_block_header(
        &self,
        header: &BlockHeader,
        info: Option<&mut BlockValidationInfo>,
    ) -> BlockValidationResult {
        if let Some(info) = &info {
            if let Some(result) = info.check_block_header_result() {
                return result.clone();
            }
        }
        let mut result = BlockValidationResult::ok();
        if params::masked_timestamp(&self.params, header.time) != header.time {
            result.add_error(BlockValidationError::InvalidBlockTime);
        }
        if let Some(info) = info {
            info.set_check_block_header(result.clone());
        }
        result
    }

    /// Header checks against the chain: previous block linkage and the
    /// time window between median-time-past and the adjusted time.
    pub fn contextual_check_block_header(
        &self,
        header: &BlockHeader,
        previous_block: &BlockIndex,
        chain: &dyn ActiveChain,
        adjusted_time: Time,
        info: Option<&mut BlockValidationInfo>,
    ) -> BlockValidationResult {
        if let Some(info) = &info {
            if let Some(result) = info.contextual_check_block_header_result() {
                return result.clone();
            }
        }
        let mut result = BlockValidationResult::ok();
        if header.prev_block_hash != previous_block.block_hash {
            result.add_error(BlockValidationError::PreviousBlockDoesntMatch);
        }
        if header.time <= median_time_past(previous_block, chain) {
            result.add_error(BlockValidationError::BlocktimeTooEarly);
        }
        if header.time > adjusted_time + self.params.max_future_block_time_seconds {
            result.add_error(BlockValidationError::BlocktimeTooFarIntoFuture);
        }
        if let Some(info) = info {
            info.set_contextual_check_block_header(result.clone());
        }
        result
    }

    /// Context-free checks of a complete block.
    pub fn check_block(
        &self,
        block: &Block,
        info: Option<&mut BlockValidationInfo>,
    ) -> BlockValidationResult {
        if let Some(info) = &info {
            if let Some(result) = info.check_block_result() {
                return result.clone();
            }
        }
        let mut result = self.check_block_header(&block.header, None);

        if block.vtx.is_empty() {
            result.add_error(BlockValidationError::NoTransactions);
            return self.memoize_check_block(result, info);
        }

        if block.vtx[0].is_coinbase() {
            result.combine(self.check_coinbase_transaction(&block.vtx[0]));
        } else {
            result.add_error(BlockValidationError::FirstTransactionNotACoinbaseTransaction);
        }
        for tx in &block.vtx[1..] {
            if tx.is_coinbase() {
                result.add_error(BlockValidationError::CoinbaseTransactionAtPositionOtherThanFirst);
            }
        }

        self.check_transactions(block, &mut result);
        self.check_merkle_roots(block, &mut result);
        result.combine(self.check_block_signature(block));

        // The genesis block has no previous block to stake, so there is
        // no staking input and no key to sign with.
        if block.header.prev_block_hash.is_zero() {
            result.remove_error(BlockValidationError::NoStakingInput);
            result.remove_error(BlockValidationError::InvalidBlockPublicKey);
            result.remove_error(BlockValidationError::BlockSignatureVerificationFailed);
        }

        self.memoize_check_block(result, info)
    }

    fn memoize_check_block(
        &self,
        result: BlockValidationResult,
        info: Option<&mut BlockValidationInfo>,
    ) -> BlockValidationResult {
        if let Some(info) = info {
            info.set_check_block(result.clone());
        }
        result
    }

    /// Block checks against its predecessor: the height committed in
    /// the meta input must be the successor height.
    pub fn contextual_check_block(
        &self,
        block: &Block,
        previous_block: &BlockIndex,
        info: Option<&mut BlockValidationInfo>,
    ) -> BlockValidationResult {
        if let Some(info) = &info {
            if let Some(result) = info.contextual_check_block_result() {
                return result.clone();
            }
        }
        let mut result = BlockValidationResult::ok();
        if let Some(coinbase) = block.vtx.first() {
            if let Some(meta) = coinbase.vin.first() {
                if let Ok((height, _)) = meta.script_sig.parse_meta_input() {
                    if height != previous_block.height + 1 {
                        result.add_error(BlockValidationError::InvalidBlockHeight);
                    }
                }
            }
        }
        if let Some(info) = info {
            info.set_contextual_check_block(result.clone());
        }
        result
    }

    /// A well-formed coinbase transaction has the meta input first, a
    /// staking input second, and at least one output.
    fn check_coinbase_transaction(&self, tx: &Transaction) -> BlockValidationResult {
        let mut result = BlockValidationResult::ok();
        match tx.vin.first() {
            None => {
                result.add_error(BlockValidationError::NoMetaInput);
            }
            Some(meta) => result.combine(self.check_coinbase_meta_input(meta)),
        }
        if tx.vin.len() < 2 {
            result.add_error(BlockValidationError::NoStakingInput);
        }
        if tx.vout.is_empty() {
            result.add_error(BlockValidationError::CoinbaseTransactionWithoutOutput);
        }
        result
    }

    /// The meta input encodes the block height followed by the 32-byte
    /// snapshot hash.
    fn check_coinbase_meta_input(
        &self,
        meta: &unite_state::transaction::TxIn,
    ) -> BlockValidationResult {
        let mut result = BlockValidationResult::ok();
        match meta.script_sig.parse_meta_input() {
            Ok((height, snapshot_hash)) => {
                result.height = Some(height);
                result.snapshot_hash = Some(snapshot_hash);
            }
            Err(unite_state::script::ScriptError::NumberOutOfRange) => {
                result.add_error(BlockValidationError::InvalidBlockHeight);
                result.add_error(BlockValidationError::NoSnapshotHash);
            }
            Err(_) => {
                result.add_error(BlockValidationError::NoBlockHeight);
                result.add_error(BlockValidationError::NoSnapshotHash);
            }
        }
        result
    }

    /// Duplicate transactions, duplicate inputs within a transaction,
    /// and the lexicographic ordering of non-coinbase transactions.
    fn check_transactions(&self, block: &Block, result: &mut BlockValidationResult) {
        let mut seen_txids = HashSet::new();
        for tx in &block.vtx {
            if !seen_txids.insert(tx.txid()) {
                result.add_error(BlockValidationError::DuplicateTransaction);
            }
            let mut seen_inputs = HashSet::new();
            for input in &tx.vin {
                if !input.prevout.is_null() && !seen_inputs.insert(input.prevout) {
                    result.add_error(BlockValidationError::InvalidTransactionDuplicateInputs);
                }
            }
        }
        let ordered = block.vtx[1..].windows(2).all(|w| w[0].txid() <= w[1].txid());
        if !ordered {
            result.add_error(BlockValidationError::InvalidTransactionOrdering);
        }
    }

    fn check_merkle_roots(&self, block: &Block, result: &mut BlockValidationResult) {
        let merkle = block.merkle_root();
        if merkle.root != block.header.merkle_root {
            result.add_error(BlockValidationError::MerkleRootMismatch);
        }
        if merkle.mutated {
            result.add_error(BlockValidationError::MerkleRootDuplicateTransactions);
        }

        let witness = block.witness_merkle_root();
        if witness.root != block.header.witness_merkle_root {
            result.add_error(BlockValidationError::WitnessMerkleRootMismatch);
        }
        if witness.mutated {
            result.add_error(BlockValidationError::WitnessMerkleRootDuplicateTransactions);
        }

        let commits = block.finalizer_commits_merkle_root();
        if commits.root != block.header.finalizer_commits_merkle_root {
            result.add_error(BlockValidationError::FinalizerCommitsMerkleRootMismatch);
        }
    }

    /// The proposer signature must verify against one of the keys that
    /// lock the staking input.
    fn check_block_signature(&self, block: &Block) -> BlockValidationResult {
        let mut result = BlockValidationResult::ok();
        let keys = proof_of_stake::extract_block_signing_keys_from_block(block);
        if keys.is_empty() {
            result.add_error(BlockValidationError::InvalidBlockPublicKey);
            return result;
        }
        if !verify_block_signature(&block.hash(), &block.signature, &keys) {
            result.add_error(BlockValidationError::BlockSignatureVerificationFailed);
        }
        result
    }
}

fn verify_block_signature(
    block_hash: &Buf32,
    signature: &[u8],
    keys: &[proof_of_stake::SigningKey],
) -> bool {
    let Ok(signature) = Signature::from_compact(signature) else {
        return false;
    };
    let message = Message::from_digest(block_hash.0);
    keys.iter().any(|key| {
        PublicKey::from_slice(key)
            .is_ok_and(|key| SECP256K1.verify_ecdsa(&message, &signature, &key).is_ok())
    })
}

/// Median of the previous blocks' timestamps, walking back from (and
/// including) the given block.
fn median_time_past(index: &BlockIndex, chain: &dyn ActiveChain) -> Time {
    let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
    let mut walk = Some(index.clone());
    while let Some(current) = walk {
        times.push(current.time);
        if times.len() == MEDIAN_TIME_SPAN {
            break;
        }
        walk = current
            .prev_hash
            .and_then(|hash| chain.get_block_index(&hash))
            .map(|arc| (*arc).clone());
    }
    times.sort_unstable();
    times[times.len() / 2]
}
