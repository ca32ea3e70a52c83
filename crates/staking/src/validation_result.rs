//! Block validation errors and the error-set result they accumulate in.

use std::collections::BTreeSet;
use std::fmt;

use unite_primitives::buf::Buf32;
use unite_primitives::params::Height;

/// Everything that can be structurally wrong with a block.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BlockValidationError {
    BlockSignatureVerificationFailed,
    BlocktimeTooEarly,
    BlocktimeTooFarIntoFuture,
    CoinbaseTransactionAtPositionOtherThanFirst,
    CoinbaseTransactionWithoutOutput,
    DuplicateStake,
    DuplicateTransaction,
    FirstTransactionNotACoinbaseTransaction,
    InvalidBlockHeight,
    InvalidBlockPublicKey,
    InvalidBlockTime,
    InvalidTransactionDuplicateInputs,
    InvalidTransactionOrdering,
    MerkleRootDuplicateTransactions,
    MerkleRootMismatch,
    FinalizerCommitsMerkleRootMismatch,
    NoBlockHeight,
    NoMetaInput,
    NoSnapshotHash,
    NoStakingInput,
    NoTransactions,
    PreviousBlockDoesntMatch,
    RemoteStakingInputBiggerThanOutput,
    StakeImmature,
    StakeNotFound,
    StakeNotEligible,
    TransactionInputNotFound,
    WitnessMerkleRootDuplicateTransactions,
    WitnessMerkleRootMismatch,
}

impl BlockValidationError {
    /// Stable wire rejection reason.
    pub fn reject_reason(&self) -> &'static str {
        use BlockValidationError::*;
        match self {
            BlockSignatureVerificationFailed => "bad-blk-signature",
            BlocktimeTooEarly => "time-too-old",
            BlocktimeTooFarIntoFuture => "time-too-new",
            CoinbaseTransactionAtPositionOtherThanFirst => "bad-cb-multiple",
            CoinbaseTransactionWithoutOutput => "bad-cb-no-outputs",
            DuplicateStake => "bad-stake-duplicate",
            DuplicateTransaction => "bad-txns-duplicate",
            FirstTransactionNotACoinbaseTransaction => "bad-cb-missing",
            InvalidBlockHeight => "bad-cb-height",
            InvalidBlockPublicKey => "bad-blk-public-key",
            InvalidBlockTime => "bad-blk-time",
            InvalidTransactionDuplicateInputs => "bad-txns-inputs-duplicate",
            InvalidTransactionOrdering => "bad-txns-ordering",
            MerkleRootDuplicateTransactions => "bad-txns-duplicate",
            MerkleRootMismatch => "bad-txnmrklroot",
            FinalizerCommitsMerkleRootMismatch => "bad-finalizercommits-merkleroot",
            NoBlockHeight => "bad-cb-height-missing",
            NoMetaInput => "bad-cb-meta-input-missing",
            NoSnapshotHash => "bad-cb-snapshot-hash-missing",
            NoStakingInput => "bad-stake-missing",
            NoTransactions => "bad-blk-no-transactions",
            PreviousBlockDoesntMatch => "bad-prevblk",
            RemoteStakingInputBiggerThanOutput => "bad-cb-spends-remote-stake",
            StakeImmature => "bad-stake-immature",
            StakeNotFound => "bad-stake-not-found",
            StakeNotEligible => "bad-stake-not-eligible",
            TransactionInputNotFound => "bad-txns-inputs-missing",
            WitnessMerkleRootDuplicateTransactions => "bad-txns-witness-duplicate",
            WitnessMerkleRootMismatch => "bad-witness-merkle-match",
        }
    }
}

impl fmt::Display for BlockValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.reject_reason())
    }
}

/// Outcome of the structural block checks: the set of violations found
/// plus the values extracted from the coinbase meta input on the way.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockValidationResult {
    pub errors: BTreeSet<BlockValidationError>,
    pub height: Option<Height>,
    pub snapshot_hash: Option<Buf32>,
}

impl BlockValidationResult {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(error: BlockValidationError) -> Self {
        let mut result = Self::default();
        result.errors.insert(error);
        result
    }

    pub fn add_error(&mut self, error: BlockValidationError) {
        self.errors.insert(error);
    }

    pub fn remove_error(&mut self, error: BlockValidationError) {
        self.errors.remove(&error);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, error: BlockValidationError) -> bool {
        self.errors.contains(&error)
    }

    /// Merges another result in, keeping the first extracted values.
    pub fn combine(&mut self, other: BlockValidationResult) {
        self.errors.extend(other.errors);
        if self.height.is_none() {
            self.height = other.height;
        }
        if self.snapshot_hash.is_none() {
            self.snapshot_hash = other.snapshot_hash;
        }
    }

    /// First rejection reason, for wire replies.
    pub fn reject_reason(&self) -> Option<&'static str> {
        self.errors.iter().next().map(|e| e.reject_reason())
    }
}

impl fmt::Display for BlockValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_valid() {
            return f.write_str("valid");
        }
        let mut first = true;
        for error in &self.errors {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{error}")?;
        }
        Ok(())
    }
}
