//! The finalizer-commits exchange (`GETCOMMITS` / `COMMITS`).
//!
//! A syncing node asks for the finalization transactions of a span of
//! blocks; the server walks its active chain from the most recent
//! finalized hash the requester knows and replies with per-block
//! header-and-commits bundles. The transport itself is external; this
//! module implements the locator walk, the response assembly and the
//! checks (with DoS scores) applied to incoming responses.

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;
use tracing::debug;

use unite_finality::FinalizationState;
use unite_primitives::buf::Buf32;
use unite_staking::ActiveChain;
use unite_state::block::{BlockHeader, BlockIndex};
use unite_state::transaction::Transaction;

/// Which blocks the requester wants commits for.
///
/// `start` is a list of block hashes the requester already has, the
/// first of which must be a finalized checkpoint (or genesis); later
/// entries refine where to resume. `stop` bounds the walk; zero means
/// "up to the next finalized checkpoint or the tip".
#[derive(Clone, Debug, Default, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct CommitsLocator {
    pub start: Vec<Buf32>,
    pub stop: Buf32,
}

#[derive(Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct HeaderAndCommits {
    pub header: BlockHeader,
    pub commits: Vec<Transaction>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub enum CommitsStatus {
    /// The walk stopped at `stop` or a finalized checkpoint; more is
    /// available.
    StopOrFinalizedReached,
    /// The server's tip was reached.
    TipReached,
}

#[derive(Clone, Debug, Eq, PartialEq, BorshDeserialize, BorshSerialize)]
pub struct CommitsResponse {
    pub status: CommitsStatus,
    pub data: Vec<HeaderAndCommits>,
}

#[derive(Debug, Error)]
pub enum GetCommitsError {
    #[error("locator start is not a finalized checkpoint")]
    StartNotFinalized,

    #[error("block {0:?} has no data on the main chain")]
    MissingBlockData(Buf32),
}

/// Serves one `GETCOMMITS` request against the active chain and the
/// tip's finalization state.
pub fn process_get_commits(
    chain: &dyn ActiveChain,
    tip_state: &FinalizationState,
    locator: &CommitsLocator,
) -> Result<CommitsResponse, GetCommitsError> {
    let Some(start) = find_most_recent_start(chain, tip_state, locator)? else {
        // Nothing in the locator is known; nothing to send.
        return Ok(CommitsResponse {
            status: CommitsStatus::TipReached,
            data: Vec::new(),
        });
    };
    let stop = find_stop(chain, locator);

    let mut response = CommitsResponse {
        status: CommitsStatus::StopOrFinalizedReached,
        data: Vec::new(),
    };
    let mut height = start.height;
    loop {
        height += 1;
        let Some(index) = chain.at_height(height) else {
            response.status = CommitsStatus::TipReached;
            break;
        };
        response.data.push(header_and_commits(chain, &index)?);
        let is_stop = stop
            .as_ref()
            .is_some_and(|s| s.block_hash == index.block_hash);
        if is_stop || tip_state.is_finalized_checkpoint(index.height) {
            break;
        }
    }
    debug!(
        count = response.data.len(),
        status = ?response.status,
        "assembled commits response"
    );
    Ok(response)
}

/// The highest locator entry usable as the walk start: the first entry
/// must be a finalized checkpoint (or genesis) on the main chain;
/// subsequent entries advance the start while they stay on it.
fn find_most_recent_start(
    chain: &dyn ActiveChain,
    tip_state: &FinalizationState,
    locator: &CommitsLocator,
) -> Result<Option<std::sync::Arc<BlockIndex>>, GetCommitsError> {
    let mut last: Option<std::sync::Arc<BlockIndex>> = None;
    for hash in &locator.start {
        let Some(index) = chain.get_block_index(hash) else {
            if last.is_none() {
                debug!(block = %hash, "locator start not found");
            }
            return Ok(last);
        };
        match &last {
            None => {
                let acceptable = index.is_genesis()
                    || (tip_state.is_finalized_checkpoint(index.height)
                        && chain.contains(&index));
                if !acceptable {
                    return Err(GetCommitsError::StartNotFinalized);
                }
                last = Some(index);
            }
            Some(best) => {
                if index.height > best.height && chain.contains(&index) {
                    last = Some(index);
                } else {
                    break;
                }
            }
        }
    }
    Ok(last)
}

fn find_stop(
    chain: &dyn ActiveChain,
    locator: &CommitsLocator,
) -> Option<std::sync::Arc<BlockIndex>> {
    if locator.stop.is_zero() {
        return None;
    }
    chain.get_block_index(&locator.stop)
}

fn header_and_commits(
    chain: &dyn ActiveChain,
    index: &BlockIndex,
) -> Result<HeaderAndCommits, GetCommitsError> {
    let block = chain
        .read_block(index)
        .ok_or(GetCommitsError::MissingBlockData(index.block_hash))?;
    Ok(HeaderAndCommits {
        header: block.header,
        commits: block.finalizer_commits(),
    })
}

/// Rejection of an incoming `COMMITS` message, with the DoS score to
/// apply to the sender.
#[derive(Debug, Error)]
#[error("{reason} (block {block:?}, dos score {dos_score})")]
pub struct CommitsCheckError {
    pub reason: &'static str,
    pub dos_score: u32,
    pub block: Buf32,
}

/// Structural checks on a received commits response.
///
/// Non-commit transactions and commits that do not hash to the block's
/// finalizer-commits merkle root are outright malicious (score 100); a
/// bundle extending an unknown block merely gets the sender scored
/// lightly (score 10), since the requester may simply be behind.
pub fn check_commits(
    chain: &dyn ActiveChain,
    response: &CommitsResponse,
) -> Result<(), CommitsCheckError> {
    for bundle in &response.data {
        let block_hash = bundle.header.hash();
        for commit in &bundle.commits {
            if !commit.is_finalization() {
                return Err(CommitsCheckError {
                    reason: "bad-non-commit",
                    dos_score: 100,
                    block: block_hash,
                });
            }
            if !commit.payload_matches_type() {
                return Err(CommitsCheckError {
                    reason: "bad-commit-malformed",
                    dos_score: 100,
                    block: block_hash,
                });
            }
        }
        let leaves: Vec<Buf32> = bundle.commits.iter().map(Transaction::txid).collect();
        let root = unite_primitives::merkle::merkle_root(&leaves).root;
        if root != bundle.header.finalizer_commits_merkle_root {
            return Err(CommitsCheckError {
                reason: "bad-finalizer-commits-merkle-root",
                dos_score: 100,
                block: block_hash,
            });
        }
    }
    if let Some(first) = response.data.first() {
        let prev = first.header.prev_block_hash;
        if !prev.is_zero() && chain.get_block_index(&prev).is_none() {
            return Err(CommitsCheckError {
                reason: "bad-prevblk-unknown",
                dos_score: 10,
                block: first.header.hash(),
            });
        }
    }
    Ok(())
}
