//! Blocks, headers and the in-memory block index entry.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};

use unite_primitives::buf::Buf32;
use unite_primitives::difficulty::Difficulty;
use unite_primitives::hash;
use unite_primitives::merkle::{self, MerkleRoot};
use unite_primitives::params::{Height, Time};

use crate::transaction::Transaction;

/// Block header. Extends the Bitcoin layout with a witness merkle root
/// and a finalizer-commits merkle root; the proposer signature is
/// appended to the block, not part of the header (the signature signs
/// the header hash).
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Arbitrary,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block_hash: Buf32,
    pub merkle_root: Buf32,
    pub witness_merkle_root: Buf32,
    pub finalizer_commits_merkle_root: Buf32,
    pub time: Time,
    pub bits: Difficulty,
}

impl BlockHeader {
    pub fn hash(&self) -> Buf32 {
        let encoded = borsh::to_vec(self).expect("header encoding is infallible");
        hash::sha256d(&encoded)
    }
}

#[derive(
    Clone, Debug, Default, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct Block {
    pub header: BlockHeader,
    pub vtx: Vec<Transaction>,
    /// Proposer's compact ECDSA signature over the header hash.
    pub signature: Vec<u8>,
}

impl Block {
    pub fn hash(&self) -> Buf32 {
        self.header.hash()
    }

    /// Merkle root over the transaction ids.
    pub fn merkle_root(&self) -> MerkleRoot {
        let leaves: Vec<Buf32> = self.vtx.iter().map(Transaction::txid).collect();
        merkle::merkle_root(&leaves)
    }

    /// Merkle root over the witness transaction ids; the coinbase
    /// contributes a zero leaf.
    pub fn witness_merkle_root(&self) -> MerkleRoot {
        let leaves: Vec<Buf32> = self
            .vtx
            .iter()
            .enumerate()
            .map(|(i, tx)| if i == 0 { Buf32::zero() } else { tx.wtxid() })
            .collect();
        merkle::merkle_root(&leaves)
    }

    /// Merkle root over the finalizer commits contained in the block.
    pub fn finalizer_commits_merkle_root(&self) -> MerkleRoot {
        let leaves: Vec<Buf32> = self
            .vtx
            .iter()
            .filter(|tx| tx.is_finalization())
            .map(Transaction::txid)
            .collect();
        merkle::merkle_root(&leaves)
    }

    pub fn finalizer_commits(&self) -> Vec<Transaction> {
        self.vtx
            .iter()
            .filter(|tx| tx.is_finalization())
            .cloned()
            .collect()
    }

    /// A proof-of-stake block carries a staking input in the coinbase.
    pub fn staking_input(&self) -> Option<&crate::transaction::TxIn> {
        self.vtx.first().and_then(|cb| cb.vin.get(1))
    }
}

/// An entry of the block index: everything the finalization core needs
/// to know about a block without loading it from disk.
#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct BlockIndex {
    pub block_hash: Buf32,
    /// `None` for the genesis block.
    pub prev_hash: Option<Buf32>,
    pub height: Height,
    pub time: Time,
    pub bits: Difficulty,
    /// Stake modifier chained from the parent, see the stake validator.
    pub stake_modifier: Buf32,
    /// Whether the full block data is available on disk.
    pub has_block_data: bool,
}

impl BlockIndex {
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}
