//! Bitcoin-style merkle trees over transaction hashes.

use crate::buf::Buf32;
use crate::hash;

/// Result of a merkle root computation.
///
/// `mutated` is set when two identical hashes were combined at any level
/// of the tree, which makes the root malleable (CVE-2012-2459); blocks
/// with a mutated tree are rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MerkleRoot {
    pub root: Buf32,
    pub mutated: bool,
}

/// Computes the merkle root over a list of leaf hashes.
///
/// An empty list hashes to zero. Odd levels duplicate their last entry,
/// as in Bitcoin.
pub fn merkle_root(leaves: &[Buf32]) -> MerkleRoot {
    if leaves.is_empty() {
        return MerkleRoot {
            root: Buf32::zero(),
            mutated: false,
        };
    }

    let mut level: Vec<Buf32> = leaves.to_vec();
    let mut mutated = false;
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("level is non-empty"));
        }
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks_exact(2) {
            if pair[0] == pair[1] {
                mutated = true;
            }
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(pair[0].as_slice());
            buf[32..].copy_from_slice(pair[1].as_slice());
            next.push(hash::sha256d(&buf));
        }
        level = next;
    }
    MerkleRoot {
        root: level[0],
        mutated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Buf32 {
        Buf32::new([n; 32])
    }

    #[test]
    fn test_empty_root_is_zero() {
        let r = merkle_root(&[]);
        assert!(r.root.is_zero());
        assert!(!r.mutated);
    }

    #[test]
    fn test_single_leaf_is_root() {
        let r = merkle_root(&[leaf(1)]);
        assert_eq!(r.root, leaf(1));
        assert!(!r.mutated);
    }

    #[test]
    fn test_pair_concat_hash() {
        let r = merkle_root(&[leaf(1), leaf(2)]);
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&[1u8; 32]);
        buf[32..].copy_from_slice(&[2u8; 32]);
        assert_eq!(r.root, hash::sha256d(&buf));
    }

    #[test]
    fn test_duplicate_leaves_flag_mutation() {
        let r = merkle_root(&[leaf(1), leaf(1)]);
        assert!(r.mutated);
        // A duplicated odd tail is indistinguishable from a real duplicate.
        let dup = merkle_root(&[leaf(1), leaf(2), leaf(3), leaf(3)]);
        assert!(dup.mutated);
    }

    #[test]
    fn test_odd_number_of_leaves() {
        let explicit = merkle_root(&[leaf(1), leaf(2), leaf(3), leaf(3)]);
        let implicit = merkle_root(&[leaf(1), leaf(2), leaf(3)]);
        assert_eq!(explicit.root, implicit.root);
    }
}
