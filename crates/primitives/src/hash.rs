//! Common wrappers around the native hash functions.

use borsh::BorshSerialize;
use digest::Digest;
use sha2::Sha256;

use crate::buf::Buf32;

/// Direct untagged hash.
pub fn raw(buf: &[u8]) -> Buf32 {
    Buf32::from(<[u8; 32]>::from(Sha256::digest(buf)))
}

/// Bitcoin-style double-SHA-256, used for block and transaction ids.
pub fn sha256d(buf: &[u8]) -> Buf32 {
    let first = Sha256::digest(buf);
    Buf32::from(<[u8; 32]>::from(Sha256::digest(first)))
}

pub fn compute_borsh_hash<T: BorshSerialize>(v: &T) -> Buf32 {
    let mut hasher = Sha256::new();
    v.serialize(&mut hasher).expect("serialization failed");
    let result = hasher.finalize();
    Buf32::from(<[u8; 32]>::from(result))
}
