//! Proof-of-stake kernel primitives and block signing key extraction.

use borsh::BorshSerialize;

use unite_primitives::buf::Buf32;
use unite_primitives::hash;
use unite_primitives::params::Time;
use unite_state::block::{Block, BlockIndex};
use unite_state::script::{parse_witness_script, ScriptKind, WitnessScript};
use unite_state::transaction::TxIn;

use crate::coin::Coin;

/// A compressed secp256k1 public key as carried in witnesses.
pub type SigningKey = [u8; 33];

/// The stake modifier of a block chains the staked outpoint into its
/// ancestry: `sha256d(stake_txid ∥ parent_modifier)`. The genesis
/// modifier is zero.
pub fn compute_stake_modifier(prev_index: Option<&BlockIndex>, stake_txid: &Buf32) -> Buf32 {
    let parent_modifier = prev_index.map(|i| i.stake_modifier).unwrap_or_default();
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(stake_txid.as_slice());
    buf[32..].copy_from_slice(parent_modifier.as_slice());
    hash::sha256d(&buf)
}

/// The kernel hash of (coin, slot): `sha256d(stake_modifier ∥
/// coin.block_time ∥ coin.outpoint ∥ masked_time)`.
///
/// `time` must already be masked to the staking timestamp grid; the
/// header rules guarantee that for incoming blocks and the proposer
/// only searches masked slots.
pub fn compute_kernel_hash(prev_index: Option<&BlockIndex>, coin: &Coin, time: Time) -> Buf32 {
    let stake_modifier = prev_index.map(|i| i.stake_modifier).unwrap_or_default();
    let mut buf = Vec::with_capacity(32 + 4 + 36 + 4);
    stake_modifier
        .serialize(&mut buf)
        .expect("vec write is infallible");
    coin.block_time
        .serialize(&mut buf)
        .expect("vec write is infallible");
    coin.out_point
        .serialize(&mut buf)
        .expect("vec write is infallible");
    time.serialize(&mut buf).expect("vec write is infallible");
    hash::sha256d(&buf)
}

/// Extracts the public keys that may sign a block staking this input.
///
/// P2WPKH carries the key directly in the witness. P2WSH is stakeable
/// for a single-key script or a 1-of-N multisig; an M-of-N script with
/// M > 1 cannot sign a block and yields nothing.
pub fn extract_block_signing_keys(input: &TxIn) -> Vec<SigningKey> {
    match input.witness.as_slice() {
        // P2WPKH spend: [signature, pubkey]
        [_, key] if key.len() == 33 => match <SigningKey>::try_from(key.as_slice()) {
            Ok(key) => vec![key],
            Err(_) => Vec::new(),
        },
        // P2WSH spend: [...signatures, witness script]
        [.., script] => match parse_witness_script(script) {
            WitnessScript::SingleKey(key) => vec![key],
            WitnessScript::Multisig { required: 1, keys } => keys,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// The signing keys of a block's staking input, if it has one.
pub fn extract_block_signing_keys_from_block(block: &Block) -> Vec<SigningKey> {
    block
        .staking_input()
        .map(extract_block_signing_keys)
        .unwrap_or_default()
}

/// Whether a locking script can be staked at all (directly or via
/// remote staking delegation).
pub fn is_stakeable_script(kind: &ScriptKind) -> bool {
    !matches!(kind, ScriptKind::Other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use unite_primitives::amount::UNIT;
    use unite_state::script::{Script, OP_CHECKMULTISIG, OP_CHECKSIG, OP_1, OP_2};
    use unite_state::transaction::OutPoint;

    fn coin_at(time: Time) -> Coin {
        Coin {
            block_hash: Buf32::new([1; 32]),
            block_height: 5,
            block_time: time,
            out_point: OutPoint::new(Buf32::new([2; 32]), 7),
            value: 10 * UNIT,
            script_pubkey: Script::empty(),
        }
    }

    fn index_with_modifier(modifier: [u8; 32]) -> BlockIndex {
        BlockIndex {
            block_hash: Buf32::new([9; 32]),
            prev_hash: None,
            height: 10,
            time: 0,
            bits: 0,
            stake_modifier: Buf32::new(modifier),
            has_block_data: true,
        }
    }

    #[test]
    fn test_stake_modifier_chains_parent() {
        let txid = Buf32::new([3; 32]);
        let genesis = compute_stake_modifier(None, &txid);
        let parent = index_with_modifier([4; 32]);
        let child = compute_stake_modifier(Some(&parent), &txid);
        assert_ne!(genesis, child);
        // Deterministic.
        assert_eq!(compute_stake_modifier(Some(&parent), &txid), child);
    }

    #[test]
    fn test_kernel_hash_depends_on_every_ingredient() {
        let parent = index_with_modifier([4; 32]);
        let base = compute_kernel_hash(Some(&parent), &coin_at(100), 1600);
        assert_ne!(base, compute_kernel_hash(None, &coin_at(100), 1600));
        assert_ne!(base, compute_kernel_hash(Some(&parent), &coin_at(101), 1600));
        assert_ne!(base, compute_kernel_hash(Some(&parent), &coin_at(100), 1616));
        assert_eq!(base, compute_kernel_hash(Some(&parent), &coin_at(100), 1600));
    }

    #[test]
    fn test_extract_p2wpkh_key() {
        let key = [7u8; 33];
        let mut input = TxIn::new(OutPoint::null());
        input.witness = vec![vec![0u8; 64], key.to_vec()];
        assert_eq!(extract_block_signing_keys(&input), vec![key]);
    }

    #[test]
    fn test_extract_p2wsh_single_key() {
        let key = [8u8; 33];
        let mut script = vec![33u8];
        script.extend_from_slice(&key);
        script.push(OP_CHECKSIG);
        let mut input = TxIn::new(OutPoint::null());
        input.witness = vec![vec![0u8; 64], script];
        assert_eq!(extract_block_signing_keys(&input), vec![key]);
    }

    #[test]
    fn test_extract_one_of_two_multisig_keys() {
        let k1 = [1u8; 33];
        let k2 = [2u8; 33];
        let mut script = vec![OP_1];
        for k in [&k1, &k2] {
            script.push(33);
            script.extend_from_slice(k);
        }
        script.push(OP_2);
        script.push(OP_CHECKMULTISIG);
        let mut input = TxIn::new(OutPoint::null());
        input.witness = vec![vec![0u8; 64], script];
        assert_eq!(extract_block_signing_keys(&input), vec![k1, k2]);
    }

    #[test]
    fn test_two_of_two_multisig_is_not_stakeable() {
        let k1 = [1u8; 33];
        let k2 = [2u8; 33];
        let mut script = vec![OP_2];
        for k in [&k1, &k2] {
            script.push(33);
            script.extend_from_slice(k);
        }
        script.push(OP_2);
        script.push(OP_CHECKMULTISIG);
        let mut input = TxIn::new(OutPoint::null());
        input.witness = vec![vec![0u8; 64], vec![0u8; 64], script];
        assert!(extract_block_signing_keys(&input).is_empty());
    }
}
