//! Minimal script model.
//!
//! The full script interpreter is an external collaborator; the core
//! only needs to build and recognize the handful of script shapes that
//! staking and the coinbase meta input use.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use unite_primitives::buf::{Buf20, Buf32};
use unite_primitives::params::Height;

pub const OP_0: u8 = 0x00;
pub const OP_1: u8 = 0x51;
pub const OP_2: u8 = 0x52;
pub const OP_16: u8 = 0x60;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

/// A locking or unlocking script, as raw opcodes.
#[derive(
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Arbitrary,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct Script(pub Vec<u8>);

/// Segwit-style witness stack attached to an input.
pub type Witness = Vec<Vec<u8>>;

/// The script shapes the staking core distinguishes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptKind {
    /// Pay to witness public key hash.
    PubKeyHash(Buf20),
    /// Pay to witness script hash.
    ScriptHash(Buf32),
    /// Remote staking: the staker key hash may propose, the owner key
    /// hash retains spending authority.
    RemoteStakingKeyHash { staker: Buf20, owner: Buf32 },
    /// Remote staking over a script-hash owner.
    RemoteStakingScriptHash { staker: Buf20, owner: Buf32 },
    /// Anything the core does not need to understand.
    Other,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ScriptError {
    #[error("script truncated")]
    Truncated,
    #[error("malformed script number")]
    MalformedNumber,
    #[error("script number out of range")]
    NumberOutOfRange,
}

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The coinbase meta input script: block height as a script number,
    /// followed by the 32-byte snapshot hash.
    pub fn meta_input(height: Height, snapshot_hash: &Buf32) -> Script {
        let mut bytes = Vec::with_capacity(6 + 33);
        push_script_num(&mut bytes, height as i64);
        bytes.push(0x20);
        bytes.extend_from_slice(snapshot_hash.as_slice());
        Script(bytes)
    }

    /// Decodes a meta input script back into height and snapshot hash.
    pub fn parse_meta_input(&self) -> Result<(Height, Buf32), ScriptError> {
        let (num, rest) = read_script_num(&self.0)?;
        if num < 0 || num > u32::MAX as i64 {
            return Err(ScriptError::NumberOutOfRange);
        }
        if rest.len() < 33 || rest[0] != 0x20 {
            return Err(ScriptError::Truncated);
        }
        let hash = Buf32::from_slice(&rest[1..33]).expect("32 bytes checked");
        Ok((num as Height, hash))
    }

    pub fn pub_key_hash(hash: &Buf20) -> Script {
        let mut bytes = vec![OP_0, 0x14];
        bytes.extend_from_slice(hash.as_slice());
        Script(bytes)
    }

    pub fn script_hash(hash: &Buf32) -> Script {
        let mut bytes = vec![OP_0, 0x20];
        bytes.extend_from_slice(hash.as_slice());
        Script(bytes)
    }

    pub fn remote_staking_key_hash(staker: &Buf20, owner: &Buf32) -> Script {
        let mut bytes = vec![OP_1, 0x14];
        bytes.extend_from_slice(staker.as_slice());
        bytes.push(0x20);
        bytes.extend_from_slice(owner.as_slice());
        Script(bytes)
    }

    pub fn remote_staking_script_hash(staker: &Buf20, owner: &Buf32) -> Script {
        let mut bytes = vec![OP_2, 0x14];
        bytes.extend_from_slice(staker.as_slice());
        bytes.push(0x20);
        bytes.extend_from_slice(owner.as_slice());
        Script(bytes)
    }

    pub fn kind(&self) -> ScriptKind {
        let b = &self.0;
        match b.as_slice() {
            [OP_0, 0x14, rest @ ..] if rest.len() == 20 => {
                ScriptKind::PubKeyHash(Buf20::from_slice(rest).expect("20 bytes"))
            }
            [OP_0, 0x20, rest @ ..] if rest.len() == 32 => {
                ScriptKind::ScriptHash(Buf32::from_slice(rest).expect("32 bytes"))
            }
            [op @ (OP_1 | OP_2), 0x14, rest @ ..] if rest.len() == 53 && rest[20] == 0x20 => {
                let staker = Buf20::from_slice(&rest[..20]).expect("20 bytes");
                let owner = Buf32::from_slice(&rest[21..]).expect("32 bytes");
                if *op == OP_1 {
                    ScriptKind::RemoteStakingKeyHash { staker, owner }
                } else {
                    ScriptKind::RemoteStakingScriptHash { staker, owner }
                }
            }
            _ => ScriptKind::Other,
        }
    }

    /// The owner hash a remote-staking output must repay, if any.
    pub fn remote_staking_owner(&self) -> Option<Buf32> {
        match self.kind() {
            ScriptKind::RemoteStakingKeyHash { owner, .. }
            | ScriptKind::RemoteStakingScriptHash { owner, .. } => Some(owner),
            _ => None,
        }
    }
}

/// A witness script as found in the last witness stack element of a
/// P2WSH spend. Only single-key and 1-of-N multisig scripts can stake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WitnessScript {
    SingleKey([u8; 33]),
    Multisig { required: u8, keys: Vec<[u8; 33]> },
    Other,
}

pub fn parse_witness_script(bytes: &[u8]) -> WitnessScript {
    // <33-byte key> OP_CHECKSIG
    if bytes.len() == 35 && bytes[0] == 33 && bytes[34] == OP_CHECKSIG {
        let key = <[u8; 33]>::try_from(&bytes[1..34]).expect("33 bytes");
        return WitnessScript::SingleKey(key);
    }
    // OP_m <key>... OP_n OP_CHECKMULTISIG
    if bytes.len() >= 3 && (OP_1..=OP_16).contains(&bytes[0]) {
        let required = bytes[0] - OP_1 + 1;
        let mut keys = Vec::new();
        let mut at = 1;
        while at < bytes.len() && bytes[at] == 33 {
            if at + 34 > bytes.len() {
                return WitnessScript::Other;
            }
            keys.push(<[u8; 33]>::try_from(&bytes[at + 1..at + 34]).expect("33 bytes"));
            at += 34;
        }
        if keys.is_empty() || at + 2 != bytes.len() {
            return WitnessScript::Other;
        }
        let n_op = bytes[at];
        if n_op != OP_1 + keys.len() as u8 - 1 || bytes[at + 1] != OP_CHECKMULTISIG {
            return WitnessScript::Other;
        }
        return WitnessScript::Multisig { required, keys };
    }
    WitnessScript::Other
}

fn push_script_num(out: &mut Vec<u8>, value: i64) {
    if value == 0 {
        out.push(OP_0);
        return;
    }
    let mut abs = value.unsigned_abs();
    let mut data = Vec::new();
    while abs > 0 {
        data.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    // If the most significant byte carries the sign bit, append a padding
    // byte so the number stays positive.
    if data.last().expect("non-zero") & 0x80 != 0 {
        data.push(if value < 0 { 0x80 } else { 0x00 });
    } else if value < 0 {
        *data.last_mut().expect("non-zero") |= 0x80;
    }
    out.push(data.len() as u8);
    out.extend_from_slice(&data);
}

fn read_script_num(bytes: &[u8]) -> Result<(i64, &[u8]), ScriptError> {
    let (&first, rest) = bytes.split_first().ok_or(ScriptError::Truncated)?;
    if first == OP_0 {
        return Ok((0, rest));
    }
    let len = first as usize;
    if len > 8 {
        return Err(ScriptError::NumberOutOfRange);
    }
    if rest.len() < len {
        return Err(ScriptError::Truncated);
    }
    let (data, rest) = rest.split_at(len);
    let mut value: i64 = 0;
    for (i, b) in data.iter().enumerate() {
        let byte = if i == len - 1 { b & 0x7f } else { *b };
        value |= (byte as i64) << (8 * i);
    }
    if data[len - 1] & 0x80 != 0 {
        value = -value;
    }
    Ok((value, rest))
}
