//! Transactions, extended with a type tag and typed finalization
//! payloads.
//!
//! The original chain smuggled finalization data through script blobs;
//! here the payload is an explicit field covered by the txid, which is
//! what the state machine actually consumes.

use arbitrary::Arbitrary;
use borsh::{BorshDeserialize, BorshSerialize};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use unite_primitives::amount::Amount;
use unite_primitives::buf::{Buf20, Buf32};
use unite_primitives::hash;

use crate::admin::AdminCommand;
use crate::script::{Script, Witness};
use crate::vote::Vote;

/// One-byte transaction type tag extending the version.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Arbitrary,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u8)]
pub enum TxType {
    Coinbase = 0,
    Regular = 1,
    Deposit = 2,
    Vote = 3,
    Logout = 4,
    Slash = 5,
    Withdraw = 6,
    Admin = 7,
}

impl BorshSerialize for TxType {
    fn serialize<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        u8::from(*self).serialize(writer)
    }
}

impl BorshDeserialize for TxType {
    fn deserialize_reader<R: std::io::Read>(reader: &mut R) -> std::io::Result<Self> {
        let tag = u8::deserialize_reader(reader)?;
        TxType::try_from(tag).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unknown transaction type {tag}"),
            )
        })
    }
}

/// Reference to a transaction output.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Arbitrary,
    BorshDeserialize,
    BorshSerialize,
)]
pub struct OutPoint {
    pub txid: Buf32,
    pub index: u32,
}

impl OutPoint {
    pub fn new(txid: Buf32, index: u32) -> Self {
        Self { txid, index }
    }

    /// The null prevout used by the coinbase meta input.
    pub fn null() -> Self {
        Self {
            txid: Buf32::zero(),
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u32::MAX
    }
}

#[derive(
    Clone, Debug, Default, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub witness: Witness,
}

impl Default for OutPoint {
    fn default() -> Self {
        Self::null()
    }
}

impl TxIn {
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Script::empty(),
            witness: Vec::new(),
        }
    }

    pub fn with_script_sig(prevout: OutPoint, script_sig: Script) -> Self {
        Self {
            prevout,
            script_sig,
            witness: Vec::new(),
        }
    }
}

#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

/// Typed payload of a finalization transaction.
#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub enum TxPayload {
    Deposit {
        validator_address: Buf20,
    },
    Vote(Vote),
    Logout {
        validator_address: Buf20,
    },
    Slash {
        vote1: Vote,
        vote2: Vote,
    },
    Withdraw {
        validator_address: Buf20,
        amount: Amount,
    },
    Admin {
        /// Quorum of admin keys that signed the command batch.
        signing_keys: Vec<[u8; 33]>,
        commands: Vec<AdminCommand>,
    },
}

#[derive(
    Clone, Debug, Eq, PartialEq, Arbitrary, BorshDeserialize, BorshSerialize,
)]
pub struct Transaction {
    pub version: u16,
    pub tx_type: TxType,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
    pub payload: Option<TxPayload>,
}

impl Transaction {
    pub fn new(tx_type: TxType) -> Self {
        Self {
            version: 1,
            tx_type,
            vin: Vec::new(),
            vout: Vec::new(),
            lock_time: 0,
            payload: None,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.tx_type == TxType::Coinbase
    }

    /// Finalization transactions are the commit types 2..=7.
    pub fn is_finalization(&self) -> bool {
        matches!(
            self.tx_type,
            TxType::Deposit
                | TxType::Vote
                | TxType::Logout
                | TxType::Slash
                | TxType::Withdraw
                | TxType::Admin
        )
    }

    /// Transaction id: the hash of the transaction without witness data.
    pub fn txid(&self) -> Buf32 {
        let mut stripped = self.clone();
        for input in &mut stripped.vin {
            input.witness.clear();
        }
        hash::compute_borsh_hash(&stripped)
    }

    /// Hash including witness data, as committed by the witness merkle
    /// root. The coinbase contributes a zero hash there.
    pub fn wtxid(&self) -> Buf32 {
        hash::compute_borsh_hash(self)
    }

    /// Whether the payload matches the type tag. A finalization
    /// transaction whose payload disagrees with its tag is malformed.
    pub fn payload_matches_type(&self) -> bool {
        match (&self.tx_type, &self.payload) {
            (TxType::Coinbase | TxType::Regular, None) => true,
            (TxType::Deposit, Some(TxPayload::Deposit { .. })) => true,
            (TxType::Vote, Some(TxPayload::Vote(_))) => true,
            (TxType::Logout, Some(TxPayload::Logout { .. })) => true,
            (TxType::Slash, Some(TxPayload::Slash { .. })) => true,
            (TxType::Withdraw, Some(TxPayload::Withdraw { .. })) => true,
            (TxType::Admin, Some(TxPayload::Admin { .. })) => true,
            _ => false,
        }
    }

    /// Total value of the outputs.
    pub fn value_out(&self) -> Amount {
        self.vout.iter().map(|o| o.value).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;

    fn sample_tx() -> Transaction {
        let mut tx = Transaction::new(TxType::Vote);
        tx.vin.push(TxIn::new(OutPoint::new(Buf32::new([3; 32]), 1)));
        tx.vout.push(TxOut::new(5000, Script::new(vec![0x51])));
        tx.payload = Some(TxPayload::Vote(Vote {
            validator_address: Buf20::new([9; 20]),
            target_hash: Buf32::new([8; 32]),
            source_epoch: 3,
            target_epoch: 4,
        }));
        tx
    }

    #[test]
    fn test_borsh_roundtrip() {
        let tx = sample_tx();
        let enc = borsh::to_vec(&tx).unwrap();
        let dec: Transaction = borsh::from_slice(&enc).unwrap();
        assert_eq!(tx, dec);
    }

    #[test]
    fn test_txid_ignores_witness() {
        let mut tx = sample_tx();
        let txid = tx.txid();
        let wtxid = tx.wtxid();
        tx.vin[0].witness = vec![vec![1, 2, 3]];
        assert_eq!(tx.txid(), txid);
        assert_ne!(tx.wtxid(), wtxid);
    }

    #[test]
    fn test_tx_type_tag_roundtrip() {
        for tag in 0u8..=7 {
            let ty = TxType::try_from(tag).unwrap();
            assert_eq!(u8::from(ty), tag);
        }
        assert!(TxType::try_from(8u8).is_err());
    }

    #[test]
    fn test_finalization_types() {
        assert!(!Transaction::new(TxType::Coinbase).is_finalization());
        assert!(!Transaction::new(TxType::Regular).is_finalization());
        assert!(sample_tx().is_finalization());
    }

    #[test]
    fn test_payload_type_consistency() {
        assert!(sample_tx().payload_matches_type());
        let mut tx = sample_tx();
        tx.tx_type = TxType::Deposit;
        assert!(!tx.payload_matches_type());
    }
}
