use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::TesseraError;
use crate::types::{Address, Amount, Anchor, TxId, UtxoRule};

// ── Inputs ───────────────────────────────────────────────────────────────────

/// Which reward a marker input mints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewardKind {
    /// PoW coinbase, paid to the miner.
    Pow,
    /// PoS reward, paid to the round's selected validator.
    Pos,
}

/// A transaction input: either a spend of an existing UTXO by anchor, or the
/// single marker input of a coinbase / PoS-reward transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxInput {
    Utxo(Anchor),
    Reward { kind: RewardKind, height: u64 },
}

impl TxInput {
    pub fn anchor(&self) -> Option<Anchor> {
        match self {
            TxInput::Utxo(a) => Some(*a),
            TxInput::Reward { .. } => None,
        }
    }
}

// ── Outputs ──────────────────────────────────────────────────────────────────

/// An output template: becomes a [`crate::types::Utxo`] once the containing
/// block is digested and an anchor is assigned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub amount: Amount,
    pub address: Address,
    pub rule: UtxoRule,
}

impl TxOutput {
    pub fn new(amount: Amount, address: Address, rule: UtxoRule) -> Self {
        Self { amount, address, rule }
    }
}

// ── Witness ──────────────────────────────────────────────────────────────────

/// One spending proof: an Ed25519 signature over the tx id, plus the signing
/// public key. Text form is `"<sig hex>:<pubkey hex>"`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    pub signature: Vec<u8>,
    pub pubkey: Vec<u8>,
}

impl Witness {
    pub fn new(signature: Vec<u8>, pubkey: Vec<u8>) -> Self {
        Self { signature, pubkey }
    }

    pub fn pubkey_hex(&self) -> String {
        hex::encode(&self.pubkey)
    }

    pub fn to_text(&self) -> String {
        format!("{}:{}", hex::encode(&self.signature), hex::encode(&self.pubkey))
    }

    pub fn from_text(s: &str) -> Result<Self, TesseraError> {
        let (sig, pk) = s
            .split_once(':')
            .ok_or(TesseraError::MalformedField("witness"))?;
        Ok(Self {
            signature: hex::decode(sig).map_err(|_| TesseraError::MalformedField("witness.signature"))?,
            pubkey: hex::decode(pk).map_err(|_| TesseraError::MalformedField("witness.pubkey"))?,
        })
    }
}

impl fmt::Debug for Witness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Witness(pk {})", &self.pubkey_hex()[..8.min(self.pubkey.len() * 2)])
    }
}

// ── Transaction ──────────────────────────────────────────────────────────────

/// A Tessera transaction.
///
/// `id` is SHA-256 of the canonical bincode serialization of
/// (version, inputs, outputs). Witnesses and the id itself are excluded, so
/// signing does not perturb the id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub witnesses: Vec<Witness>,
}

/// The fields covered by the id hash and by witness signatures.
#[derive(Serialize)]
struct TransactionBody<'a> {
    version: u32,
    inputs: &'a Vec<TxInput>,
    outputs: &'a Vec<TxOutput>,
}

impl Transaction {
    /// Assemble an unsigned transaction, computing its id.
    pub fn assemble(version: u32, inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self { id: TxId::ZERO, version, inputs, outputs, witnesses: Vec::new() };
        tx.id = tx.compute_id();
        tx
    }

    /// Canonical body bytes: bincode of (version, inputs, outputs).
    pub fn body_bytes(&self) -> Vec<u8> {
        bincode::serialize(&TransactionBody {
            version: self.version,
            inputs: &self.inputs,
            outputs: &self.outputs,
        })
        .expect("body serialization is infallible")
    }

    /// Recompute the canonical id from the body.
    pub fn compute_id(&self) -> TxId {
        let digest = Sha256::digest(self.body_bytes());
        TxId::from_bytes(digest.into())
    }

    /// A coinbase transaction paying the PoW miner.
    pub fn coinbase(height: u64, miner: Address, amount: Amount) -> Self {
        Self::assemble(
            crate::constants::TX_VERSION,
            vec![TxInput::Reward { kind: RewardKind::Pow, height }],
            vec![TxOutput::new(amount, miner, UtxoRule::Sig)],
        )
    }

    /// A PoS-reward transaction paying the round's selected validator.
    pub fn pos_reward(height: u64, validator: Address, amount: Amount) -> Self {
        Self::assemble(
            crate::constants::TX_VERSION,
            vec![TxInput::Reward { kind: RewardKind::Pos, height }],
            vec![TxOutput::new(amount, validator, UtxoRule::Sig)],
        )
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(
            self.inputs.as_slice(),
            [TxInput::Reward { kind: RewardKind::Pow, .. }]
        )
    }

    pub fn is_pos_reward(&self) -> bool {
        matches!(
            self.inputs.as_slice(),
            [TxInput::Reward { kind: RewardKind::Pos, .. }]
        )
    }

    /// Coinbase and PoS-reward transactions bypass fee and witness checks.
    pub fn is_special(&self) -> bool {
        self.is_coinbase() || self.is_pos_reward()
    }

    /// Anchors consumed by this transaction (empty for special txs).
    pub fn spent_anchors(&self) -> impl Iterator<Item = Anchor> + '_ {
        self.inputs.iter().filter_map(TxInput::anchor)
    }

    /// Sum of output amounts; errors on overflow.
    pub fn total_output(&self) -> Result<Amount, TesseraError> {
        self.outputs.iter().try_fold(0u64, |acc, o| {
            acc.checked_add(o.amount)
                .ok_or_else(|| TesseraError::Malformed("output amount overflow".into()))
        })
    }

    /// Estimated wire size in bytes, used for fee-per-byte pricing.
    pub fn estimated_size(&self) -> usize {
        // version + id
        let mut size = 4 + 32;
        for input in &self.inputs {
            size += match input {
                TxInput::Utxo(_) => 13,
                TxInput::Reward { .. } => 10,
            };
        }
        for output in &self.outputs {
            size += 8 + 1 + output.address.as_str().len() + 2;
        }
        // Unsigned txs still pay for the witnesses they will carry.
        let witness_count = self.witnesses.len().max(1);
        size + witness_count * (64 + 32 + 4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressType;

    fn addr(marker: AddressType) -> Address {
        Address::from_parts(marker, "3v62vx3SgHZHm4QZ8eW7uDYdV")
    }

    #[test]
    fn coinbase_shape() {
        let cb = Transaction::coinbase(7, addr(AddressType::W), 50_000_000);
        assert!(cb.is_coinbase());
        assert!(!cb.is_pos_reward());
        assert!(cb.is_special());
        assert_eq!(cb.inputs.len(), 1);
        assert_eq!(cb.outputs.len(), 1);
        assert_eq!(cb.spent_anchors().count(), 0);
    }

    #[test]
    fn id_is_deterministic_and_witness_free() {
        let mut tx = Transaction::assemble(
            1,
            vec![TxInput::Utxo(Anchor::new(3, 2, 0))],
            vec![TxOutput::new(1_000, addr(AddressType::W), UtxoRule::Sig)],
        );
        let id = tx.id;
        assert_eq!(tx.compute_id(), id);

        // Attaching witnesses must not change the id.
        tx.witnesses.push(Witness::new(vec![0u8; 64], vec![1u8; 32]));
        assert_eq!(tx.compute_id(), id);

        // Changing an output must.
        tx.outputs[0].amount += 1;
        assert_ne!(tx.compute_id(), id);
    }

    #[test]
    fn witness_text_round_trip() {
        let w = Witness::new(vec![0xAB; 64], vec![0xCD; 32]);
        let text = w.to_text();
        assert_eq!(Witness::from_text(&text).unwrap(), w);
        assert!(Witness::from_text("nodelimiter").is_err());
        assert!(Witness::from_text("zz:qq").is_err());
    }

    #[test]
    fn output_overflow_detected() {
        let tx = Transaction::assemble(
            1,
            vec![],
            vec![
                TxOutput::new(u64::MAX, addr(AddressType::W), UtxoRule::Sig),
                TxOutput::new(1, addr(AddressType::W), UtxoRule::Sig),
            ],
        );
        assert!(tx.total_output().is_err());
    }
}
