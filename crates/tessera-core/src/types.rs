use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TesseraError;

/// Monetary value in micro-units (1 TES = 1_000_000 micros). u64 holds the
/// full emission with room to spare.
pub type Amount = u64;

/// Unix timestamp in milliseconds, UTC.
pub type TimestampMs = i64;

// ── Anchor ───────────────────────────────────────────────────────────────────

/// Immutable triple identifying a UTXO for its entire lifetime:
/// the block that minted it, the transaction's index in that block, and the
/// output's index in that transaction.
///
/// Compact string form: `"<height>:<txIndex>:<outputIndex>"`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Anchor {
    pub height: u64,
    pub tx_index: u16,
    pub output_index: u16,
}

impl Anchor {
    pub fn new(height: u64, tx_index: u16, output_index: u16) -> Self {
        Self { height, tx_index, output_index }
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.height, self.tx_index, self.output_index)
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anchor({self})")
    }
}

impl FromStr for Anchor {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let height = parts.next().and_then(|p| p.parse().ok());
        let tx_index = parts.next().and_then(|p| p.parse().ok());
        let output_index = parts.next().and_then(|p| p.parse().ok());
        match (height, tx_index, output_index, parts.next()) {
            (Some(h), Some(t), Some(o), None) => Ok(Self::new(h, t, o)),
            _ => Err(TesseraError::Malformed(format!("bad anchor: {s}"))),
        }
    }
}

// ── TxId ─────────────────────────────────────────────────────────────────────

/// 32-byte transaction identifier: SHA-256 of the canonical tx body
/// (version + inputs + outputs; witnesses and the id itself excluded).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub [u8; 32]);

impl TxId {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TesseraError> {
        let bytes = hex::decode(s).map_err(|e| TesseraError::Malformed(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TesseraError::Malformed("tx id must be 32 bytes".into()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({}…)", &self.to_hex()[..16])
    }
}

// ── BlockHash ────────────────────────────────────────────────────────────────

/// 32-byte block hash: SHA-256 of the PoW pre-image concatenated with the
/// winning nonce.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// The zero hash. Used as `prev_hash` of the genesis block.
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TesseraError> {
        let bytes = hex::decode(s).map_err(|e| TesseraError::Malformed(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TesseraError::Malformed("block hash must be 32 bytes".into()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}…)", &self.to_hex()[..16])
    }
}

// ── AddressType ──────────────────────────────────────────────────────────────

/// First character of an address; encodes the account class and selects the
/// zero-bits parameter of the derivation security check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressType {
    /// Wallet (general spending).
    W,
    /// Contract sink.
    C,
    /// Stake sink.
    S,
    /// Payment channel.
    P,
    /// Unrestricted (no derivation grinding required).
    U,
}

impl AddressType {
    pub const ALL: [AddressType; 5] = [
        AddressType::W,
        AddressType::C,
        AddressType::S,
        AddressType::P,
        AddressType::U,
    ];

    pub fn marker(self) -> char {
        match self {
            AddressType::W => 'W',
            AddressType::C => 'C',
            AddressType::S => 'S',
            AddressType::P => 'P',
            AddressType::U => 'U',
        }
    }

    pub fn from_marker(c: char) -> Option<Self> {
        match c {
            'W' => Some(AddressType::W),
            'C' => Some(AddressType::C),
            'S' => Some(AddressType::S),
            'P' => Some(AddressType::P),
            'U' => Some(AddressType::U),
            _ => None,
        }
    }
}

// ── Address ──────────────────────────────────────────────────────────────────

/// A base58 account address: one type-marker character followed by the
/// base58 encoding of the Argon2id image of the owner's public key.
///
/// `Address` guarantees conformity (shape) only. The derivation security
/// check (leading zero bits of the Argon2id image) requires the public key
/// and lives in the crypto layer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

/// Inclusive bounds on total address length (marker + base58 body).
pub const ADDRESS_MIN_LEN: usize = 21;
pub const ADDRESS_MAX_LEN: usize = 46;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

impl Address {
    /// Parse and conformity-check an address string.
    pub fn parse(s: &str) -> Result<Self, TesseraError> {
        if s.len() < ADDRESS_MIN_LEN || s.len() > ADDRESS_MAX_LEN {
            return Err(TesseraError::Malformed(format!(
                "address length {} outside [{ADDRESS_MIN_LEN}, {ADDRESS_MAX_LEN}]",
                s.len()
            )));
        }
        let mut chars = s.chars();
        let marker = chars.next().expect("length checked above");
        if AddressType::from_marker(marker).is_none() {
            return Err(TesseraError::Malformed(format!(
                "unknown address type marker '{marker}'"
            )));
        }
        if !chars.all(|c| BASE58_ALPHABET.contains(c)) {
            return Err(TesseraError::Malformed("address body is not base58".into()));
        }
        Ok(Self(s.to_string()))
    }

    /// Assemble from parts already known to be valid (derivation path).
    pub fn from_parts(ty: AddressType, base58_body: &str) -> Self {
        Self(format!("{}{}", ty.marker(), base58_body))
    }

    pub fn address_type(&self) -> AddressType {
        AddressType::from_marker(self.0.chars().next().expect("addresses are non-empty"))
            .expect("marker validated at construction")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The base58 body without the type marker.
    pub fn body(&self) -> &str {
        &self.0[1..]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl FromStr for Address {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── UtxoRule ─────────────────────────────────────────────────────────────────

/// Spending rule attached to an output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UtxoRule {
    /// Spendable with a witness signature from the owning address.
    Sig,
    /// A stake output: spendable by signature after maturity, or destroyed
    /// (slashed) when a protocol violation by the staker is proven.
    SigOrSlash,
}

impl UtxoRule {
    pub fn as_str(self) -> &'static str {
        match self {
            UtxoRule::Sig => "sig",
            UtxoRule::SigOrSlash => "sigOrSlash",
        }
    }
}

impl FromStr for UtxoRule {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sig" => Ok(UtxoRule::Sig),
            "sigOrSlash" => Ok(UtxoRule::SigOrSlash),
            other => Err(TesseraError::Malformed(format!("unknown utxo rule: {other}"))),
        }
    }
}

// ── Utxo ─────────────────────────────────────────────────────────────────────

/// An unspent transaction output as tracked by the cache: the minting
/// transaction's output template plus the anchor assigned at digestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub anchor: Anchor,
    pub amount: Amount,
    pub address: Address,
    pub rule: UtxoRule,
}
