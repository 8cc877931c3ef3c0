use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::BLOCK_VERSION;
use crate::error::TesseraError;
use crate::transaction::{Transaction, Witness};
use crate::types::{Amount, BlockHash, TimestampMs};

/// A Tessera block, in any lifecycle stage from candidate to finalized.
///
/// Two-phase finalization: the candidate (everything up to `txs`) is fixed at
/// assembly and committed to by the PoW pre-image; the miner supplies `nonce`;
/// the node stamps `timestamp` on proposal acceptance and the selected
/// validator's `pos_signature` over the final hash seals the block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub version: u32,
    pub index: u64,
    pub prev_hash: BlockHash,
    /// Wall clock at PoW proposal acceptance. Zero while still a candidate.
    pub timestamp: TimestampMs,
    /// Wall clock at candidate assembly.
    pub pos_timestamp: TimestampMs,
    /// Difficulty in 1/16-bit steps (see the predicate in tessera-crypto).
    pub difficulty: u32,
    /// Tie-break counter among competing candidates at the same height.
    pub legitimacy: u32,
    /// Ordered: `[coinbase, pos_reward, user txs…]`.
    pub txs: Vec<Transaction>,
    pub nonce: u64,
    pub hash: BlockHash,
    /// Validator signature over the final hash; present once PoS-signed.
    pub pos_signature: Option<Witness>,
}

/// Fields committed to by the PoW pre-image: everything except `timestamp`,
/// `nonce`, `hash` and `pos_signature`, which are assigned later in the
/// lifecycle.
#[derive(Serialize)]
struct PowBody<'a> {
    version: u32,
    index: u64,
    prev_hash: &'a BlockHash,
    pos_timestamp: TimestampMs,
    difficulty: u32,
    legitimacy: u32,
    txs: &'a Vec<Transaction>,
}

impl Block {
    /// Assemble a candidate. `timestamp`, `nonce`, `hash` and the PoS
    /// signature stay zeroed until mining and signing.
    pub fn candidate(
        index: u64,
        prev_hash: BlockHash,
        pos_timestamp: TimestampMs,
        difficulty: u32,
        legitimacy: u32,
        txs: Vec<Transaction>,
    ) -> Self {
        Self {
            version: BLOCK_VERSION,
            index,
            prev_hash,
            timestamp: 0,
            pos_timestamp,
            difficulty,
            legitimacy,
            txs,
            nonce: 0,
            hash: BlockHash::ZERO,
            pos_signature: None,
        }
    }

    /// The PoW pre-image: SHA-256 over the candidate fields.
    pub fn pow_preimage(&self) -> [u8; 32] {
        let body = bincode::serialize(&PowBody {
            version: self.version,
            index: self.index,
            prev_hash: &self.prev_hash,
            pos_timestamp: self.pos_timestamp,
            difficulty: self.difficulty,
            legitimacy: self.legitimacy,
            txs: &self.txs,
        })
        .expect("pow body serialization is infallible");
        Sha256::digest(&body).into()
    }

    /// Final hash for a given nonce: SHA-256(pre-image ‖ nonce_le).
    pub fn hash_with_nonce(preimage: &[u8; 32], nonce: u64) -> BlockHash {
        let mut hasher = Sha256::new();
        hasher.update(preimage);
        hasher.update(nonce.to_le_bytes());
        BlockHash::from_bytes(hasher.finalize().into())
    }

    /// Recompute this block's hash from its own fields.
    pub fn compute_hash(&self) -> BlockHash {
        Self::hash_with_nonce(&self.pow_preimage(), self.nonce)
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.txs.first().filter(|tx| tx.is_coinbase())
    }

    pub fn pos_reward_tx(&self) -> Option<&Transaction> {
        self.txs.get(1).filter(|tx| tx.is_pos_reward())
    }

    /// User transactions: everything after the two reward slots.
    pub fn user_txs(&self) -> &[Transaction] {
        if self.txs.len() > 2 { &self.txs[2..] } else { &[] }
    }

    /// Total fees implied by this block's user transactions, given a resolver
    /// for input amounts.
    pub fn total_fees<F>(&self, input_amount: F) -> Result<Amount, TesseraError>
    where
        F: Fn(&crate::types::Anchor) -> Option<Amount>,
    {
        let mut fees = 0u64;
        for tx in self.user_txs() {
            let mut inputs = 0u64;
            for anchor in tx.spent_anchors() {
                let amount = input_amount(&anchor)
                    .ok_or_else(|| TesseraError::UnknownUtxo(anchor.to_string()))?;
                inputs = inputs
                    .checked_add(amount)
                    .ok_or_else(|| TesseraError::Malformed("input amount overflow".into()))?;
            }
            fees = fees
                .checked_add(inputs.saturating_sub(tx.total_output()?))
                .ok_or_else(|| TesseraError::Malformed("fee overflow".into()))?;
        }
        Ok(fees)
    }
}
