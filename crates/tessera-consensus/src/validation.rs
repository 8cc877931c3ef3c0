//! The transaction validation pipeline and block-level checks.
//!
//! Transaction stages run in order, cheapest first; the first failure
//! aborts with its stage's error:
//!   1. conformity (shape, anchors, UTXO existence, rule placement)
//!   2. fee (Σinputs − Σoutputs must be a positive integer)
//!   3. witness signatures against the recomputed id
//!   4. ownership (witness pubkeys must derive every input address)
//!   5. output-rule conditions (the SigOrSlash fee floor)
//! Stage 6, the cross-transaction double-spend check, is block-scoped and
//! runs at digest time via [`validate_block_txs`].

use std::collections::{HashMap, HashSet};

use tessera_core::block::Block;
use tessera_core::transaction::{Transaction, TxInput};
use tessera_core::types::{Address, Amount, Anchor, TimestampMs, Utxo, UtxoRule};
use tessera_core::{ChainParams, TesseraError};
use tessera_crypto::kdf::Kdf;
use tessera_crypto::pow::hash_meets_difficulty;
use tessera_crypto::{derive_address, verify_signature};

use crate::rewards::{coinbase_reward, pos_reward};

/// Process-level `pubkey → address` memo, keyed by `"<pubkey hex>:<marker>"`.
/// Owned by the node and cleared on reorg; amortizes the Argon2id cost of
/// ownership checks across the mempool.
pub type AddressCache = HashMap<String, Address>;

/// Run stages 1–5 on a transaction. Returns the fee (zero for coinbase and
/// PoS-reward transactions, which bypass stages 2–5).
pub fn validate_transaction(
    tx: &Transaction,
    lookup: &dyn Fn(&Anchor) -> Option<Utxo>,
    kdf: &Kdf,
    params: &ChainParams,
    known_addresses: &mut AddressCache,
) -> Result<Amount, TesseraError> {
    // ── Stage 1: conformity ──────────────────────────────────────────────────
    if tx.version == 0 {
        return Err(TesseraError::Malformed("transaction version must be positive".into()));
    }
    if tx.is_special() {
        if tx.outputs.len() != 1 {
            return Err(TesseraError::Malformed(
                "reward transaction must have exactly one output".into(),
            ));
        }
        if tx.outputs[0].amount == 0 {
            return Err(TesseraError::Malformed("zero-amount output".into()));
        }
        if tx.outputs[0].rule != UtxoRule::Sig {
            return Err(TesseraError::RuleViolation(
                "reward outputs carry the plain sig rule".into(),
            ));
        }
        return Ok(0);
    }

    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(TesseraError::Malformed("empty inputs or outputs".into()));
    }
    let mut seen_anchors = HashSet::new();
    let mut input_utxos = Vec::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        let anchor = match input {
            TxInput::Utxo(anchor) => *anchor,
            TxInput::Reward { .. } => {
                return Err(TesseraError::Malformed(
                    "reward marker outside a reward transaction".into(),
                ));
            }
        };
        if !seen_anchors.insert(anchor) {
            return Err(TesseraError::DoubleSpend(anchor.to_string()));
        }
        let utxo = lookup(&anchor).ok_or_else(|| TesseraError::UnknownUtxo(anchor.to_string()))?;
        input_utxos.push(utxo);
    }
    for (i, output) in tx.outputs.iter().enumerate() {
        if output.amount == 0 {
            return Err(TesseraError::Malformed("zero-amount output".into()));
        }
        if i > 0 && output.rule == UtxoRule::SigOrSlash {
            return Err(TesseraError::RuleViolation(
                "sigOrSlash is only allowed on the first output".into(),
            ));
        }
    }

    // ── Stage 2: fee ─────────────────────────────────────────────────────────
    let total_in: Amount = input_utxos.iter().try_fold(0u64, |acc, u| {
        acc.checked_add(u.amount)
            .ok_or_else(|| TesseraError::Malformed("input amount overflow".into()))
    })?;
    let total_out = tx.total_output()?;
    if total_in <= total_out {
        return Err(TesseraError::InsufficientFunds { need: total_out + 1, have: total_in });
    }
    let fee = total_in - total_out;

    // ── Stage 3: witness signatures ──────────────────────────────────────────
    if tx.compute_id() != tx.id {
        return Err(TesseraError::Malformed("transaction id does not match body".into()));
    }
    if tx.witnesses.is_empty() {
        return Err(TesseraError::InvalidSignature);
    }
    for witness in &tx.witnesses {
        verify_signature(&witness.pubkey, tx.id.as_bytes(), &witness.signature)?;
    }

    // ── Stage 4: ownership ───────────────────────────────────────────────────
    let mut seen_pubkeys = HashSet::new();
    for witness in &tx.witnesses {
        if !seen_pubkeys.insert(witness.pubkey.clone()) {
            return Err(TesseraError::RuleViolation("duplicate witness".into()));
        }
    }
    let mut witness_addresses: HashSet<Address> = HashSet::new();
    let needed_types: HashSet<_> = input_utxos
        .iter()
        .map(|u| u.address.address_type())
        .collect();
    for witness in &tx.witnesses {
        let pubkey_hex = witness.pubkey_hex();
        for &ty in &needed_types {
            let key = format!("{pubkey_hex}:{}", ty.marker());
            if let Some(address) = known_addresses.get(&key) {
                witness_addresses.insert(address.clone());
                continue;
            }
            match derive_address(kdf, &pubkey_hex, ty, params) {
                Ok(address) => {
                    known_addresses.insert(key, address.clone());
                    witness_addresses.insert(address);
                }
                // This key cannot own addresses of this type; not an error.
                Err(TesseraError::AddressBelowSecurityLevel) => continue,
                Err(e) => return Err(e),
            }
        }
    }
    for utxo in &input_utxos {
        if !witness_addresses.contains(&utxo.address) {
            return Err(TesseraError::InvalidSignature);
        }
    }

    // ── Stage 5: output-rule conditions ──────────────────────────────────────
    if let Some(first) = tx.outputs.first() {
        if first.rule == UtxoRule::SigOrSlash && fee < first.amount {
            return Err(TesseraError::RuleViolation(format!(
                "stake of {} requires a fee of at least as much, got {fee}",
                first.amount
            )));
        }
    }

    Ok(fee)
}

/// Stage 6: block-scoped double-spend check. No two user transactions may
/// consume the same anchor, and every consumed anchor must still exist at
/// digest time.
pub fn validate_block_txs(
    block: &Block,
    lookup: &dyn Fn(&Anchor) -> Option<Utxo>,
) -> Result<(), TesseraError> {
    let mut consumed: HashSet<Anchor> = HashSet::new();
    for tx in block.user_txs() {
        for anchor in tx.spent_anchors() {
            if !consumed.insert(anchor) {
                return Err(TesseraError::DoubleSpend(anchor.to_string()));
            }
            if lookup(&anchor).is_none() {
                return Err(TesseraError::UnknownUtxo(anchor.to_string()));
            }
        }
    }
    Ok(())
}

/// Block-level structural checks: linkage, timestamps, the difficulty
/// predicate, reward placement and reward amounts.
///
/// The coinbase output must equal the pure schedule plus this block's fees;
/// the PoS reward must equal the schedule exactly.
pub fn validate_block_structure(
    block: &Block,
    prev: Option<&Block>,
    params: &ChainParams,
    now_ms: TimestampMs,
    lookup: &dyn Fn(&Anchor) -> Option<Utxo>,
) -> Result<(), TesseraError> {
    let expected_index = prev.map_or(0, |p| p.index + 1);
    if block.index != expected_index {
        return Err(TesseraError::Malformed(format!(
            "block index {} where {expected_index} expected",
            block.index
        )));
    }
    let expected_prev = prev.map_or(tessera_core::types::BlockHash::ZERO, |p| p.hash);
    if block.prev_hash != expected_prev {
        return Err(TesseraError::Malformed("previous-hash link broken".into()));
    }

    if let Some(prev) = prev {
        if block.pos_timestamp <= prev.timestamp {
            return Err(TesseraError::Malformed(
                "pos timestamp does not advance past the previous block".into(),
            ));
        }
    }
    if block.timestamp > now_ms + params.max_timestamp_drift_ms {
        return Err(TesseraError::Malformed("block timestamp is in the future".into()));
    }

    if block.compute_hash() != block.hash {
        return Err(TesseraError::Malformed("block hash does not match contents".into()));
    }
    if !hash_meets_difficulty(block.hash.as_bytes(), block.difficulty) {
        return Err(TesseraError::BadDifficulty { difficulty: block.difficulty });
    }

    // ── Reward slots ─────────────────────────────────────────────────────────
    let coinbase = block
        .coinbase()
        .ok_or_else(|| TesseraError::Malformed("first transaction is not the coinbase".into()))?;
    let pos_tx = block
        .pos_reward_tx()
        .ok_or_else(|| TesseraError::Malformed("second transaction is not the PoS reward".into()))?;
    if block.user_txs().iter().any(Transaction::is_special) {
        return Err(TesseraError::Malformed("reward transaction outside its slot".into()));
    }

    let fees = block.total_fees(|anchor| lookup(anchor).map(|u| u.amount))?;
    let expected_coinbase = coinbase_reward(block.index, params) + fees;
    if coinbase.outputs[0].amount != expected_coinbase {
        return Err(TesseraError::RuleViolation(format!(
            "coinbase pays {} where {expected_coinbase} expected",
            coinbase.outputs[0].amount
        )));
    }
    let expected_pos = pos_reward(block.index, params);
    if pos_tx.outputs[0].amount != expected_pos {
        return Err(TesseraError::RuleViolation(format!(
            "pos reward pays {} where {expected_pos} expected",
            pos_tx.outputs[0].amount
        )));
    }

    Ok(())
}

/// Verify the validator's PoS signature: present, valid over the block
/// hash, and issued by the expected validator when one is known.
pub fn validate_pos_signature(
    block: &Block,
    kdf: &Kdf,
    params: &ChainParams,
    expected_validator: Option<&Address>,
    known_addresses: &mut AddressCache,
) -> Result<(), TesseraError> {
    let witness = block
        .pos_signature
        .as_ref()
        .ok_or(TesseraError::InvalidSignature)?;
    verify_signature(&witness.pubkey, block.hash.as_bytes(), &witness.signature)?;

    if let Some(expected) = expected_validator {
        let pubkey_hex = witness.pubkey_hex();
        let ty = expected.address_type();
        let key = format!("{pubkey_hex}:{}", ty.marker());
        let derived = match known_addresses.get(&key) {
            Some(address) => address.clone(),
            None => {
                let address = derive_address(kdf, &pubkey_hex, ty, params)
                    .map_err(|_| TesseraError::InvalidSignature)?;
                known_addresses.insert(key, address.clone());
                address
            }
        };
        if derived != *expected {
            return Err(TesseraError::InvalidSignature);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::params::Network;
    use tessera_core::transaction::TxOutput;
    use tessera_core::types::AddressType;
    use tessera_crypto::kdf::KdfProfile;
    use tessera_wallet::{Account, TransactionBuilder, Wallet};

    struct Fixture {
        kdf: Kdf,
        params: ChainParams,
        sender: Account,
        cache: AddressCache,
    }

    fn fixture() -> Fixture {
        let params = ChainParams::dev();
        let kdf = Kdf::new(KdfProfile::Dev, Network::Dev).unwrap();
        let mut wallet =
            Wallet::from_mnemonic("validation fixture", kdf.clone(), params.clone()).unwrap();
        let sender = wallet.derive_accounts(1, AddressType::W).unwrap().remove(0);
        Fixture { kdf, params, sender, cache: AddressCache::new() }
    }

    fn fund(owner: &Address, amount: Amount) -> Utxo {
        Utxo {
            anchor: Anchor::new(1, 0, 0),
            amount,
            address: owner.clone(),
            rule: UtxoRule::Sig,
        }
    }

    fn recipient() -> Address {
        Address::from_parts(AddressType::W, "3v62vx3SgHZHm4QZ8eW7uDYdV")
    }

    fn signed_transfer(fx: &Fixture, utxo: &Utxo, amount: Amount) -> Transaction {
        let mut tx = TransactionBuilder::create_transfer(
            &fx.sender,
            std::slice::from_ref(utxo),
            vec![TxOutput::new(amount, recipient(), UtxoRule::Sig)],
            1,
        )
        .unwrap();
        TransactionBuilder::sign(&mut tx, &[&fx.sender]);
        tx
    }

    #[test]
    fn valid_transfer_passes_with_positive_fee() {
        let mut fx = fixture();
        let utxo = fund(fx.sender.address(), 5_000_000);
        let tx = signed_transfer(&fx, &utxo, 1_000_000);

        let lookup = |a: &Anchor| (*a == utxo.anchor).then(|| utxo.clone());
        let fee =
            validate_transaction(&tx, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap();
        assert!(fee > 0);

        // Second run hits the address cache.
        assert!(!fx.cache.is_empty());
        validate_transaction(&tx, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap();
    }

    #[test]
    fn unknown_utxo_fails_stage_one() {
        let mut fx = fixture();
        let utxo = fund(fx.sender.address(), 5_000_000);
        let tx = signed_transfer(&fx, &utxo, 1_000_000);

        let lookup = |_: &Anchor| None;
        let err =
            validate_transaction(&tx, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap_err();
        assert!(matches!(err, TesseraError::UnknownUtxo(_)));
    }

    #[test]
    fn tampered_output_breaks_id() {
        let mut fx = fixture();
        let utxo = fund(fx.sender.address(), 5_000_000);
        let mut tx = signed_transfer(&fx, &utxo, 1_000_000);
        tx.outputs[0].amount -= 1;

        let lookup = |a: &Anchor| (*a == utxo.anchor).then(|| utxo.clone());
        let err =
            validate_transaction(&tx, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap_err();
        assert!(matches!(err, TesseraError::Malformed(_)));
    }

    #[test]
    fn unsigned_transfer_rejected() {
        let mut fx = fixture();
        let utxo = fund(fx.sender.address(), 5_000_000);
        let mut tx = signed_transfer(&fx, &utxo, 1_000_000);
        tx.witnesses.clear();

        let lookup = |a: &Anchor| (*a == utxo.anchor).then(|| utxo.clone());
        let err =
            validate_transaction(&tx, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap_err();
        assert!(matches!(err, TesseraError::InvalidSignature));
    }

    #[test]
    fn foreign_witness_fails_ownership() {
        let mut fx = fixture();
        // UTXO owned by someone who is not the signer.
        let utxo = fund(&recipient(), 5_000_000);
        let mut tx = Transaction::assemble(
            1,
            vec![TxInput::Utxo(utxo.anchor)],
            vec![TxOutput::new(1_000_000, recipient(), UtxoRule::Sig)],
        );
        TransactionBuilder::sign(&mut tx, &[&fx.sender]);

        let lookup = |a: &Anchor| (*a == utxo.anchor).then(|| utxo.clone());
        let err =
            validate_transaction(&tx, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap_err();
        assert!(matches!(err, TesseraError::InvalidSignature));
    }

    #[test]
    fn duplicate_witness_rejected() {
        let mut fx = fixture();
        let utxo = fund(fx.sender.address(), 5_000_000);
        let mut tx = signed_transfer(&fx, &utxo, 1_000_000);
        tx.witnesses.push(tx.witnesses[0].clone());

        let lookup = |a: &Anchor| (*a == utxo.anchor).then(|| utxo.clone());
        let err =
            validate_transaction(&tx, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap_err();
        assert!(matches!(err, TesseraError::RuleViolation(_)));
    }

    #[test]
    fn misplaced_stake_rule_rejected() {
        let mut fx = fixture();
        let utxo = fund(fx.sender.address(), 5_000_000);
        let stake_sink = Address::from_parts(AddressType::S, "4fP9qQmC1yUuWxEjT2nRbKdZe");
        let mut tx = Transaction::assemble(
            1,
            vec![TxInput::Utxo(utxo.anchor)],
            vec![
                TxOutput::new(1_000_000, recipient(), UtxoRule::Sig),
                TxOutput::new(1_000_000, stake_sink, UtxoRule::SigOrSlash),
            ],
        );
        TransactionBuilder::sign(&mut tx, &[&fx.sender]);

        let lookup = |a: &Anchor| (*a == utxo.anchor).then(|| utxo.clone());
        let err =
            validate_transaction(&tx, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap_err();
        assert!(matches!(err, TesseraError::RuleViolation(_)));
    }

    #[test]
    fn stake_fee_floor_enforced() {
        let mut fx = fixture();
        let utxo = fund(fx.sender.address(), 5_000_000);
        let stake_sink = Address::from_parts(AddressType::S, "4fP9qQmC1yUuWxEjT2nRbKdZe");
        // Hand-built stake paying a fee below the staked amount.
        let mut tx = Transaction::assemble(
            1,
            vec![TxInput::Utxo(utxo.anchor)],
            vec![
                TxOutput::new(2_000_000, stake_sink, UtxoRule::SigOrSlash),
                TxOutput::new(2_900_000, fx.sender.address().clone(), UtxoRule::Sig),
            ],
        );
        TransactionBuilder::sign(&mut tx, &[&fx.sender]);

        let lookup = |a: &Anchor| (*a == utxo.anchor).then(|| utxo.clone());
        let err =
            validate_transaction(&tx, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap_err();
        assert!(matches!(err, TesseraError::RuleViolation(_)));
    }

    #[test]
    fn coinbase_bypasses_late_stages() {
        let mut fx = fixture();
        let cb = Transaction::coinbase(3, recipient(), 1_000_000);
        let lookup = |_: &Anchor| None;
        let fee = validate_transaction(&cb, &lookup, &fx.kdf, &fx.params, &mut fx.cache).unwrap();
        assert_eq!(fee, 0);
    }

    #[test]
    fn block_level_double_spend_detected() {
        let fx = fixture();
        let utxo = fund(fx.sender.address(), 5_000_000);
        let tx_a = signed_transfer(&fx, &utxo, 1_000_000);
        let tx_b = signed_transfer(&fx, &utxo, 2_000_000);

        let block = Block::candidate(
            2,
            tessera_core::types::BlockHash::ZERO,
            1,
            1,
            0,
            vec![
                Transaction::coinbase(2, recipient(), 1_000_000),
                Transaction::pos_reward(2, recipient(), 250_000),
                tx_a,
                tx_b,
            ],
        );
        let lookup = |a: &Anchor| (*a == utxo.anchor).then(|| utxo.clone());
        let err = validate_block_txs(&block, &lookup).unwrap_err();
        assert!(matches!(err, TesseraError::DoubleSpend(_)));
    }
}
