//! The UTXO cache: the authoritative in-memory ledger state.
//!
//! Owned exclusively by the node; external readers take a snapshot. Block
//! digestion is atomic per block: every mutation is staged and verified
//! before anything is applied, so a failing block leaves the cache exactly
//! as it was.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use tessera_core::block::Block;
use tessera_core::types::{Address, Amount, Anchor, Utxo, UtxoRule};
use tessera_core::TesseraError;

/// An owned, read-only copy of the full cache state. Doubles as the
/// checkpoint format for reorg atomicity.
#[derive(Clone, Debug)]
pub struct UtxoSnapshot {
    pub utxos: HashMap<Anchor, Utxo>,
    pub by_address: BTreeMap<Address, BTreeSet<Anchor>>,
    pub balances: BTreeMap<Address, Amount>,
    pub height: Option<u64>,
}

pub struct UtxoCache {
    utxos: HashMap<Anchor, Utxo>,
    /// address → anchors, maintained incrementally with `balances`.
    by_address: BTreeMap<Address, BTreeSet<Anchor>>,
    balances: BTreeMap<Address, Amount>,
    /// Index of the last digested block.
    height: Option<u64>,
    /// Confirmation depth before a SigOrSlash output becomes spendable.
    stake_maturity: u64,
}

impl UtxoCache {
    pub fn new(stake_maturity: u64) -> Self {
        Self {
            utxos: HashMap::new(),
            by_address: BTreeMap::new(),
            balances: BTreeMap::new(),
            height: None,
            stake_maturity,
        }
    }

    pub fn get(&self, anchor: &Anchor) -> Option<&Utxo> {
        self.utxos.get(anchor)
    }

    pub fn contains(&self, anchor: &Anchor) -> bool {
        self.utxos.contains_key(anchor)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// Index of the last digested block.
    pub fn height(&self) -> Option<u64> {
        self.height
    }

    /// Balance, spendable balance, and the spendable UTXOs of `address`.
    ///
    /// `spendable` excludes SigOrSlash outputs younger than the maturity
    /// depth; `balance` counts everything.
    pub fn balance_and_spendable(&self, address: &Address) -> (Amount, Amount, Vec<Utxo>) {
        let balance = self.balances.get(address).copied().unwrap_or(0);
        let mut spendable = 0u64;
        let mut utxos = Vec::new();
        if let Some(anchors) = self.by_address.get(address) {
            for anchor in anchors {
                let utxo = &self.utxos[anchor];
                if self.is_spendable(utxo) {
                    spendable += utxo.amount;
                    utxos.push(utxo.clone());
                }
            }
        }
        (balance, spendable, utxos)
    }

    fn is_spendable(&self, utxo: &Utxo) -> bool {
        match utxo.rule {
            UtxoRule::Sig => true,
            UtxoRule::SigOrSlash => {
                let tip = self.height.unwrap_or(0);
                tip >= utxo.anchor.height + self.stake_maturity
            }
        }
    }

    // ── Digestion ────────────────────────────────────────────────────────────

    /// Digest a run of consecutive blocks, returning every newly minted
    /// stake (SigOrSlash) output in digestion order.
    ///
    /// Atomic per block: a block whose transactions reference a missing
    /// anchor fails with `InconsistentDigest` and leaves no trace.
    pub fn digest_chain_part(&mut self, blocks: &[Block]) -> Result<Vec<Utxo>, TesseraError> {
        let mut new_stakes = Vec::new();
        for block in blocks {
            new_stakes.extend(self.digest_block(block)?);
        }
        Ok(new_stakes)
    }

    fn digest_block(&mut self, block: &Block) -> Result<Vec<Utxo>, TesseraError> {
        // Digestion is strictly monotonic in block index.
        let expected = self.height.map_or(0, |h| h + 1);
        if block.index != expected {
            return Err(TesseraError::InconsistentDigest {
                height: block.index,
                reason: format!("expected block {expected}"),
            });
        }

        // ── Stage ────────────────────────────────────────────────────────────
        let mut consumed: HashSet<Anchor> = HashSet::new();
        let mut minted: Vec<Utxo> = Vec::new();

        for (tx_index, tx) in block.txs.iter().enumerate() {
            for anchor in tx.spent_anchors() {
                if !self.utxos.contains_key(&anchor) || !consumed.insert(anchor) {
                    return Err(TesseraError::InconsistentDigest {
                        height: block.index,
                        reason: format!("missing or reused anchor {anchor}"),
                    });
                }
            }
            for (output_index, output) in tx.outputs.iter().enumerate() {
                minted.push(Utxo {
                    anchor: Anchor::new(block.index, tx_index as u16, output_index as u16),
                    amount: output.amount,
                    address: output.address.clone(),
                    rule: output.rule,
                });
            }
        }

        // ── Apply ────────────────────────────────────────────────────────────
        for anchor in &consumed {
            self.remove_utxo(anchor);
        }
        let mut new_stakes = Vec::new();
        for utxo in minted {
            if utxo.rule == UtxoRule::SigOrSlash {
                new_stakes.push(utxo.clone());
            }
            self.insert_utxo(utxo);
        }
        self.height = Some(block.index);

        debug!(
            height = block.index,
            consumed = consumed.len(),
            utxos = self.utxos.len(),
            "digested block"
        );
        Ok(new_stakes)
    }

    /// Undo the most recently digested block. `resolve` reconstructs the
    /// UTXOs this block consumed (from chain history); minted outputs are
    /// removed, consumed ones reinstated.
    pub fn revert_block<F>(&mut self, block: &Block, resolve: F) -> Result<(), TesseraError>
    where
        F: Fn(&Anchor) -> Option<Utxo>,
    {
        if self.height != Some(block.index) {
            return Err(TesseraError::InconsistentDigest {
                height: block.index,
                reason: "revert out of order".into(),
            });
        }

        // Stage the reinstated inputs first so a bad resolver cannot leave
        // the cache half-reverted.
        let mut reinstated = Vec::new();
        for tx in &block.txs {
            for anchor in tx.spent_anchors() {
                let utxo = resolve(&anchor).ok_or_else(|| TesseraError::InconsistentDigest {
                    height: block.index,
                    reason: format!("cannot reconstruct consumed utxo {anchor}"),
                })?;
                reinstated.push(utxo);
            }
        }

        for (tx_index, tx) in block.txs.iter().enumerate() {
            for output_index in 0..tx.outputs.len() {
                let anchor = Anchor::new(block.index, tx_index as u16, output_index as u16);
                self.remove_utxo(&anchor);
            }
        }
        for utxo in reinstated {
            self.insert_utxo(utxo);
        }
        self.height = if block.index == 0 { None } else { Some(block.index - 1) };
        Ok(())
    }

    fn insert_utxo(&mut self, utxo: Utxo) {
        *self.balances.entry(utxo.address.clone()).or_insert(0) += utxo.amount;
        self.by_address
            .entry(utxo.address.clone())
            .or_default()
            .insert(utxo.anchor);
        self.utxos.insert(utxo.anchor, utxo);
    }

    fn remove_utxo(&mut self, anchor: &Anchor) {
        if let Some(utxo) = self.utxos.remove(anchor) {
            if let Some(balance) = self.balances.get_mut(&utxo.address) {
                *balance -= utxo.amount;
                if *balance == 0 {
                    self.balances.remove(&utxo.address);
                }
            }
            if let Some(anchors) = self.by_address.get_mut(&utxo.address) {
                anchors.remove(anchor);
                if anchors.is_empty() {
                    self.by_address.remove(&utxo.address);
                }
            }
        }
    }

    // ── Snapshots ────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> UtxoSnapshot {
        UtxoSnapshot {
            utxos: self.utxos.clone(),
            by_address: self.by_address.clone(),
            balances: self.balances.clone(),
            height: self.height,
        }
    }

    /// Replace the entire state with `snapshot`. Reorg atomicity depends on
    /// this being the exact inverse of `snapshot()`.
    pub fn restore(&mut self, snapshot: UtxoSnapshot) {
        self.utxos = snapshot.utxos;
        self.by_address = snapshot.by_address;
        self.balances = snapshot.balances;
        self.height = snapshot.height;
    }

    /// Iterate every live UTXO (arbitrary order).
    pub fn utxos(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.values()
    }

    // ── Accounting invariants (used by tests and sanity checks) ──────────────

    /// Σ over all UTXO amounts.
    pub fn total_supply(&self) -> Amount {
        self.utxos.values().map(|u| u.amount).sum()
    }

    /// Σ over the per-address balance index. Always equals `total_supply`.
    pub fn total_balances(&self) -> Amount {
        self.balances.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::block::Block;
    use tessera_core::transaction::{Transaction, TxInput, TxOutput};
    use tessera_core::types::{AddressType, BlockHash};

    fn addr(c: AddressType, body: &str) -> Address {
        Address::from_parts(c, body)
    }

    fn miner() -> Address {
        addr(AddressType::W, "3v62vx3SgHZHm4QZ8eW7uDYdV")
    }

    fn validator() -> Address {
        addr(AddressType::W, "7uDYdV3v62vx3SgHZHm4QZ8eW")
    }

    fn reward_block(index: u64, extra: Vec<Transaction>) -> Block {
        let mut txs = vec![
            Transaction::coinbase(index, miner(), 1_000_000),
            Transaction::pos_reward(index, validator(), 250_000),
        ];
        txs.extend(extra);
        Block::candidate(index, BlockHash::ZERO, 1, 16, 0, txs)
    }

    #[test]
    fn digest_mints_rewards() {
        let mut cache = UtxoCache::new(2);
        cache.digest_chain_part(&[reward_block(0, vec![])]).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.height(), Some(0));
        let (balance, spendable, utxos) = cache.balance_and_spendable(&miner());
        assert_eq!(balance, 1_000_000);
        assert_eq!(spendable, 1_000_000);
        assert_eq!(utxos.len(), 1);
        assert_eq!(cache.total_supply(), cache.total_balances());
    }

    #[test]
    fn digest_spends_and_mints() {
        let mut cache = UtxoCache::new(2);
        cache.digest_chain_part(&[reward_block(0, vec![])]).unwrap();

        // Spend the miner's coinbase output (anchor 0:0:0).
        let spend = Transaction::assemble(
            1,
            vec![TxInput::Utxo(Anchor::new(0, 0, 0))],
            vec![TxOutput::new(900_000, validator(), UtxoRule::Sig)],
        );
        cache.digest_chain_part(&[reward_block(1, vec![spend])]).unwrap();

        assert!(cache.get(&Anchor::new(0, 0, 0)).is_none());
        let (balance, _, _) = cache.balance_and_spendable(&miner());
        assert_eq!(balance, 1_000_000, "miner keeps only the second coinbase");
        let (vbalance, _, _) = cache.balance_and_spendable(&validator());
        assert_eq!(vbalance, 250_000 * 2 + 900_000);
        assert_eq!(cache.total_supply(), cache.total_balances());
    }

    #[test]
    fn missing_input_rolls_back_whole_block() {
        let mut cache = UtxoCache::new(2);
        cache.digest_chain_part(&[reward_block(0, vec![])]).unwrap();
        let before = cache.snapshot();

        let bad = Transaction::assemble(
            1,
            vec![TxInput::Utxo(Anchor::new(99, 0, 0))],
            vec![TxOutput::new(1, miner(), UtxoRule::Sig)],
        );
        let err = cache
            .digest_chain_part(&[reward_block(1, vec![bad])])
            .unwrap_err();
        assert!(matches!(err, TesseraError::InconsistentDigest { height: 1, .. }));

        // Nothing from the failing block leaked in.
        assert_eq!(cache.len(), before.utxos.len());
        assert_eq!(cache.height(), Some(0));
    }

    #[test]
    fn intra_block_anchor_reuse_fails() {
        let mut cache = UtxoCache::new(2);
        cache.digest_chain_part(&[reward_block(0, vec![])]).unwrap();

        let spend = |amount| {
            Transaction::assemble(
                1,
                vec![TxInput::Utxo(Anchor::new(0, 0, 0))],
                vec![TxOutput::new(amount, validator(), UtxoRule::Sig)],
            )
        };
        let err = cache
            .digest_chain_part(&[reward_block(1, vec![spend(1), spend(2)])])
            .unwrap_err();
        assert!(matches!(err, TesseraError::InconsistentDigest { .. }));
    }

    #[test]
    fn out_of_order_digest_rejected() {
        let mut cache = UtxoCache::new(2);
        let err = cache.digest_chain_part(&[reward_block(5, vec![])]).unwrap_err();
        assert!(matches!(err, TesseraError::InconsistentDigest { height: 5, .. }));
    }

    #[test]
    fn stake_outputs_mature() {
        let mut cache = UtxoCache::new(2);
        let stake_addr = addr(AddressType::S, "4fP9qQmC1yUuWxEjT2nRbKdZe");
        let stake = Transaction::assemble(
            1,
            vec![TxInput::Utxo(Anchor::new(0, 0, 0))],
            vec![TxOutput::new(400_000, stake_addr.clone(), UtxoRule::SigOrSlash)],
        );

        let new_stakes = cache
            .digest_chain_part(&[reward_block(0, vec![]), reward_block(1, vec![stake])])
            .unwrap();
        assert_eq!(new_stakes.len(), 1);
        assert_eq!(new_stakes[0].address, stake_addr);

        // Immature: counts toward balance, not spendable.
        let (balance, spendable, _) = cache.balance_and_spendable(&stake_addr);
        assert_eq!(balance, 400_000);
        assert_eq!(spendable, 0);

        cache.digest_chain_part(&[reward_block(2, vec![])]).unwrap();
        cache.digest_chain_part(&[reward_block(3, vec![])]).unwrap();

        // Minted at height 1, maturity 2 → spendable once height >= 3.
        let (_, spendable, utxos) = cache.balance_and_spendable(&stake_addr);
        assert_eq!(spendable, 400_000);
        assert_eq!(utxos.len(), 1);
    }

    #[test]
    fn revert_restores_previous_state() {
        let mut cache = UtxoCache::new(2);
        let genesis = reward_block(0, vec![]);
        cache.digest_chain_part(std::slice::from_ref(&genesis)).unwrap();
        let before = cache.snapshot();

        let spend = Transaction::assemble(
            1,
            vec![TxInput::Utxo(Anchor::new(0, 0, 0))],
            vec![TxOutput::new(800_000, validator(), UtxoRule::Sig)],
        );
        let block1 = reward_block(1, vec![spend]);
        cache.digest_chain_part(std::slice::from_ref(&block1)).unwrap();

        // Reconstruct consumed outputs from the chain history.
        let chain = vec![genesis.clone(), block1.clone()];
        cache
            .revert_block(&block1, |anchor| {
                let tx = &chain[anchor.height as usize].txs[anchor.tx_index as usize];
                let output = &tx.outputs[anchor.output_index as usize];
                Some(Utxo {
                    anchor: *anchor,
                    amount: output.amount,
                    address: output.address.clone(),
                    rule: output.rule,
                })
            })
            .unwrap();

        assert_eq!(cache.height(), Some(0));
        assert_eq!(cache.len(), before.utxos.len());
        assert_eq!(cache.total_supply(), before.utxos.values().map(|u| u.amount).sum::<u64>());
        assert!(cache.contains(&Anchor::new(0, 0, 0)));
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut cache = UtxoCache::new(2);
        cache.digest_chain_part(&[reward_block(0, vec![])]).unwrap();
        let snap = cache.snapshot();

        cache.digest_chain_part(&[reward_block(1, vec![])]).unwrap();
        assert_eq!(cache.len(), 4);

        cache.restore(snap);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.height(), Some(0));
    }
}
