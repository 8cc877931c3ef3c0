//! The blockchain state machine.
//!
//! A block moves through: candidate assembly → PoW proposal → PoS signature
//! → finalization → digestion. The `Blockchain` owns every piece of ledger
//! state (chain, UTXO cache, VSS, mempool, pubkey→address cache) and is the
//! single writer for all of it; digestion is strictly serialized and
//! monotonic in block index.

use std::collections::HashMap;

use tracing::{info, warn};

use tessera_consensus::{
    coinbase_reward, next_difficulty, pos_reward, selection_seed, validate_block_structure,
    validate_block_txs, validate_pos_signature, validate_transaction, AddressCache, Vss,
};
use tessera_core::block::Block;
use tessera_core::transaction::{Transaction, Witness};
use tessera_core::types::{Address, Amount, Anchor, BlockHash, TimestampMs, Utxo, UtxoRule};
use tessera_core::{ChainParams, TesseraError};
use tessera_crypto::kdf::Kdf;
use tessera_crypto::Keypair;
use tessera_miner::Miner;
use tessera_p2p::{is_behind, plan_batches, BlockRangeRequest, StatusResponse};
use tessera_state::UtxoCache;
use tessera_storage::BlockStore;

use crate::mempool::Mempool;

pub struct Blockchain {
    params: ChainParams,
    kdf: Kdf,
    miner_address: Address,
    chain: Vec<Block>,
    utxo: UtxoCache,
    vss: Vss,
    mempool: Mempool,
    known_addresses: AddressCache,
    /// PoS signing keys this node controls, by address.
    validator_keys: HashMap<Address, Keypair>,
    candidate: Option<Block>,
    legitimacy: u32,
    store: Option<BlockStore>,
    /// PoS reward recipient while the stake registry is empty (bootstrap).
    fallback_validator: Option<Address>,
}

impl Blockchain {
    pub fn new(
        params: ChainParams,
        kdf: Kdf,
        miner_address: Address,
        store: Option<BlockStore>,
    ) -> Self {
        let mempool = Mempool::new(params.mempool_max_bytes, params.mempool_max_txs);
        let utxo = UtxoCache::new(params.stake_maturity);
        Self {
            params,
            kdf,
            miner_address,
            chain: Vec::new(),
            utxo,
            vss: Vss::new(),
            mempool,
            known_addresses: AddressCache::new(),
            validator_keys: HashMap::new(),
            candidate: None,
            legitimacy: 0,
            store,
            fallback_validator: None,
        }
    }

    /// Choose who collects PoS rewards while nothing is staked yet. Defaults
    /// to the miner address.
    pub fn set_fallback_validator(&mut self, address: Address) {
        self.fallback_validator = Some(address);
    }

    /// Attach block storage. Done after replaying existing blocks so the
    /// replay does not rewrite what is already on disk.
    pub fn attach_store(&mut self, store: BlockStore) {
        self.store = Some(store);
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn head(&self) -> Option<&Block> {
        self.chain.last()
    }

    /// Number of finalized blocks (the next block's index).
    pub fn height(&self) -> u64 {
        self.chain.len() as u64
    }

    pub fn block_at(&self, index: u64) -> Option<&Block> {
        self.chain.get(index as usize)
    }

    pub fn utxo_cache(&self) -> &UtxoCache {
        &self.utxo
    }

    pub fn vss(&self) -> &Vss {
        &self.vss
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn legitimacy(&self) -> u32 {
        self.legitimacy
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            height: self.height(),
            hash: self.head().map_or(BlockHash::ZERO, |b| b.hash),
            timestamp: self.head().map_or(0, |b| b.timestamp),
        }
    }

    /// Register a keypair whose address this node may PoS-sign for.
    pub fn register_validator_key(&mut self, address: Address, keypair: Keypair) {
        self.validator_keys.insert(address, keypair);
    }

    // ── Mempool entry ────────────────────────────────────────────────────────

    /// Validate (stages 1–5) and admit a transaction. Rejections drop the
    /// transaction; they are reported to the source, not punished.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<(), TesseraError> {
        if tx.is_special() {
            return Err(TesseraError::Malformed(
                "reward transactions cannot enter the mempool".into(),
            ));
        }
        let utxo = &self.utxo;
        let fee = validate_transaction(
            &tx,
            &|anchor| utxo.get(anchor).cloned(),
            &self.kdf,
            &self.params,
            &mut self.known_addresses,
        )?;
        self.mempool.insert(tx, fee)
    }

    // ── Candidate assembly ───────────────────────────────────────────────────

    /// The validator the VSS draw picks for the next block at the given
    /// legitimacy round. Falls back to the miner while nothing is staked.
    pub fn selected_validator(&self, legitimacy: u32) -> Address {
        let prev_hash = self.head().map_or(BlockHash::ZERO, |b| b.hash);
        let seed = selection_seed(&prev_hash, legitimacy);
        self.vss
            .select_signer(&seed)
            .cloned()
            .or_else(|| self.fallback_validator.clone())
            .unwrap_or_else(|| self.miner_address.clone())
    }

    /// Assemble the next candidate: drain the mempool under the byte bound,
    /// prepend the coinbase and the PoS reward, pick difficulty and the
    /// validator. Returns a clone for the miner.
    pub fn assemble_candidate(&mut self, now_ms: TimestampMs) -> Result<Block, TesseraError> {
        let index = self.height();
        let prev_hash = self.head().map_or(BlockHash::ZERO, |b| b.hash);
        let difficulty = self.next_block_difficulty();
        let validator = self.selected_validator(self.legitimacy);

        // Re-validate selected transactions against the current UTXO set;
        // anything stale is dropped from the pool, not punished.
        let mut user_txs = Vec::new();
        let mut fees: Amount = 0;
        for tx in self.mempool.select_for_candidate(self.params.candidate_max_bytes) {
            let utxo = &self.utxo;
            match validate_transaction(
                &tx,
                &|anchor| utxo.get(anchor).cloned(),
                &self.kdf,
                &self.params,
                &mut self.known_addresses,
            ) {
                Ok(fee) => {
                    fees += fee;
                    user_txs.push(tx);
                }
                Err(e) => {
                    warn!(tx = %tx.id, error = %e, "dropping stale mempool entry");
                    self.mempool.remove(&tx.id);
                }
            }
        }

        let mut txs = Vec::with_capacity(user_txs.len() + 2);
        txs.push(Transaction::coinbase(
            index,
            self.miner_address.clone(),
            coinbase_reward(index, &self.params) + fees,
        ));
        txs.push(Transaction::pos_reward(
            index,
            validator,
            pos_reward(index, &self.params),
        ));
        txs.extend(user_txs);

        let pos_timestamp = now_ms.max(self.head().map_or(i64::MIN, |b| b.timestamp) + 1);
        let candidate = Block::candidate(
            index,
            prev_hash,
            pos_timestamp,
            difficulty,
            self.legitimacy,
            txs,
        );
        self.candidate = Some(candidate.clone());
        Ok(candidate)
    }

    fn next_block_difficulty(&self) -> u32 {
        let current = self
            .head()
            .map_or(self.params.initial_difficulty, |b| b.difficulty);
        let window = self.params.retarget_interval as usize + 1;
        let timestamps: Vec<TimestampMs> = self
            .chain
            .iter()
            .rev()
            .take(window)
            .map(|b| b.timestamp)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        next_difficulty(self.height(), current, &timestamps, &self.params)
    }

    /// Abandon the current round and reselect with the next legitimacy
    /// counter (the selected validator was unable to sign).
    pub fn bump_legitimacy(&mut self) {
        self.legitimacy += 1;
        self.candidate = None;
    }

    // ── PoW proposal → PoS signature ─────────────────────────────────────────

    /// Accept a miner's nonce for the current candidate: verify the
    /// difficulty predicate, stamp the timestamp, and PoS-sign with the
    /// selected validator's key. Returns the signed block, ready for
    /// [`Blockchain::finalize`].
    pub fn block_proposal(
        &mut self,
        nonce: u64,
        hash_time_ms: u64,
        now_ms: TimestampMs,
    ) -> Result<Block, TesseraError> {
        let head_hash = self.head().map_or(BlockHash::ZERO, |b| b.hash);
        let candidate = self.candidate.as_ref().ok_or_else(|| {
            TesseraError::StaleCandidate { expected_prev: head_hash.to_hex() }
        })?;
        if candidate.prev_hash != head_hash {
            return Err(TesseraError::StaleCandidate { expected_prev: head_hash.to_hex() });
        }

        let mut block = candidate.clone();
        let hash = Block::hash_with_nonce(&block.pow_preimage(), nonce);
        if !tessera_crypto::hash_meets_difficulty(hash.as_bytes(), block.difficulty) {
            return Err(TesseraError::BadDifficulty { difficulty: block.difficulty });
        }
        block.nonce = nonce;
        block.hash = hash;
        block.timestamp = now_ms.max(block.pos_timestamp + 1);

        let validator = block
            .pos_reward_tx()
            .map(|tx| tx.outputs[0].address.clone())
            .ok_or_else(|| TesseraError::Malformed("candidate lacks a PoS reward slot".into()))?;
        let keypair = self.validator_keys.get(&validator).ok_or_else(|| {
            TesseraError::RuleViolation(format!("no signing key for validator {validator}"))
        })?;
        block.pos_signature = Some(Witness::new(
            keypair.sign(block.hash.as_bytes()),
            keypair.public_bytes().to_vec(),
        ));

        info!(
            index = block.index,
            hash = %block.hash,
            hash_time_ms,
            "PoW proposal accepted and PoS-signed"
        );
        Ok(block)
    }

    // ── Finalization ─────────────────────────────────────────────────────────

    /// Fully validate and apply a signed block: digest into the UTXO cache,
    /// feed the VSS, advance the head, drop confirmed mempool entries and
    /// persist to storage. Used for both locally mined and peer blocks.
    pub fn finalize(&mut self, block: Block, now_ms: TimestampMs) -> Result<(), TesseraError> {
        self.validate_finalized(&block, now_ms)?;
        self.apply_block(block)
    }

    /// Validate `block` as the next block on the current chain.
    fn validate_finalized(&mut self, block: &Block, now_ms: TimestampMs) -> Result<(), TesseraError> {
        let expected_difficulty = self.next_block_difficulty();
        if block.difficulty != expected_difficulty {
            return Err(TesseraError::BadDifficulty { difficulty: expected_difficulty });
        }
        let prev = self.chain.last();
        let utxo = &self.utxo;
        let lookup = |anchor: &Anchor| utxo.get(anchor).cloned();
        validate_block_structure(block, prev, &self.params, now_ms, &lookup)?;

        // The PoS reward must go to the validator the seeded draw selects,
        // and the signature must be theirs. Before any stake exists the slot
        // is unconstrained (bootstrap), but the signature still has to match
        // the reward address.
        let expected_validator = block
            .pos_reward_tx()
            .map(|tx| tx.outputs[0].address.clone())
            .expect("structure validation guarantees the slot");
        if self.vss.total_staked() > 0 {
            let prev_hash = prev.map_or(BlockHash::ZERO, |b| b.hash);
            let seed = selection_seed(&prev_hash, block.legitimacy);
            let drawn = self
                .vss
                .select_signer(&seed)
                .expect("non-empty registry always selects")
                .clone();
            if drawn != expected_validator {
                return Err(TesseraError::RuleViolation(format!(
                    "PoS reward paid to {expected_validator} but the draw selected {drawn}"
                )));
            }
        }
        validate_pos_signature(
            block,
            &self.kdf,
            &self.params,
            Some(&expected_validator),
            &mut self.known_addresses,
        )?;

        for tx in block.user_txs() {
            validate_transaction(
                tx,
                &lookup,
                &self.kdf,
                &self.params,
                &mut self.known_addresses,
            )?;
        }
        validate_block_txs(block, &lookup)
    }

    /// Apply a validated block. Storage is written first so an I/O failure
    /// aborts before any in-memory mutation.
    fn apply_block(&mut self, block: Block) -> Result<(), TesseraError> {
        if let Some(store) = &self.store {
            store.save_block(&block)?;
            let time_between = self
                .head()
                .map_or(0, |prev| block.timestamp - prev.timestamp);
            store.append_chain_info(
                &block,
                coinbase_reward(block.index, &self.params),
                time_between,
            )?;
        }

        // Stake anchors consumed by this block leave the registry.
        let spent_stakes: Vec<Anchor> = block
            .user_txs()
            .iter()
            .flat_map(Transaction::spent_anchors)
            .filter(|anchor| {
                self.utxo
                    .get(anchor)
                    .is_some_and(|u| u.rule == UtxoRule::SigOrSlash)
            })
            .collect();

        let new_stakes = self
            .utxo
            .digest_chain_part(std::slice::from_ref(&block))?;
        for anchor in &spent_stakes {
            self.vss.remove_stake(anchor);
        }
        self.vss.new_stakes(&new_stakes);

        self.mempool.remove_confirmed(&block.txs);
        info!(index = block.index, hash = %block.hash, txs = block.txs.len(), "block finalized");
        self.chain.push(block);
        self.candidate = None;
        self.legitimacy = 0;
        Ok(())
    }

    // ── Reorg ────────────────────────────────────────────────────────────────

    /// Adopt a longer competing tail whose first block attaches at an
    /// existing height. Atomic: on any validation failure the entire ledger
    /// state (UTXO cache, VSS, chain) is restored and `ReorgRejected` is
    /// returned.
    pub fn reorg(&mut self, tail: Vec<Block>, now_ms: TimestampMs) -> Result<(), TesseraError> {
        let Some(first) = tail.first() else {
            return Err(TesseraError::ReorgRejected("empty tail".into()));
        };
        let fork_index = first.index;
        if fork_index > self.height() {
            return Err(TesseraError::ReorgRejected("tail does not attach".into()));
        }
        if fork_index + tail.len() as u64 <= self.height() {
            return Err(TesseraError::ReorgRejected(
                "competing chain is not longer".into(),
            ));
        }
        let expected_prev = if fork_index == 0 {
            BlockHash::ZERO
        } else {
            self.chain[fork_index as usize - 1].hash
        };
        if first.prev_hash != expected_prev {
            return Err(TesseraError::ReorgRejected(
                "tail does not extend the shared prefix".into(),
            ));
        }

        // ── Checkpoint ───────────────────────────────────────────────────────
        let utxo_checkpoint = self.utxo.snapshot();
        let vss_checkpoint = self.vss.clone();
        let chain_checkpoint = self.chain.clone();

        let result = self.reorg_inner(fork_index, tail, now_ms);
        if let Err(e) = result {
            self.utxo.restore(utxo_checkpoint);
            self.vss = vss_checkpoint;
            self.chain = chain_checkpoint;
            warn!(error = %e, "reorg rejected; state restored");
            return Err(TesseraError::ReorgRejected(e.to_string()));
        }

        // The pubkey→address cache may hold entries poisoned by abandoned
        // blocks; drop it wholesale.
        self.known_addresses.clear();
        self.candidate = None;
        self.legitimacy = 0;
        Ok(())
    }

    fn reorg_inner(
        &mut self,
        fork_index: u64,
        tail: Vec<Block>,
        now_ms: TimestampMs,
    ) -> Result<(), TesseraError> {
        // Roll back to the fork point, newest first.
        for index in (fork_index..self.height()).rev() {
            let chain = &self.chain;
            let block = &chain[index as usize];
            self.utxo.revert_block(block, |anchor| {
                let tx = chain
                    .get(anchor.height as usize)?
                    .txs
                    .get(anchor.tx_index as usize)?;
                let output = tx.outputs.get(anchor.output_index as usize)?;
                Some(Utxo {
                    anchor: *anchor,
                    amount: output.amount,
                    address: output.address.clone(),
                    rule: output.rule,
                })
            })?;
        }
        self.chain.truncate(fork_index as usize);
        self.vss = Vss::rebuild_from(self.utxo.utxos());
        self.known_addresses.clear();

        // Digest the competing tail with full validation.
        for block in tail {
            self.validate_finalized(&block, now_ms)?;
            self.apply_block(block)?;
        }
        info!(height = self.height(), "reorg adopted");
        Ok(())
    }

    // ── Peer sync ────────────────────────────────────────────────────────────

    /// Answer `/blockchain/blockrequest/1.0.0`: the requested blocks,
    /// clamped to the per-request cap.
    pub fn serve_block_range(&self, request: BlockRangeRequest) -> Vec<Block> {
        let (start, end) = request.clamped();
        self.chain
            .iter()
            .filter(|b| b.index >= start && b.index <= end)
            .cloned()
            .collect()
    }

    /// Compare against peer statuses and plan the pull batches needed to
    /// catch up. Empty when this node is not behind.
    pub fn sync_plan(&self, peers: &[StatusResponse]) -> Vec<BlockRangeRequest> {
        let local = self.status();
        if !is_behind(&local, peers) {
            return Vec::new();
        }
        let target = peers.iter().map(|p| p.height).max().unwrap_or(0);
        if target > local.height {
            plan_batches(local.height, target - 1)
        } else {
            // Equal height on a different fork: refetch a trailing window so
            // the competing tail can be evaluated for reorg.
            plan_batches(local.height.saturating_sub(1), target.saturating_sub(1))
        }
    }

    /// Apply blocks pulled from a peer: plain extension when they continue
    /// the chain, reorg when they attach below the head.
    pub fn apply_sync_blocks(
        &mut self,
        blocks: Vec<Block>,
        now_ms: TimestampMs,
    ) -> Result<(), TesseraError> {
        let Some(first) = blocks.first() else {
            return Ok(());
        };
        if first.index < self.height() {
            self.reorg(blocks, now_ms)
        } else {
            for block in blocks {
                self.finalize(block, now_ms)?;
            }
            Ok(())
        }
    }

    // ── Mining round (single-node convenience) ───────────────────────────────

    /// Drive one full round with an in-process miner: assemble, mine the
    /// candidate synchronously, sign and finalize. Used by tooling and
    /// tests; the node binary runs the same steps off channel events.
    pub async fn mine_one_round(
        &mut self,
        miner: &Miner,
        events: &mut tokio::sync::mpsc::Receiver<tessera_miner::MinerEvent>,
        now_ms: TimestampMs,
    ) -> Result<(), TesseraError> {
        let candidate = self.assemble_candidate(now_ms)?;
        let generation = miner.mine(candidate.pow_preimage(), candidate.difficulty);
        loop {
            match events.recv().await {
                Some(tessera_miner::MinerEvent::Solved { generation: g, nonce, hash_time_ms, .. })
                    if g == generation =>
                {
                    let signed = self.block_proposal(nonce, hash_time_ms, now_ms + 1)?;
                    return self.finalize(signed, now_ms + 2);
                }
                Some(_) => continue,
                None => return Err(TesseraError::Timeout { ms: 0 }),
            }
        }
    }
}
