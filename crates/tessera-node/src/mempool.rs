//! The pending-transaction pool.
//!
//! Entries are ranked by fee per byte. When a cap is hit, the lowest-paying
//! entries are evicted to make room for better-paying arrivals; an arrival
//! that cannot displace anyone fails with `MempoolFull`.

use std::collections::HashMap;

use tracing::debug;

use tessera_core::transaction::Transaction;
use tessera_core::types::{Amount, Anchor, TxId};
use tessera_core::TesseraError;

struct MempoolEntry {
    tx: Transaction,
    fee: Amount,
    size: usize,
}

impl MempoolEntry {
    /// Milli-micros per byte, so small transactions still rank by integer math.
    fn fee_per_byte_milli(&self) -> u64 {
        self.fee.saturating_mul(1_000) / self.size.max(1) as u64
    }
}

pub struct Mempool {
    entries: HashMap<TxId, MempoolEntry>,
    /// anchor → spending tx, to refuse conflicting spends at admission.
    by_anchor: HashMap<Anchor, TxId>,
    total_bytes: usize,
    max_bytes: usize,
    max_txs: usize,
}

impl Mempool {
    pub fn new(max_bytes: usize, max_txs: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_anchor: HashMap::new(),
            total_bytes: 0,
            max_bytes,
            max_txs,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.entries.contains_key(id)
    }

    /// Admit a validated transaction with its stage-2 fee.
    pub fn insert(&mut self, tx: Transaction, fee: Amount) -> Result<(), TesseraError> {
        if self.entries.contains_key(&tx.id) {
            return Ok(());
        }
        for anchor in tx.spent_anchors() {
            if self.by_anchor.contains_key(&anchor) {
                return Err(TesseraError::DoubleSpend(anchor.to_string()));
            }
        }

        let size = tx.estimated_size();
        let entry = MempoolEntry { tx, fee, size };
        let arriving_rate = entry.fee_per_byte_milli();

        while self.total_bytes + size > self.max_bytes || self.entries.len() + 1 > self.max_txs {
            let Some(victim) = self.lowest_paying() else {
                return Err(TesseraError::MempoolFull);
            };
            if self.entries[&victim].fee_per_byte_milli() >= arriving_rate {
                return Err(TesseraError::MempoolFull);
            }
            debug!(tx = %victim, "evicting for a better-paying arrival");
            self.remove(&victim);
        }

        self.total_bytes += size;
        for anchor in entry.tx.spent_anchors() {
            self.by_anchor.insert(anchor, entry.tx.id);
        }
        self.entries.insert(entry.tx.id, entry);
        Ok(())
    }

    fn lowest_paying(&self) -> Option<TxId> {
        self.entries
            .values()
            .min_by_key(|e| (e.fee_per_byte_milli(), e.tx.id))
            .map(|e| e.tx.id)
    }

    pub fn remove(&mut self, id: &TxId) -> Option<Transaction> {
        let entry = self.entries.remove(id)?;
        self.total_bytes -= entry.size;
        for anchor in entry.tx.spent_anchors() {
            self.by_anchor.remove(&anchor);
        }
        Some(entry.tx)
    }

    /// Highest-paying transactions first, up to `max_bytes` of them. Leaves
    /// the pool untouched; confirmed entries come out via
    /// [`Mempool::remove_confirmed`].
    pub fn select_for_candidate(&self, max_bytes: usize) -> Vec<Transaction> {
        let mut ranked: Vec<&MempoolEntry> = self.entries.values().collect();
        ranked.sort_by_key(|e| (std::cmp::Reverse(e.fee_per_byte_milli()), e.tx.id));

        let mut selected = Vec::new();
        let mut used = 0usize;
        for entry in ranked {
            if used + entry.size > max_bytes {
                continue;
            }
            used += entry.size;
            selected.push(entry.tx.clone());
        }
        selected
    }

    /// Drop every transaction included in a finalized block.
    pub fn remove_confirmed(&mut self, txs: &[Transaction]) {
        for tx in txs {
            self.remove(&tx.id);
        }
    }
}
