use tessera_core::block::Block;
use tessera_core::transaction::Transaction;
use tessera_core::types::BlockHash;

/// Events the node publishes to local consumers (dashboards, tooling).
#[derive(Clone, Debug)]
pub enum NodeEvent {
    /// Periodic summary of node state.
    NodeInfo {
        height: u64,
        head_hash: BlockHash,
        mempool_txs: usize,
        mempool_bytes: usize,
    },
    /// A block was finalized and applied locally.
    BroadcastFinalizedBlock(Block),
    /// Fresh aggregate miner hash rate.
    HashRateUpdated { hps: f64 },
}

/// Inbound administrative commands.
#[derive(Clone, Debug)]
pub enum AdminCommand {
    /// Resize the miner worker pool (1..=16).
    SetMinerThreads(usize),
    /// Sign a locally built transaction with the node wallet and submit it.
    NewUnsignedTransaction(Transaction),
}
