//! Chain sync policy.
//!
//! Every sync tick the node collects status responses from a random peer
//! subset and decides whether it is behind: either a peer is taller, or at
//! equal height the local hash disagrees with the modal hash among peers.
//! Catching up pulls batches of at most `MAX_BLOCKS_PER_REQUEST` blocks.

use std::collections::HashMap;

use tessera_core::constants::MAX_BLOCKS_PER_REQUEST;
use tessera_core::types::BlockHash;

use crate::message::{BlockRangeRequest, StatusResponse};

/// True when the local chain should pull from peers.
pub fn is_behind(local: &StatusResponse, peers: &[StatusResponse]) -> bool {
    let Some(max_height) = peers.iter().map(|p| p.height).max() else {
        return false;
    };
    if local.height < max_height {
        return true;
    }

    // Equal height: compare against the modal hash at that height.
    let mut counts: HashMap<BlockHash, usize> = HashMap::new();
    for peer in peers.iter().filter(|p| p.height == local.height) {
        *counts.entry(peer.hash).or_insert(0) += 1;
    }
    match counts.iter().max_by_key(|(_, count)| **count) {
        Some((modal_hash, _)) => *modal_hash != local.hash,
        None => false,
    }
}

/// Batched range requests covering block indexes `[next_index, target_index]`.
pub fn plan_batches(next_index: u64, target_index: u64) -> Vec<BlockRangeRequest> {
    let mut batches = Vec::new();
    let mut next = next_index;
    while next <= target_index {
        let end = target_index.min(next + MAX_BLOCKS_PER_REQUEST as u64 - 1);
        batches.push(BlockRangeRequest { start_height: next, end_height: end });
        next = end + 1;
    }
    batches
}
