//! Difficulty retargeting.
//!
//! Every `retarget_interval` blocks the node measures the median spacing
//! over the closing window and nudges difficulty by at most one step,
//! clamped to the configured bounds. The one-step limit keeps a burst of
//! lucky blocks (or a stall) from whipsawing the chain.

use tessera_core::types::TimestampMs;
use tessera_core::ChainParams;

/// Difficulty for the block at `next_index`, given the current difficulty
/// and the timestamps of the blocks closing the window (oldest first; with
/// fewer than two samples the difficulty is unchanged).
pub fn next_difficulty(
    next_index: u64,
    current: u32,
    window_timestamps: &[TimestampMs],
    params: &ChainParams,
) -> u32 {
    if next_index == 0 || next_index % params.retarget_interval != 0 {
        return current.clamp(params.min_difficulty, params.max_difficulty);
    }
    let Some(median) = median_spacing(window_timestamps) else {
        return current.clamp(params.min_difficulty, params.max_difficulty);
    };

    let adjusted = if median < params.target_block_time_ms {
        current.saturating_add(1)
    } else if median > params.target_block_time_ms {
        current.saturating_sub(1)
    } else {
        current
    };
    adjusted.clamp(params.min_difficulty, params.max_difficulty)
}

/// Median gap between consecutive timestamps. None below two samples.
fn median_spacing(timestamps: &[TimestampMs]) -> Option<TimestampMs> {
    if timestamps.len() < 2 {
        return None;
    }
    let mut gaps: Vec<TimestampMs> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]).max(0))
        .collect();
    gaps.sort_unstable();
    Some(gaps[gaps.len() / 2])
}
