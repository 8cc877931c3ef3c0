//! Parallel PoW nonce search.
//!
//! The controller partitions the nonce space into disjoint ranges, one per
//! worker thread. Workers hash cooperatively: every `MINER_CHECK_INTERVAL`
//! nonces they compare the shared generation counter against the one they
//! were spawned with and abandon stale work. A new candidate bumps the
//! generation, so in-flight ranges die at their next checkpoint.
//!
//! The first worker to find a valid hash for a generation wins; later finds
//! for the same generation are dropped via an atomic high-water mark.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info};

use tessera_core::block::Block;
use tessera_core::constants::{MAX_MINER_WORKERS, MINER_CHECK_INTERVAL, MIN_MINER_WORKERS};
use tessera_core::TesseraError;
use tessera_crypto::hash_meets_difficulty;

/// Seconds between hash-rate samples.
const HASH_RATE_SAMPLE_SECS: u64 = 2;

/// Progress events emitted to the node.
#[derive(Clone, Debug)]
pub enum MinerEvent {
    /// A worker found a nonce whose hash meets the difficulty predicate.
    Solved {
        generation: u64,
        nonce: u64,
        hash_hex: String,
        /// Wall-clock milliseconds the winning worker spent hashing.
        hash_time_ms: u64,
        is_valid: bool,
    },
    /// Periodic aggregate hash rate across all workers.
    HashRate { hps: f64 },
}

pub struct Miner {
    nb_workers: usize,
    generation: Arc<AtomicU64>,
    solved: Arc<AtomicU64>,
    hashes: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    events: mpsc::Sender<MinerEvent>,
}

impl Miner {
    /// Build a miner with `nb_workers` threads (1..=16) reporting into
    /// `events`. Spawns the hash-rate monitor immediately.
    pub fn new(nb_workers: usize, events: mpsc::Sender<MinerEvent>) -> Result<Self, TesseraError> {
        check_worker_count(nb_workers)?;
        let miner = Self {
            nb_workers,
            generation: Arc::new(AtomicU64::new(0)),
            solved: Arc::new(AtomicU64::new(0)),
            hashes: Arc::new(AtomicU64::new(0)),
            shutdown: Arc::new(AtomicBool::new(false)),
            events,
        };
        miner.spawn_monitor();
        Ok(miner)
    }

    pub fn nb_workers(&self) -> usize {
        self.nb_workers
    }

    /// Resize the worker pool. Takes effect at the next candidate.
    pub fn set_workers(&mut self, nb_workers: usize) -> Result<(), TesseraError> {
        check_worker_count(nb_workers)?;
        self.nb_workers = nb_workers;
        info!(workers = nb_workers, "miner pool resized");
        Ok(())
    }

    /// Start searching `preimage` at `difficulty`, invalidating all work on
    /// the previous candidate. Returns the new generation; the matching
    /// `Solved` event carries it back.
    pub fn mine(&self, preimage: [u8; 32], difficulty: u32) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, difficulty, workers = self.nb_workers, "mining candidate");

        let span = u64::MAX / self.nb_workers as u64;
        for worker in 0..self.nb_workers {
            let start = worker as u64 * span;
            let end = if worker + 1 == self.nb_workers {
                u64::MAX
            } else {
                start + span
            };
            let generation_ctr = Arc::clone(&self.generation);
            let solved = Arc::clone(&self.solved);
            let hashes = Arc::clone(&self.hashes);
            let events = self.events.clone();
            std::thread::spawn(move || {
                search_range(
                    preimage,
                    difficulty,
                    generation,
                    start..end,
                    &generation_ctr,
                    &solved,
                    &hashes,
                    &events,
                );
            });
        }
        generation
    }

    /// Invalidate the current candidate without starting a new search.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn spawn_monitor(&self) {
        let hashes = Arc::clone(&self.hashes);
        let shutdown = Arc::clone(&self.shutdown);
        let events = self.events.clone();
        std::thread::spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_secs(HASH_RATE_SAMPLE_SECS));
                let sampled = hashes.swap(0, Ordering::Relaxed);
                let event = MinerEvent::HashRate {
                    hps: sampled as f64 / HASH_RATE_SAMPLE_SECS as f64,
                };
                if events.blocking_send(event).is_err() {
                    return;
                }
            }
        });
    }
}

impl Drop for Miner {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.cancel();
    }
}

fn check_worker_count(nb_workers: usize) -> Result<(), TesseraError> {
    if !(MIN_MINER_WORKERS..=MAX_MINER_WORKERS).contains(&nb_workers) {
        return Err(TesseraError::Malformed(format!(
            "miner workers must be in {MIN_MINER_WORKERS}..={MAX_MINER_WORKERS}, got {nb_workers}"
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn search_range(
    preimage: [u8; 32],
    difficulty: u32,
    generation: u64,
    range: std::ops::Range<u64>,
    generation_ctr: &AtomicU64,
    solved: &AtomicU64,
    hashes: &AtomicU64,
    events: &mpsc::Sender<MinerEvent>,
) {
    let started = Instant::now();
    let mut since_check = 0u64;

    for nonce in range {
        if since_check == MINER_CHECK_INTERVAL {
            hashes.fetch_add(since_check, Ordering::Relaxed);
            since_check = 0;
            if generation_ctr.load(Ordering::Relaxed) != generation {
                return;
            }
        }
        since_check += 1;

        let hash = Block::hash_with_nonce(&preimage, nonce);
        if hash_meets_difficulty(hash.as_bytes(), difficulty) {
            hashes.fetch_add(since_check, Ordering::Relaxed);
            // First find for this generation wins; the rest are dropped.
            if solved.fetch_max(generation, Ordering::SeqCst) < generation {
                let _ = events.blocking_send(MinerEvent::Solved {
                    generation,
                    nonce,
                    hash_hex: hash.to_hex(),
                    hash_time_ms: started.elapsed().as_millis() as u64,
                    is_valid: true,
                });
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_solved(rx: &mut mpsc::Receiver<MinerEvent>) -> (u64, u64, String) {
        loop {
            match rx.recv().await.expect("miner channel open") {
                MinerEvent::Solved { generation, nonce, hash_hex, is_valid, .. } => {
                    assert!(is_valid);
                    return (generation, nonce, hash_hex);
                }
                MinerEvent::HashRate { .. } => continue,
            }
        }
    }

    #[tokio::test]
    async fn finds_a_valid_nonce() {
        let (tx, mut rx) = mpsc::channel(32);
        let miner = Miner::new(2, tx).unwrap();

        let preimage = [5u8; 32];
        let difficulty = 1;
        let generation = miner.mine(preimage, difficulty);

        let (event_gen, nonce, hash_hex) = next_solved(&mut rx).await;
        assert_eq!(event_gen, generation);

        let hash = Block::hash_with_nonce(&preimage, nonce);
        assert_eq!(hash.to_hex(), hash_hex);
        assert!(hash_meets_difficulty(hash.as_bytes(), difficulty));
    }

    #[tokio::test]
    async fn candidate_swap_invalidates_previous_generation() {
        let (tx, mut rx) = mpsc::channel(32);
        let miner = Miner::new(2, tx).unwrap();

        // An effectively unsolvable candidate, immediately replaced.
        let hard = miner.mine([1u8; 32], 320);
        let easy = miner.mine([2u8; 32], 1);
        assert!(easy > hard);

        let (event_gen, _, _) = next_solved(&mut rx).await;
        assert_eq!(event_gen, easy, "only the live generation may solve");
    }

    #[tokio::test]
    async fn duplicate_finds_for_a_generation_are_dropped() {
        let (tx, mut rx) = mpsc::channel(64);
        // Many workers on a trivial difficulty: several will find nonces.
        let miner = Miner::new(8, tx).unwrap();
        let generation = miner.mine([9u8; 32], 0);

        let (first_gen, _, _) = next_solved(&mut rx).await;
        assert_eq!(first_gen, generation);

        // Give stragglers a moment, then assert no second Solved arrives.
        tokio::time::sleep(Duration::from_millis(200)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, MinerEvent::Solved { .. }),
                "second solve for one generation leaked through"
            );
        }
    }

    #[test]
    fn worker_bounds_enforced() {
        let (tx, _rx) = mpsc::channel(1);
        assert!(Miner::new(0, tx.clone()).is_err());
        assert!(Miner::new(17, tx.clone()).is_err());

        let mut miner = Miner::new(1, tx).unwrap();
        assert!(miner.set_workers(16).is_ok());
        assert!(miner.set_workers(0).is_err());
        assert_eq!(miner.nb_workers(), 16);
    }
}
