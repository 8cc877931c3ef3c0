//! ─── Tessera protocol constants ─────────────────────────────────────────────
//!
//! Base unit: micro (1 TES = 1_000_000 micros).
//!
//! Everything here is consensus-critical: a node compiled with different
//! values forks itself off the network. Tunable operational knobs live in
//! [`crate::params::ChainParams`] instead.

/// 1 TES expressed in micros.
pub const MICROS_PER_TES: u64 = 1_000_000;

/// Transaction format version emitted by this node.
pub const TX_VERSION: u32 = 1;

/// Block format version understood by the codec.
pub const BLOCK_VERSION: u32 = 1;

// ── Argon2id (address derivation) ────────────────────────────────────────────
// Fixed protocol constants: any deviation produces addresses the rest of the
// network rejects.

/// Argon2id time cost (iterations).
pub const ARGON_TIME_COST: u32 = 1;

/// Argon2id memory cost in KiB (64 MiB).
pub const ARGON_MEMORY_KIB: u32 = 65_536;

/// Argon2id lanes.
pub const ARGON_PARALLELISM: u32 = 1;

/// Argon2id output length in bytes.
pub const ARGON_HASH_LEN: usize = 32;

/// Domain-separation salt for address derivation.
pub const ADDRESS_SALT: &[u8; 16] = b"tessera/addr/v1\0";

/// Domain-separation salt for wallet master-seed derivation.
pub const WALLET_SALT: &[u8; 16] = b"tessera/seed/v1\0";

/// Length of the wallet master secret in bytes.
pub const MASTER_HEX_BYTES: usize = 30;

/// Length of a seed modifier in bytes. Encodes (account index, attempt) as
/// `index * MAX_ATTEMPTS_PER_ACCOUNT + attempt`, big-endian.
pub const SEED_MODIFIER_BYTES: usize = 6;

/// Base derivation attempts per account before the zero-bits factor.
pub const MAX_ATTEMPTS_PER_ACCOUNT: u64 = 65_536;

// ── Wire / storage ───────────────────────────────────────────────────────────

/// Maximum blocks served per `/blockchain/blockrequest/1.0.0` request.
pub const MAX_BLOCKS_PER_REQUEST: usize = 50;

/// Default timeout for peer status and block-range requests, milliseconds.
pub const PEER_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Blocks per on-disk bucket directory (`storage/blocks/<bucket>/`).
pub const BLOCKS_PER_BUCKET: u64 = 1_000;

// ── Miner ────────────────────────────────────────────────────────────────────

/// Worker pool size bounds.
pub const MIN_MINER_WORKERS: usize = 1;
pub const MAX_MINER_WORKERS: usize = 16;

/// Nonces a worker hashes between cancellation-flag checks. Chosen so the
/// check overhead stays under 1% of hashing work.
pub const MINER_CHECK_INTERVAL: u64 = 1_024;
