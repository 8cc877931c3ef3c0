use serde::{Deserialize, Serialize};

use crate::error::TesseraError;
use crate::types::{AddressType, Amount};

/// Which network this node believes it is on. The dev Argon2 profile is
/// rejected anywhere outside `Dev`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Dev,
}

/// Chain parameters left open by the protocol and exposed as configuration
/// with safe defaults. Loadable from JSON; every field has a default so a
/// partial file works.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub network: Network,

    /// Blocks between coinbase halvings.
    pub halving_interval: u64,

    /// Coinbase reward at block 0, in micros.
    pub initial_coinbase: Amount,

    /// PoS reward = coinbase / this divisor.
    pub pos_reward_divisor: u64,

    /// Difficulty bounds, in 1/16-bit steps (16 steps per leading zero bit).
    pub min_difficulty: u32,
    pub max_difficulty: u32,

    /// Difficulty at block 0.
    pub initial_difficulty: u32,

    /// Blocks between retargets.
    pub retarget_interval: u64,

    /// Target spacing between blocks, milliseconds.
    pub target_block_time_ms: i64,

    /// Confirmation depth before a SigOrSlash output becomes spendable.
    pub stake_maturity: u64,

    /// How far a block timestamp may sit in the future of local now, ms.
    pub max_timestamp_drift_ms: i64,

    /// Mempool caps.
    pub mempool_max_bytes: usize,
    pub mempool_max_txs: usize,

    /// Byte bound for user transactions drained into one candidate.
    pub candidate_max_bytes: usize,

    /// Leading zero bits required of the Argon2id image per address type.
    pub zero_bits_w: u8,
    pub zero_bits_c: u8,
    pub zero_bits_s: u8,
    pub zero_bits_p: u8,
    pub zero_bits_u: u8,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            halving_interval: 52_500,
            initial_coinbase: 262_144_000,
            pos_reward_divisor: 4,
            min_difficulty: 1,
            max_difficulty: 320,
            initial_difficulty: 16,
            retarget_interval: 30,
            target_block_time_ms: 120_000,
            stake_maturity: 10,
            max_timestamp_drift_ms: 5_000,
            mempool_max_bytes: 4_000_000,
            mempool_max_txs: 10_000,
            candidate_max_bytes: 500_000,
            zero_bits_w: 4,
            zero_bits_c: 4,
            zero_bits_s: 4,
            zero_bits_p: 8,
            zero_bits_u: 0,
        }
    }
}

impl ChainParams {
    /// Parse from a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, TesseraError> {
        let params: Self =
            serde_json::from_str(json).map_err(|e| TesseraError::Malformed(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject parameter sets no node could operate under.
    pub fn validate(&self) -> Result<(), TesseraError> {
        if self.min_difficulty == 0 || self.min_difficulty > self.max_difficulty {
            return Err(TesseraError::Malformed(
                "difficulty bounds must satisfy 0 < min <= max".into(),
            ));
        }
        if self.initial_difficulty < self.min_difficulty
            || self.initial_difficulty > self.max_difficulty
        {
            return Err(TesseraError::Malformed(
                "initial difficulty outside configured bounds".into(),
            ));
        }
        if self.pos_reward_divisor == 0 || self.halving_interval == 0 || self.retarget_interval == 0
        {
            return Err(TesseraError::Malformed(
                "halving, retarget and pos divisor must be non-zero".into(),
            ));
        }
        let zero_bits = [
            self.zero_bits_w,
            self.zero_bits_c,
            self.zero_bits_s,
            self.zero_bits_p,
            self.zero_bits_u,
        ];
        if zero_bits.iter().any(|&b| b > 32) {
            return Err(TesseraError::Malformed(
                "address zero-bits above 32 make derivation intractable".into(),
            ));
        }
        Ok(())
    }

    /// Zero-bits parameter of the derivation security check for `ty`.
    pub fn zero_bits(&self, ty: AddressType) -> u8 {
        match ty {
            AddressType::W => self.zero_bits_w,
            AddressType::C => self.zero_bits_c,
            AddressType::S => self.zero_bits_s,
            AddressType::P => self.zero_bits_p,
            AddressType::U => self.zero_bits_u,
        }
    }

    /// A fast-parameter profile for unit tests: Dev network, tiny zero-bits,
    /// minimal difficulty.
    pub fn dev() -> Self {
        Self {
            network: Network::Dev,
            initial_difficulty: 1,
            target_block_time_ms: 100,
            stake_maturity: 2,
            zero_bits_w: 1,
            zero_bits_c: 1,
            zero_bits_s: 1,
            zero_bits_p: 1,
            zero_bits_u: 0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ChainParams::default().validate().unwrap();
        ChainParams::dev().validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let p = ChainParams::from_json(r#"{ "halving_interval": 100 }"#).unwrap();
        assert_eq!(p.halving_interval, 100);
        assert_eq!(p.pos_reward_divisor, ChainParams::default().pos_reward_divisor);
    }

    #[test]
    fn bad_bounds_rejected() {
        let json = r#"{ "min_difficulty": 50, "max_difficulty": 10 }"#;
        assert!(ChainParams::from_json(json).is_err());
    }
}
