//! Block reward schedule.
//!
//! Both functions are pure in the block index (plus chain parameters), so
//! any verifier recomputes them independently of the issuing node.

use tessera_core::types::Amount;
use tessera_core::ChainParams;

/// PoW coinbase reward at `index`: the initial reward halved once per
/// elapsed halving interval.
pub fn coinbase_reward(index: u64, params: &ChainParams) -> Amount {
    let halvings = index / params.halving_interval;
    if halvings >= 64 {
        return 0;
    }
    params.initial_coinbase >> halvings
}

/// PoS reward at `index`: a fixed fraction of the coinbase.
pub fn pos_reward(index: u64, params: &ChainParams) -> Amount {
    coinbase_reward(index, params) / params.pos_reward_divisor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halving_schedule() {
        let params = ChainParams::default();
        let initial = params.initial_coinbase;

        assert_eq!(coinbase_reward(0, &params), initial);
        assert_eq!(coinbase_reward(params.halving_interval - 1, &params), initial);
        assert_eq!(coinbase_reward(params.halving_interval, &params), initial / 2);
        assert_eq!(coinbase_reward(params.halving_interval * 3, &params), initial / 8);
    }

    #[test]
    fn pos_is_fixed_fraction() {
        let params = ChainParams::default();
        for index in [0, 1, params.halving_interval, params.halving_interval * 2] {
            assert_eq!(
                pos_reward(index, &params),
                coinbase_reward(index, &params) / params.pos_reward_divisor
            );
        }
    }

    #[test]
    fn emission_eventually_reaches_zero() {
        let params = ChainParams::default();
        assert_eq!(coinbase_reward(params.halving_interval * 64, &params), 0);
        assert_eq!(pos_reward(params.halving_interval * 64, &params), 0);
    }
}
