pub mod difficulty;
pub mod rewards;
pub mod validation;
pub mod vss;

pub use difficulty::next_difficulty;
pub use rewards::{coinbase_reward, pos_reward};
pub use validation::{
    validate_block_structure, validate_block_txs, validate_pos_signature, validate_transaction,
    AddressCache,
};
pub use vss::{selection_seed, StakeRef, Vss};
