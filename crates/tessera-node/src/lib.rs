pub mod chain;
pub mod events;
pub mod mempool;

pub use chain::Blockchain;
pub use events::{AdminCommand, NodeEvent};
pub use mempool::Mempool;
