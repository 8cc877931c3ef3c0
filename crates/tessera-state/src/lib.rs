pub mod cache;

pub use cache::{UtxoCache, UtxoSnapshot};
