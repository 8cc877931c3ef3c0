pub mod block;
pub mod codec;
pub mod constants;
pub mod error;
pub mod params;
pub mod transaction;
pub mod types;

pub use block::*;
pub use constants::*;
pub use error::TesseraError;
pub use params::ChainParams;
pub use transaction::*;
pub use types::*;
