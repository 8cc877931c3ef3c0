pub mod message;
pub mod sync;

pub use message::{BlockRangeRequest, NetMessage, PeerInfo, StatusResponse};
pub use sync::{is_behind, plan_batches};

/// Length-prefixed request/response protocol identifiers.
pub const BLOCK_REQUEST_PROTOCOL: &str = "/blockchain/blockrequest/1.0.0";
pub const STATUS_PROTOCOL: &str = "/blockchain/status/1.0.0";
