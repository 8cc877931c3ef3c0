//! Gossip and request/response wire types.
//!
//! Every gossip message travels as a JSON envelope `{"type": …, "data": …}`.
//! The envelope decodes into the closed [`NetMessage`] enum; an unknown tag
//! is answered with the protocol's error envelope instead of being dropped
//! silently. Transport (gossip fan-out, streams, peer scoring) belongs to
//! the network layer outside this repository.

use serde::{Deserialize, Serialize};

use tessera_core::block::Block;
use tessera_core::constants::MAX_BLOCKS_PER_REQUEST;
use tessera_core::transaction::Transaction;
use tessera_core::types::{BlockHash, TimestampMs};
use tessera_core::TesseraError;

/// A peer as announced on the gossip mesh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub listen_addr: String,
}

/// Reply to `/blockchain/status/1.0.0`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub height: u64,
    pub hash: BlockHash,
    pub timestamp: TimestampMs,
}

/// Body of `/blockchain/blockrequest/1.0.0`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRangeRequest {
    pub start_height: u64,
    pub end_height: u64,
}

impl BlockRangeRequest {
    /// The inclusive range a server may actually answer: at most
    /// `MAX_BLOCKS_PER_REQUEST` blocks from `start_height`.
    pub fn clamped(&self) -> (u64, u64) {
        let end = self
            .end_height
            .min(self.start_height + MAX_BLOCKS_PER_REQUEST as u64 - 1);
        (self.start_height, end)
    }
}

/// The closed set of gossip envelope messages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum NetMessage {
    #[serde(rename = "new_transaction")]
    NewTransaction(Transaction),

    #[serde(rename = "block_candidate")]
    BlockCandidate(Block),

    #[serde(rename = "mined_block")]
    MinedBlock(Block),

    #[serde(rename = "broadcast_finalized_block")]
    BroadcastFinalizedBlock(Block),

    #[serde(rename = "peer-announce")]
    PeerAnnounce(PeerInfo),

    #[serde(rename = "peer-list-request")]
    PeerListRequest,

    #[serde(rename = "peer-list-response")]
    PeerListResponse(Vec<PeerInfo>),

    #[serde(rename = "network-status-request")]
    NetworkStatusRequest,

    #[serde(rename = "network-status-response")]
    NetworkStatusResponse(StatusResponse),

    #[serde(rename = "error")]
    Error(String),
}

impl NetMessage {
    /// The reply sent for an envelope whose tag is not in the closed set.
    pub fn unknown_reply() -> Self {
        NetMessage::Error("unknown message type".into())
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).expect("envelope serialization is infallible")
    }

    /// Decode an envelope. Unknown tags yield `UnknownMessage` with the
    /// offending tag; everything else malformed yields `Malformed`.
    pub fn decode(json: &str) -> Result<Self, TesseraError> {
        match serde_json::from_str(json) {
            Ok(message) => Ok(message),
            Err(e) => {
                let tag = serde_json::from_str::<serde_json::Value>(json)
                    .ok()
                    .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from));
                match tag {
                    Some(tag) if !KNOWN_TAGS.contains(&tag.as_str()) => {
                        Err(TesseraError::UnknownMessage(tag))
                    }
                    _ => Err(TesseraError::Malformed(e.to_string())),
                }
            }
        }
    }
}

const KNOWN_TAGS: [&str; 10] = [
    "new_transaction",
    "block_candidate",
    "mined_block",
    "broadcast_finalized_block",
    "peer-announce",
    "peer-list-request",
    "peer-list-response",
    "network-status-request",
    "network-status-response",
    "error",
];
