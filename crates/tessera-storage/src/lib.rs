//! On-disk block storage.
//!
//! Layout under the store root:
//!
//! ```text
//! blocks/<bucket>/<index>.bin    gzip-compressed canonical binary block
//! blocks/<bucket>/<index>.json   diagnostic JSON mirror of the same block
//! chain-info.csv                 one summary row per finalized block
//! ```
//!
//! Buckets group `BLOCKS_PER_BUCKET` consecutive indexes
//! (`0-999`, `1000-1999`, …). On load the JSON mirror must decode
//! value-equal to the binary; a divergence means corruption and fails the
//! read rather than guessing which copy to trust.
//!
//! I/O failures surface as `IoError` and never touch in-memory chain state.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use tessera_core::block::Block;
use tessera_core::codec::{decode_block, encode_block};
use tessera_core::constants::BLOCKS_PER_BUCKET;
use tessera_core::types::{Amount, TimestampMs};
use tessera_core::TesseraError;

const CHAIN_INFO_HEADER: &str = "blockIndex,coinbaseReward,timestamp,difficulty,timeBetweenBlocks";

pub struct BlockStore {
    root: PathBuf,
}

impl BlockStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, TesseraError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("blocks"))?;
        Ok(Self { root })
    }

    fn bucket_dir(&self, index: u64) -> PathBuf {
        let start = (index / BLOCKS_PER_BUCKET) * BLOCKS_PER_BUCKET;
        let end = start + BLOCKS_PER_BUCKET - 1;
        self.root.join("blocks").join(format!("{start}-{end}"))
    }

    fn bin_path(&self, index: u64) -> PathBuf {
        self.bucket_dir(index).join(format!("{index}.bin"))
    }

    fn json_path(&self, index: u64) -> PathBuf {
        self.bucket_dir(index).join(format!("{index}.json"))
    }

    /// Persist a block: compressed canonical binary plus its JSON mirror.
    pub fn save_block(&self, block: &Block) -> Result<(), TesseraError> {
        let dir = self.bucket_dir(block.index);
        fs::create_dir_all(&dir)?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&encode_block(block))?;
        let compressed = encoder.finish()?;
        fs::write(self.bin_path(block.index), compressed)?;

        let json = serde_json::to_string_pretty(block)
            .map_err(|e| TesseraError::IoError(e.to_string()))?;
        fs::write(self.json_path(block.index), json)?;

        debug!(index = block.index, "block persisted");
        Ok(())
    }

    pub fn has_block(&self, index: u64) -> bool {
        self.bin_path(index).is_file()
    }

    /// Load a block, cross-checking the binary against its JSON mirror.
    pub fn load_block(&self, index: u64) -> Result<Block, TesseraError> {
        let compressed = fs::read(self.bin_path(index))?;
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        let block = decode_block(&raw)?;

        let mirror_json = fs::read_to_string(self.json_path(index))?;
        let mirror: Block = serde_json::from_str(&mirror_json)
            .map_err(|e| TesseraError::Malformed(format!("block {index} mirror: {e}")))?;
        if mirror != block {
            return Err(TesseraError::Malformed(format!(
                "block {index} mirror diverges from binary"
            )));
        }
        Ok(block)
    }

    /// Load `[start, end]` inclusive, stopping at the first gap.
    pub fn load_range(&self, start: u64, end: u64) -> Result<Vec<Block>, TesseraError> {
        let mut blocks = Vec::new();
        for index in start..=end {
            if !self.has_block(index) {
                break;
            }
            blocks.push(self.load_block(index)?);
        }
        Ok(blocks)
    }

    /// Highest contiguous block index on disk, if any.
    pub fn tip_index(&self) -> Option<u64> {
        let mut index = 0u64;
        if !self.has_block(0) {
            return None;
        }
        while self.has_block(index + 1) {
            index += 1;
        }
        Some(index)
    }

    /// Append a summary row to `chain-info.csv`.
    pub fn append_chain_info(
        &self,
        block: &Block,
        coinbase_reward: Amount,
        time_between_blocks_ms: TimestampMs,
    ) -> Result<(), TesseraError> {
        let path = self.root.join("chain-info.csv");
        let mut content = String::new();
        if !path.is_file() {
            content.push_str(CHAIN_INFO_HEADER);
            content.push('\n');
        }
        content.push_str(&format!(
            "{},{},{},{},{}\n",
            block.index, coinbase_reward, block.timestamp, block.difficulty, time_between_blocks_ms
        ));
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?
            .write_all(content.as_bytes())?;
        Ok(())
    }
}
