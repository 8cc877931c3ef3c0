//! Canonical binary encoding of transactions and blocks.
//!
//! Layout rules: little-endian fixed-width integers, LEB128 varints for
//! counts, length-prefixed byte fields. The compressed binary block is the
//! on-disk format; the JSON text form (serde) is the diagnostic mirror.
//!
//! `decode(encode(x)) == x` holds for every valid transaction and block.

use crate::block::Block;
use crate::constants::{BLOCK_VERSION, TX_VERSION};
use crate::error::TesseraError;
use crate::transaction::{RewardKind, Transaction, TxInput, TxOutput, Witness};
use crate::types::{Address, Anchor, BlockHash, TxId, UtxoRule};

// ── Writer ───────────────────────────────────────────────────────────────────

fn put_varint(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

// ── Reader ───────────────────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TesseraError> {
        if self.pos + n > self.data.len() {
            return Err(TesseraError::TruncatedInput {
                needed: self.pos + n - self.data.len(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, TesseraError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, TesseraError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64, TesseraError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn i64(&mut self) -> Result<i64, TesseraError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn hash32(&mut self) -> Result<[u8; 32], TesseraError> {
        Ok(self.take(32)?.try_into().expect("32 bytes"))
    }

    fn varint(&mut self) -> Result<u64, TesseraError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            if shift > 63 || (shift == 63 && byte > 1) {
                return Err(TesseraError::MalformedField("varint"));
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn bytes(&mut self) -> Result<&'a [u8], TesseraError> {
        let len = self.varint()? as usize;
        self.take(len)
    }

    fn finished(&self) -> bool {
        self.pos == self.data.len()
    }
}

// ── Transactions ─────────────────────────────────────────────────────────────

const INPUT_TAG_UTXO: u8 = 0;
const INPUT_TAG_REWARD: u8 = 1;

pub fn encode_tx(tx: &Transaction) -> Vec<u8> {
    let mut buf = Vec::with_capacity(tx.estimated_size());
    encode_tx_into(tx, &mut buf);
    buf
}

fn encode_tx_into(tx: &Transaction, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&tx.version.to_le_bytes());
    buf.extend_from_slice(tx.id.as_bytes());

    put_varint(buf, tx.inputs.len() as u64);
    for input in &tx.inputs {
        match input {
            TxInput::Utxo(anchor) => {
                buf.push(INPUT_TAG_UTXO);
                put_varint(buf, anchor.height);
                put_varint(buf, u64::from(anchor.tx_index));
                put_varint(buf, u64::from(anchor.output_index));
            }
            TxInput::Reward { kind, height } => {
                buf.push(INPUT_TAG_REWARD);
                buf.push(match kind {
                    RewardKind::Pow => 0,
                    RewardKind::Pos => 1,
                });
                buf.extend_from_slice(&height.to_le_bytes());
            }
        }
    }

    put_varint(buf, tx.outputs.len() as u64);
    for output in &tx.outputs {
        buf.extend_from_slice(&output.amount.to_le_bytes());
        put_bytes(buf, output.address.as_str().as_bytes());
        buf.push(match output.rule {
            UtxoRule::Sig => 0,
            UtxoRule::SigOrSlash => 1,
        });
    }

    put_varint(buf, tx.witnesses.len() as u64);
    for witness in &tx.witnesses {
        put_bytes(buf, &witness.signature);
        put_bytes(buf, &witness.pubkey);
    }
}

pub fn decode_tx(data: &[u8]) -> Result<Transaction, TesseraError> {
    let mut reader = Reader::new(data);
    let tx = decode_tx_from(&mut reader)?;
    if !reader.finished() {
        return Err(TesseraError::MalformedField("trailing bytes after transaction"));
    }
    Ok(tx)
}

fn decode_tx_from(reader: &mut Reader<'_>) -> Result<Transaction, TesseraError> {
    let version = reader.u32()?;
    if version == 0 || version > TX_VERSION {
        return Err(TesseraError::UnknownVersion(version));
    }
    let id = TxId::from_bytes(reader.hash32()?);

    let input_count = reader.varint()? as usize;
    let mut inputs = Vec::with_capacity(input_count);
    for _ in 0..input_count {
        let input = match reader.u8()? {
            INPUT_TAG_UTXO => {
                let height = reader.varint()?;
                let tx_index = u16::try_from(reader.varint()?)
                    .map_err(|_| TesseraError::MalformedField("anchor.tx_index"))?;
                let output_index = u16::try_from(reader.varint()?)
                    .map_err(|_| TesseraError::MalformedField("anchor.output_index"))?;
                TxInput::Utxo(Anchor::new(height, tx_index, output_index))
            }
            INPUT_TAG_REWARD => {
                let kind = match reader.u8()? {
                    0 => RewardKind::Pow,
                    1 => RewardKind::Pos,
                    _ => return Err(TesseraError::MalformedField("input.reward_kind")),
                };
                TxInput::Reward { kind, height: reader.u64()? }
            }
            _ => return Err(TesseraError::MalformedField("input.tag")),
        };
        inputs.push(input);
    }

    let output_count = reader.varint()? as usize;
    let mut outputs = Vec::with_capacity(output_count);
    for _ in 0..output_count {
        let amount = reader.u64()?;
        let addr_bytes = reader.bytes()?;
        let addr_str = std::str::from_utf8(addr_bytes)
            .map_err(|_| TesseraError::MalformedField("output.address"))?;
        let address = Address::parse(addr_str)
            .map_err(|_| TesseraError::MalformedField("output.address"))?;
        let rule = match reader.u8()? {
            0 => UtxoRule::Sig,
            1 => UtxoRule::SigOrSlash,
            _ => return Err(TesseraError::MalformedField("output.rule")),
        };
        outputs.push(TxOutput::new(amount, address, rule));
    }

    let witness_count = reader.varint()? as usize;
    let mut witnesses = Vec::with_capacity(witness_count);
    for _ in 0..witness_count {
        let signature = reader.bytes()?.to_vec();
        let pubkey = reader.bytes()?.to_vec();
        witnesses.push(Witness::new(signature, pubkey));
    }

    Ok(Transaction { id, version, inputs, outputs, witnesses })
}

// ── Blocks ───────────────────────────────────────────────────────────────────

pub fn encode_block(block: &Block) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&block.version.to_le_bytes());
    buf.extend_from_slice(&block.index.to_le_bytes());
    buf.extend_from_slice(block.prev_hash.as_bytes());
    buf.extend_from_slice(&block.timestamp.to_le_bytes());
    buf.extend_from_slice(&block.pos_timestamp.to_le_bytes());
    buf.extend_from_slice(&block.difficulty.to_le_bytes());
    buf.extend_from_slice(&block.legitimacy.to_le_bytes());

    put_varint(&mut buf, block.txs.len() as u64);
    for tx in &block.txs {
        // Each transaction is a length-prefixed field so a reader can skip
        // without understanding the tx layout.
        put_bytes(&mut buf, &encode_tx(tx));
    }

    buf.extend_from_slice(&block.nonce.to_le_bytes());
    buf.extend_from_slice(block.hash.as_bytes());

    match &block.pos_signature {
        Some(witness) => {
            buf.push(1);
            put_bytes(&mut buf, &witness.signature);
            put_bytes(&mut buf, &witness.pubkey);
        }
        None => buf.push(0),
    }
    buf
}

pub fn decode_block(data: &[u8]) -> Result<Block, TesseraError> {
    let mut reader = Reader::new(data);

    let version = reader.u32()?;
    if version == 0 || version > BLOCK_VERSION {
        return Err(TesseraError::UnknownVersion(version));
    }
    let index = reader.u64()?;
    let prev_hash = BlockHash::from_bytes(reader.hash32()?);
    let timestamp = reader.i64()?;
    let pos_timestamp = reader.i64()?;
    let difficulty = reader.u32()?;
    let legitimacy = reader.u32()?;

    let tx_count = reader.varint()? as usize;
    let mut txs = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        txs.push(decode_tx(reader.bytes()?)?);
    }

    let nonce = reader.u64()?;
    let hash = BlockHash::from_bytes(reader.hash32()?);

    let pos_signature = match reader.u8()? {
        0 => None,
        1 => {
            let signature = reader.bytes()?.to_vec();
            let pubkey = reader.bytes()?.to_vec();
            Some(Witness::new(signature, pubkey))
        }
        _ => return Err(TesseraError::MalformedField("block.pos_signature")),
    };

    if !reader.finished() {
        return Err(TesseraError::MalformedField("trailing bytes after block"));
    }

    Ok(Block {
        version,
        index,
        prev_hash,
        timestamp,
        pos_timestamp,
        difficulty,
        legitimacy,
        txs,
        nonce,
        hash,
        pos_signature,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AddressType;

    fn addr() -> Address {
        Address::from_parts(AddressType::W, "3v62vx3SgHZHm4QZ8eW7uDYdV")
    }

    fn stake_addr() -> Address {
        Address::from_parts(AddressType::S, "4fP9qQmC1yUuWxEjT2nRbKdZe")
    }

    fn sample_tx() -> Transaction {
        let mut tx = Transaction::assemble(
            TX_VERSION,
            vec![
                TxInput::Utxo(Anchor::new(12, 1, 0)),
                TxInput::Utxo(Anchor::new(900, 4, 3)),
            ],
            vec![
                TxOutput::new(750_000, addr(), UtxoRule::Sig),
                TxOutput::new(1_000_000, stake_addr(), UtxoRule::SigOrSlash),
            ],
        );
        tx.witnesses.push(Witness::new(vec![0x11; 64], vec![0x22; 32]));
        tx
    }

    #[test]
    fn tx_round_trip() {
        let tx = sample_tx();
        let decoded = decode_tx(&encode_tx(&tx)).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.compute_id(), tx.id);
    }

    #[test]
    fn coinbase_round_trip() {
        let cb = Transaction::coinbase(42, addr(), 262_144_000);
        assert_eq!(decode_tx(&encode_tx(&cb)).unwrap(), cb);
    }

    #[test]
    fn block_round_trip() {
        let coinbase = Transaction::coinbase(5, addr(), 262_144_000);
        let pos = Transaction::pos_reward(5, addr(), 65_536_000);
        let mut block = Block::candidate(
            5,
            BlockHash::from_bytes([9u8; 32]),
            1_700_000_000_000,
            24,
            1,
            vec![coinbase, pos, sample_tx()],
        );
        block.timestamp = 1_700_000_060_000;
        block.nonce = 0xDEAD_BEEF;
        block.hash = block.compute_hash();
        block.pos_signature = Some(Witness::new(vec![0x33; 64], vec![0x44; 32]));

        assert_eq!(decode_block(&encode_block(&block)).unwrap(), block);
    }

    #[test]
    fn truncated_input_reported() {
        let bytes = encode_tx(&sample_tx());
        for cut in [0, 3, 10, bytes.len() - 1] {
            let err = decode_tx(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, TesseraError::TruncatedInput { .. }),
                "cut at {cut} gave {err:?}"
            );
        }
    }

    #[test]
    fn unknown_version_rejected() {
        let mut bytes = encode_tx(&sample_tx());
        bytes[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            decode_tx(&bytes).unwrap_err(),
            TesseraError::UnknownVersion(99)
        ));
    }

    #[test]
    fn bad_rule_byte_rejected() {
        let tx = Transaction::assemble(
            TX_VERSION,
            vec![],
            vec![TxOutput::new(1, addr(), UtxoRule::Sig)],
        );
        let mut bytes = encode_tx(&tx);
        // The rule byte is the last output byte before the witness count.
        let rule_pos = bytes.len() - 2;
        assert_eq!(bytes[rule_pos], 0);
        bytes[rule_pos] = 7;
        assert!(matches!(
            decode_tx(&bytes).unwrap_err(),
            TesseraError::MalformedField("output.rule")
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = encode_tx(&sample_tx());
        bytes.push(0);
        assert!(decode_tx(&bytes).is_err());
    }
}
