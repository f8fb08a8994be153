//! Core types for the rollup state layer.
//!
//! Every value in the state tree lives under a 32-byte key. Keys are split into
//! domains by a one-byte field type so that accounts and special records never
//! collide:
//!
//! - account kv: `hash(id | 0 | key)`
//! - nonce / script hash: raw layout `id | type | zeros`
//! - script hash to id, data hash: `hash(0u32 | type | hash)`

use crate::hasher::{hash_bytes, Sha256Hasher};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use sparse_merkle_tree::traits::Hasher;
use std::fmt;

pub use sparse_merkle_tree::H256;

/// Account id.
pub type AccountId = u32;

/* Account field types */
/// Contract-visible account storage.
pub const GW_ACCOUNT_KV_TYPE: u8 = 0;
/// Account nonce.
pub const GW_ACCOUNT_NONCE_TYPE: u8 = 1;
/// Account script hash.
pub const GW_ACCOUNT_SCRIPT_HASH_TYPE: u8 = 2;
/* Non-account types */
/// Placeholder id used by keys that do not belong to an account.
pub const GW_NON_ACCOUNT_PLACEHOLDER: [u8; 4] = [0u8; 4];
/// Script hash to account id index.
pub const GW_SCRIPT_HASH_TO_ID_TYPE: u8 = 3;
/// Stored data marker.
pub const GW_DATA_HASH_TYPE: u8 = 4;

/// Serializes an `H256` as a hex string for humans and raw bytes otherwise.
pub mod serde_h256 {
    use super::H256;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &H256, serializer: S) -> Result<S::Ok, S::Error> {
        let bytes: [u8; 32] = (*value).into();
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(bytes))
        } else {
            bytes.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<H256, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            let raw = hex::decode(text.trim_start_matches("0x")).map_err(D::Error::custom)?;
            if raw.len() != 32 {
                return Err(D::Error::custom(format!(
                    "invalid hash length: {} (expected 32)",
                    raw.len()
                )));
            }
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&raw);
            Ok(bytes.into())
        } else {
            let bytes = <[u8; 32]>::deserialize(deserializer)?;
            Ok(bytes.into())
        }
    }
}

/// `serde_h256` for vectors of hashes.
pub mod serde_h256_vec {
    use super::H256;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Wrapped(#[serde(with = "super::serde_h256")] H256);

    pub fn serialize<S: Serializer>(values: &[H256], serializer: S) -> Result<S::Ok, S::Error> {
        let wrapped: Vec<Wrapped> = values.iter().map(|value| Wrapped(*value)).collect();
        wrapped.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<H256>, D::Error> {
        let wrapped = Vec::<Wrapped>::deserialize(deserializer)?;
        Ok(wrapped.into_iter().map(|value| value.0).collect())
    }
}

/// Byte strings as hex for humans, raw bytes otherwise.
pub mod serde_bytes_hex {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(value))
        } else {
            value.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        if deserializer.is_human_readable() {
            let text = String::deserialize(deserializer)?;
            hex::decode(text.trim_start_matches("0x")).map_err(D::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

/// Builds the storage key of a contract-visible account slot.
pub fn build_account_key(id: AccountId, key: &[u8]) -> H256 {
    let mut id_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut id_bytes, id);
    let mut hasher = Sha256Hasher::new();
    hasher.update(&id_bytes);
    hasher.write_byte(GW_ACCOUNT_KV_TYPE);
    hasher.update(key);
    hasher.finish()
}

/// Builds the raw key of an account field (`id | type | zeros`).
pub fn build_account_field_key(id: AccountId, field_type: u8) -> H256 {
    let mut key = [0u8; 32];
    LittleEndian::write_u32(&mut key[..4], id);
    key[4] = field_type;
    key.into()
}

/// Builds the key mapping a script hash to its account id.
///
/// The value layout is `id(4 bytes) | exists flag(1 byte) | zeros`.
pub fn build_script_hash_to_account_id_key(script_hash: &H256) -> H256 {
    let mut hasher = Sha256Hasher::new();
    hasher.update(&GW_NON_ACCOUNT_PLACEHOLDER);
    hasher.write_byte(GW_SCRIPT_HASH_TO_ID_TYPE);
    hasher.write_h256(script_hash);
    hasher.finish()
}

/// Builds the key marking that data with the given hash was stored.
pub fn build_data_hash_key(data_hash: &H256) -> H256 {
    let mut hasher = Sha256Hasher::new();
    hasher.update(&GW_NON_ACCOUNT_PLACEHOLDER);
    hasher.write_byte(GW_DATA_HASH_TYPE);
    hasher.write_h256(data_hash);
    hasher.finish()
}

/// Key of a block hash in the block merkle tree.
pub fn block_smt_key(number: u64) -> H256 {
    let mut key = [0u8; 32];
    LittleEndian::write_u64(&mut key[..8], number);
    key.into()
}

/// Encodes a `u32` into the low bytes of a 32-byte value.
pub fn h256_from_u32(n: u32) -> H256 {
    let mut buf = [0u8; 32];
    LittleEndian::write_u32(&mut buf[..4], n);
    buf.into()
}

/// Reads the `u32` stored in the low bytes of a 32-byte value.
pub fn h256_to_u32(value: &H256) -> u32 {
    LittleEndian::read_u32(&value.as_slice()[..4])
}

/// Short hex rendering used in logs and error messages.
pub fn short_hex(value: &H256) -> String {
    hex::encode(&value.as_slice()[..8])
}

/// A key/value record of the witness kv list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KVPair {
    /// The state key
    #[serde(with = "serde_h256")]
    pub key: H256,
    /// The state value
    #[serde(with = "serde_h256")]
    pub value: H256,
}

impl KVPair {
    /// Size of one record in the witness kv list.
    pub const RECORD_BYTES: usize = 64;

    /// Creates a new pair.
    pub fn new(key: H256, value: H256) -> Self {
        Self { key, value }
    }

    /// Reads a list of fixed 64-byte records.
    pub fn decode_records(data: &[u8]) -> Option<Vec<KVPair>> {
        if data.len() % Self::RECORD_BYTES != 0 {
            return None;
        }
        let pairs = data
            .chunks_exact(Self::RECORD_BYTES)
            .map(|record| {
                let mut key = [0u8; 32];
                let mut value = [0u8; 32];
                key.copy_from_slice(&record[..32]);
                value.copy_from_slice(&record[32..]);
                KVPair::new(key.into(), value.into())
            })
            .collect();
        Some(pairs)
    }

    /// Writes a list of pairs as fixed 64-byte records.
    pub fn encode_records(pairs: &[KVPair]) -> Vec<u8> {
        let mut data = Vec::with_capacity(pairs.len() * Self::RECORD_BYTES);
        for pair in pairs {
            data.extend_from_slice(pair.key.as_slice());
            data.extend_from_slice(pair.value.as_slice());
        }
        data
    }
}

/// Committed shape of the whole account space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMerkleState {
    /// Root of the state tree
    #[serde(with = "serde_h256")]
    pub merkle_root: H256,
    /// Number of accounts
    pub count: u32,
}

impl AccountMerkleState {
    /// Creates a new account merkle state.
    pub fn new(merkle_root: H256, count: u32) -> Self {
        Self { merkle_root, count }
    }

    /// The checkpoint committing to this state.
    pub fn checkpoint(&self) -> H256 {
        crate::checkpoint::commit(&self.merkle_root, self.count)
    }
}

/// Identity of an account: the code it runs and its arguments.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Hash of the contract code
    #[serde(with = "serde_h256")]
    pub code_hash: H256,
    /// How `code_hash` is interpreted
    pub hash_type: u8,
    /// Script arguments
    #[serde(with = "serde_bytes_hex")]
    pub args: Vec<u8>,
}

impl Script {
    /// Creates a new script.
    pub fn new(code_hash: H256, hash_type: u8, args: Vec<u8>) -> Self {
        Self { code_hash, hash_type, args }
    }

    /// Canonical byte encoding.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(32 + 1 + 4 + self.args.len());
        data.extend_from_slice(self.code_hash.as_slice());
        data.push(self.hash_type);
        let mut len = [0u8; 4];
        LittleEndian::write_u32(&mut len, self.args.len() as u32);
        data.extend_from_slice(&len);
        data.extend_from_slice(&self.args);
        data
    }

    /// Hash identifying the account that runs this script.
    pub fn hash(&self) -> H256 {
        hash_bytes(&self.as_bytes())
    }
}

/// A layer-2 transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Transaction {
    /// Sender account
    pub from_id: AccountId,
    /// Target contract account
    pub to_id: AccountId,
    /// Sender nonce
    pub nonce: u32,
    /// Contract arguments
    #[serde(with = "serde_bytes_hex")]
    pub args: Vec<u8>,
}

impl L2Transaction {
    /// Creates a new transaction.
    pub fn new(from_id: AccountId, to_id: AccountId, nonce: u32, args: Vec<u8>) -> Self {
        Self { from_id, to_id, nonce, args }
    }

    /// Canonical byte encoding.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut data = vec![0u8; 16];
        LittleEndian::write_u32(&mut data[0..4], self.from_id);
        LittleEndian::write_u32(&mut data[4..8], self.to_id);
        LittleEndian::write_u32(&mut data[8..12], self.nonce);
        LittleEndian::write_u32(&mut data[12..16], self.args.len() as u32);
        data.extend_from_slice(&self.args);
        data
    }

    /// Transaction hash.
    pub fn hash(&self) -> H256 {
        hash_bytes(&self.as_bytes())
    }
}

/// Block-level information exposed to contracts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    /// Block number
    pub number: u64,
    /// Block timestamp
    pub timestamp: u64,
    /// Block producer account
    pub block_producer_id: AccountId,
}

/// Transactions submitted by a block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTransactions {
    /// Root of the transaction merkle tree
    #[serde(with = "serde_h256")]
    pub tx_witness_root: H256,
    /// Number of transactions
    pub tx_count: u32,
    /// Checkpoint of the state before the first transaction
    #[serde(with = "serde_h256")]
    pub prev_state_checkpoint: H256,
}

/// Header of a layer-2 block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    /// Block number
    pub number: u64,
    /// Parent block hash
    #[serde(with = "serde_h256")]
    pub parent_block_hash: H256,
    /// Block timestamp
    pub timestamp: u64,
    /// Block producer account
    pub block_producer_id: AccountId,
    /// Account state before the block
    pub prev_account: AccountMerkleState,
    /// Account state after the block
    pub post_account: AccountMerkleState,
    /// Submitted transactions
    pub submit_transactions: SubmitTransactions,
    /// Checkpoint after each transaction
    #[serde(with = "serde_h256_vec")]
    pub state_checkpoint_list: Vec<H256>,
}

impl RawBlock {
    /// Canonical byte encoding.
    pub fn as_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(256 + self.state_checkpoint_list.len() * 32);
        let mut word = [0u8; 8];
        LittleEndian::write_u64(&mut word, self.number);
        data.extend_from_slice(&word);
        data.extend_from_slice(self.parent_block_hash.as_slice());
        LittleEndian::write_u64(&mut word, self.timestamp);
        data.extend_from_slice(&word);
        let mut short = [0u8; 4];
        LittleEndian::write_u32(&mut short, self.block_producer_id);
        data.extend_from_slice(&short);
        for account in [&self.prev_account, &self.post_account] {
            data.extend_from_slice(account.merkle_root.as_slice());
            LittleEndian::write_u32(&mut short, account.count);
            data.extend_from_slice(&short);
        }
        let submit = &self.submit_transactions;
        data.extend_from_slice(submit.tx_witness_root.as_slice());
        LittleEndian::write_u32(&mut short, submit.tx_count);
        data.extend_from_slice(&short);
        data.extend_from_slice(submit.prev_state_checkpoint.as_slice());
        LittleEndian::write_u32(&mut short, self.state_checkpoint_list.len() as u32);
        data.extend_from_slice(&short);
        for checkpoint in &self.state_checkpoint_list {
            data.extend_from_slice(checkpoint.as_slice());
        }
        data
    }

    /// Block hash.
    pub fn hash(&self) -> H256 {
        hash_bytes(&self.as_bytes())
    }

    /// Block information seen by contracts executing in this block.
    pub fn block_info(&self) -> BlockInfo {
        BlockInfo {
            number: self.number,
            timestamp: self.timestamp,
            block_producer_id: self.block_producer_id,
        }
    }

    /// Checkpoints before and after the transaction at `tx_index`.
    pub fn tx_checkpoints(&self, tx_index: u32) -> Option<(H256, H256)> {
        let index = tx_index as usize;
        let prev = if index == 0 {
            self.submit_transactions.prev_state_checkpoint
        } else {
            *self.state_checkpoint_list.get(index - 1)?
        };
        let post = *self.state_checkpoint_list.get(index)?;
        Some((prev, post))
    }
}

/// A (number, hash) entry of the block merkle tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHashEntry {
    /// Block number
    pub number: u64,
    /// Block hash
    #[serde(with = "serde_h256")]
    pub hash: H256,
}

/// A log record emitted by a contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogItem {
    /// Emitting account
    pub account_id: AccountId,
    /// Service flag
    pub service_flag: u8,
    /// Log payload
    #[serde(with = "serde_bytes_hex")]
    pub data: Vec<u8>,
}

impl fmt::Display for AccountMerkleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AccountMerkleState {{ root: {}, count: {} }}",
            hex::encode(self.merkle_root.as_slice()),
            self.count
        )
    }
}

impl fmt::Display for L2Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "L2Transaction {{ from: {}, to: {}, nonce: {}, args: {} bytes }}",
            self.from_id,
            self.to_id,
            self.nonce,
            self.args.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_account_key_namespacing() {
        let key = b"balance";
        assert_eq!(build_account_key(1, key), build_account_key(1, key));
        assert_ne!(build_account_key(1, key), build_account_key(2, key));
        assert_ne!(build_account_key(1, key), build_account_key(1, b"balancf"));
    }

    #[test]
    fn test_account_field_key_layout() {
        let key = build_account_field_key(0x0403_0201, GW_ACCOUNT_NONCE_TYPE);
        let bytes: [u8; 32] = key.into();
        assert_eq!(&bytes[..5], &[1, 2, 3, 4, GW_ACCOUNT_NONCE_TYPE]);
        assert!(bytes[5..].iter().all(|b| *b == 0));
        assert_ne!(
            build_account_field_key(7, GW_ACCOUNT_NONCE_TYPE),
            build_account_field_key(7, GW_ACCOUNT_SCRIPT_HASH_TYPE)
        );
    }

    #[test]
    fn test_kv_records() {
        let mut rng = rand::thread_rng();
        let pairs: Vec<KVPair> = (0..3)
            .map(|_| KVPair::new(rng.gen::<[u8; 32]>().into(), rng.gen::<[u8; 32]>().into()))
            .collect();
        let data = KVPair::encode_records(&pairs);
        assert_eq!(data.len(), 3 * KVPair::RECORD_BYTES);
        assert_eq!(KVPair::decode_records(&data), Some(pairs));
        assert_eq!(KVPair::decode_records(&data[..63]), None);
    }

    #[test]
    fn test_tx_checkpoints() {
        let mut block = RawBlock::default();
        block.submit_transactions.prev_state_checkpoint = [9u8; 32].into();
        block.state_checkpoint_list = vec![[1u8; 32].into(), [2u8; 32].into()];
        assert_eq!(
            block.tx_checkpoints(0),
            Some(([9u8; 32].into(), [1u8; 32].into()))
        );
        assert_eq!(
            block.tx_checkpoints(1),
            Some(([1u8; 32].into(), [2u8; 32].into()))
        );
        assert_eq!(block.tx_checkpoints(2), None);
    }

    #[test]
    fn test_block_hash_covers_checkpoints() {
        let mut block = RawBlock::default();
        let hash = block.hash();
        block.state_checkpoint_list.push([3u8; 32].into());
        assert_ne!(hash, block.hash());
    }

    #[test]
    fn test_json_uses_hex() {
        let pair = KVPair::new([0xabu8; 32].into(), H256::zero());
        let json = serde_json::to_string(&pair).unwrap();
        assert!(json.contains(&"ab".repeat(32)));
        let back: KVPair = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pair);
    }
}
