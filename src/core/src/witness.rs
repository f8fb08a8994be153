//! Challenge inputs: what a challenger submits to dispute one transaction.

use crate::cbmt;
use crate::errors::CoreError;
use crate::generator::Generator;
use crate::smt::State;
use crate::types::{
    block_smt_key, serde_bytes_hex, serde_h256, serde_h256_vec, BlockHashEntry, KVPair,
    L2Transaction, RawBlock, Script,
};
use serde::{Deserialize, Serialize};
use sparse_merkle_tree::H256;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// The disputed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeTarget {
    /// Hash of the block holding the transaction
    #[serde(with = "serde_h256")]
    pub block_hash: H256,
    /// Index of the transaction in the block
    pub tx_index: u32,
}

/// A data blob loaded by the transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadData {
    /// The blob
    #[serde(with = "serde_bytes_hex")]
    pub data: Vec<u8>,
}

/// Everything needed to replay a single transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyTransactionWitness {
    /// Header of the block holding the transaction
    pub raw_block: RawBlock,
    /// The transaction
    pub l2tx: L2Transaction,
    /// Inclusion proof of the transaction in the block
    #[serde(with = "serde_h256_vec")]
    pub tx_proof: Vec<H256>,
    /// Pre-state of every key the transaction touches
    pub kv_state: Vec<KVPair>,
    /// Compact proof of `kv_state`
    #[serde(with = "serde_bytes_hex")]
    pub kv_state_proof: Vec<u8>,
    /// Block hashes read by the transaction
    pub block_hashes: Vec<BlockHashEntry>,
    /// Compact proof of `block_hashes` against the block merkle root
    #[serde(with = "serde_bytes_hex")]
    pub block_hashes_proof: Vec<u8>,
    /// Account count before the transaction
    pub account_count: u32,
    /// Scripts of pre-existing accounts the transaction looks up
    pub scripts: Vec<Script>,
    /// Data blobs the transaction loads
    pub load_data: Vec<LoadData>,
    /// Hash of the data the transaction returned
    #[serde(with = "serde_h256")]
    pub return_data_hash: H256,
}

/// A challenge: the target, the rollup's block merkle root and the witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeInput {
    /// The disputed transaction
    pub target: ChallengeTarget,
    /// Root of the block merkle tree committed by the rollup
    #[serde(with = "serde_h256")]
    pub block_merkle_root: H256,
    /// The replay witness
    pub witness: VerifyTransactionWitness,
}

/// File encoding of challenge inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WitnessEncoding {
    /// JSON with hex strings
    Json,
    /// bincode
    Bincode,
}

impl Default for WitnessEncoding {
    fn default() -> Self {
        WitnessEncoding::Json
    }
}

impl FromStr for WitnessEncoding {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WitnessEncoding::Json),
            "bincode" | "bin" => Ok(WitnessEncoding::Bincode),
            other => Err(CoreError::InvalidData(format!("unknown witness encoding: {}", other))),
        }
    }
}

impl fmt::Display for WitnessEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WitnessEncoding::Json => write!(f, "json"),
            WitnessEncoding::Bincode => write!(f, "bincode"),
        }
    }
}

impl ChallengeInput {
    /// Encodes the input.
    pub fn encode(&self, encoding: WitnessEncoding) -> Result<Vec<u8>, CoreError> {
        match encoding {
            WitnessEncoding::Json => Ok(serde_json::to_vec_pretty(self)?),
            WitnessEncoding::Bincode => Ok(bincode::serialize(self)?),
        }
    }

    /// Decodes an input.
    pub fn decode(data: &[u8], encoding: WitnessEncoding) -> Result<Self, CoreError> {
        match encoding {
            WitnessEncoding::Json => Ok(serde_json::from_slice(data)?),
            WitnessEncoding::Bincode => Ok(bincode::deserialize(data)?),
        }
    }
}

/// Builds the challenge input disputing transaction `tx_index` of a block.
pub fn build_challenge_input(
    generator: &Generator,
    block_hash: &H256,
    tx_index: u32,
) -> Result<ChallengeInput, CoreError> {
    let block = generator
        .block_by_hash(block_hash)
        .ok_or_else(|| CoreError::NotFound(format!("block {}", hex::encode(block_hash.as_slice()))))?;
    let index = tx_index as usize;
    let (l2tx, replay) = match (block.transactions.get(index), block.replays.get(index)) {
        (Some(tx), Some(replay)) => (tx.clone(), replay),
        _ => {
            return Err(CoreError::NotFound(format!(
                "tx {} of block #{}",
                tx_index, block.raw.number
            )))
        }
    };

    let tx_proof = cbmt::build_proof(&cbmt::tx_leaves(&block.transactions), index)?;

    let mut block_hashes = replay.touched.block_hashes.clone();
    block_hashes.sort_by_key(|entry| block_smt_key(entry.number));
    let block_hashes_proof = if block_hashes.is_empty() {
        Vec::new()
    } else {
        let keys: Vec<H256> = block_hashes.iter().map(|entry| block_smt_key(entry.number)).collect();
        generator.block_tree().merkle_proof(&keys)?
    };

    let witness = VerifyTransactionWitness {
        raw_block: block.raw.clone(),
        l2tx,
        tx_proof,
        kv_state: replay.touched.kv_state.clone(),
        kv_state_proof: replay.kv_state_proof.clone(),
        block_hashes,
        block_hashes_proof,
        account_count: replay.touched.account_count,
        scripts: replay.touched.scripts.clone(),
        load_data: replay
            .touched
            .load_data
            .iter()
            .map(|data| LoadData { data: data.clone() })
            .collect(),
        return_data_hash: replay.return_data_hash,
    };
    debug!(
        block = block.raw.number,
        tx_index,
        kv_pairs = witness.kv_state.len(),
        block_hashes = witness.block_hashes.len(),
        "challenge input built"
    );

    Ok(ChallengeInput {
        target: ChallengeTarget { block_hash: *block_hash, tx_index },
        block_merkle_root: generator.block_merkle_root(),
        witness,
    })
}
