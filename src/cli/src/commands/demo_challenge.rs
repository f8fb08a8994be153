//! Demo-challenge command for the rollup CLI.
//!
//! Builds a small chain in memory and writes the challenge input disputing one
//! of its transactions, optionally corrupting a byte of it.

use crate::config::VerifierConfig;
use crate::errors::CliError;
use rollup_core::contracts::{
    archive_code_hash, kv_store_code_hash, meta_code_hash, user_script, CreateAccountArgs,
    ARCHIVE_OP_READ, ARCHIVE_OP_STORE,
};
use rollup_core::hasher::hash_bytes;
use rollup_core::{
    build_challenge_input, AccountId, ContractRegistry, CoreError, Generator, KVPair,
    L2Transaction, Script, WitnessEncoding, H256,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Account id of the account creator.
pub const META_ID: AccountId = 0;
/// Account id of the kv store.
pub const KV_STORE_ID: AccountId = 1;
/// Account id of the archive.
pub const ARCHIVE_ID: AccountId = 2;
/// Account id of the first demo user.
pub const ALICE_ID: AccountId = 3;
/// Account id of the second demo user.
pub const BOB_ID: AccountId = 4;

/// Blob archived by the demo chain.
pub const DEMO_BLOB: &[u8] = b"rollup demo archive blob";

fn kv_write(from_id: AccountId, nonce: u32, pairs: &[(u8, u8)]) -> L2Transaction {
    let records: Vec<KVPair> = pairs
        .iter()
        .map(|(key, value)| KVPair::new([*key; 32].into(), [*value; 32].into()))
        .collect();
    L2Transaction::new(from_id, KV_STORE_ID, nonce, KVPair::encode_records(&records))
}

fn archive(from_id: AccountId, nonce: u32, op: u8, payload: &[u8]) -> L2Transaction {
    let mut args = vec![op];
    args.extend_from_slice(payload);
    L2Transaction::new(from_id, ARCHIVE_ID, nonce, args)
}

/// Builds the demo chain.
///
/// Block 1 holds kv writes, an account creation and an archive store. Block 2
/// overwrites kv slots, reads the archived blob back and archives a second one.
pub fn build_demo_chain() -> Result<Generator, CoreError> {
    let scripts = vec![
        Script::new(meta_code_hash(), 0, Vec::new()),
        Script::new(kv_store_code_hash(), 0, Vec::new()),
        Script::new(archive_code_hash(), 0, Vec::new()),
        user_script(b"alice"),
        user_script(b"bob"),
    ];
    let mut generator = Generator::genesis(ContractRegistry::builtin(), scripts)?;

    let create = CreateAccountArgs { script: user_script(b"carol"), fee: 10 };
    generator.produce_block(
        vec![
            kv_write(ALICE_ID, 0, &[(1, 10), (2, 20)]),
            L2Transaction::new(BOB_ID, META_ID, 0, create.encode()?),
            archive(ALICE_ID, 1, ARCHIVE_OP_STORE, DEMO_BLOB),
        ],
        1_000,
    )?;

    let blob_hash = hash_bytes(DEMO_BLOB);
    generator.produce_block(
        vec![
            kv_write(BOB_ID, 1, &[(1, 11)]),
            archive(ALICE_ID, 2, ARCHIVE_OP_READ, blob_hash.as_slice()),
            kv_write(ALICE_ID, 3, &[(1, 12), (3, 30)]),
            archive(BOB_ID, 2, ARCHIVE_OP_STORE, b"second blob"),
        ],
        2_000,
    )?;

    Ok(generator)
}

/// What the demo-challenge command wrote.
#[derive(Clone, Debug)]
pub struct DemoSummary {
    /// Path of the challenge input
    pub output: PathBuf,
    /// Disputed block
    pub block_number: u64,
    /// Hash of the disputed block
    pub block_hash: H256,
    /// Disputed transaction
    pub tx_index: u32,
    /// Size of the written input
    pub size: usize,
    /// Offset of the flipped byte, if any
    pub corrupted: Option<usize>,
}

/// Runs the demo-challenge command.
pub fn run(
    config: &VerifierConfig,
    output: &Path,
    block: Option<u64>,
    tx_index: u32,
    corrupt_byte: Option<usize>,
    encoding: Option<WitnessEncoding>,
) -> Result<DemoSummary, CliError> {
    let encoding = encoding.unwrap_or(config.witness_encoding);
    let generator = build_demo_chain()?;

    let produced = match block {
        Some(number) => generator
            .block(number)
            .ok_or_else(|| CliError::InvalidArgument(format!("no block #{}", number)))?,
        None => generator
            .tip()
            .ok_or_else(|| CliError::InvalidArgument("empty chain".to_string()))?,
    };
    let block_hash = produced.hash();
    let block_number = produced.raw.number;
    debug!("Disputing tx {} of block #{}", tx_index, block_number);

    let input = build_challenge_input(&generator, &block_hash, tx_index)?;
    let mut data = input.encode(encoding)?;
    if let Some(offset) = corrupt_byte {
        let len = data.len();
        let byte = data.get_mut(offset).ok_or_else(|| {
            CliError::InvalidArgument(format!(
                "corrupt offset {} is past the end of the {} byte input",
                offset, len
            ))
        })?;
        *byte ^= 0x01;
        info!("Flipped byte {} of the challenge input", offset);
    }
    std::fs::write(output, &data)?;

    Ok(DemoSummary {
        output: output.to_path_buf(),
        block_number,
        block_hash,
        tx_index,
        size: data.len(),
        corrupted: corrupt_byte,
    })
}
