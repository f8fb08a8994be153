//! Contract backends and the built-in reference contracts.
//!
//! A transaction runs the backend registered under the code hash of its target
//! account's script. Backends only see the [`ExecutionContext`], which keeps
//! them oblivious to whether they run in the generator or in a replay.

use crate::context::ExecutionContext;
use crate::errors::CoreError;
use crate::hasher::hash_bytes;
use crate::types::{h256_from_u32, KVPair, Script};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use sparse_merkle_tree::H256;
use std::collections::HashMap;

/// Log service flag of kv store writes.
pub const LOG_SERVICE_KV_STORE: u8 = 0x10;

/// Archive operation: store the payload as a data blob.
pub const ARCHIVE_OP_STORE: u8 = 0;
/// Archive operation: return the blob whose hash is the payload.
pub const ARCHIVE_OP_READ: u8 = 1;

/// Contract logic invoked through an execution context.
pub trait Contract {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Runs the transaction in `ctx.env().tx`.
    fn run(&self, ctx: &mut dyn ExecutionContext) -> Result<(), CoreError>;
}

/// Backends by code hash.
#[derive(Default)]
pub struct ContractRegistry {
    backends: HashMap<H256, Box<dyn Contract>>,
}

impl ContractRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in contracts.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(meta_code_hash(), Box::new(MetaContract));
        registry.register(kv_store_code_hash(), Box::new(KvStoreContract));
        registry.register(archive_code_hash(), Box::new(ArchiveContract));
        registry
    }

    /// Registers a backend, replacing any previous one for the code hash.
    pub fn register(&mut self, code_hash: H256, contract: Box<dyn Contract>) {
        self.backends.insert(code_hash, contract);
    }

    /// Backend for a code hash.
    pub fn get(&self, code_hash: &H256) -> Option<&dyn Contract> {
        self.backends.get(code_hash).map(|contract| contract.as_ref())
    }
}

/// Code hash of the account creator.
pub fn meta_code_hash() -> H256 {
    hash_bytes(b"rollup.contract.meta")
}

/// Code hash of the kv store.
pub fn kv_store_code_hash() -> H256 {
    hash_bytes(b"rollup.contract.kv-store")
}

/// Code hash of the archive.
pub fn archive_code_hash() -> H256 {
    hash_bytes(b"rollup.contract.archive")
}

/// Code hash of user accounts. User accounts run no contract.
pub fn user_code_hash() -> H256 {
    hash_bytes(b"rollup.user")
}

/// Script of a user account identified by `pubkey`.
pub fn user_script(pubkey: &[u8]) -> Script {
    Script::new(user_code_hash(), 0, pubkey.to_vec())
}

/// Arguments of the account creator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountArgs {
    /// Script of the new account
    pub script: Script,
    /// Fee paid by the sender
    pub fee: u64,
}

impl CreateAccountArgs {
    /// Encodes the arguments for a transaction.
    pub fn encode(&self) -> Result<Vec<u8>, CoreError> {
        Ok(bincode::serialize(self)?)
    }
}

/// Creates accounts and returns the new id.
pub struct MetaContract;

impl Contract for MetaContract {
    fn name(&self) -> &'static str {
        "meta"
    }

    fn run(&self, ctx: &mut dyn ExecutionContext) -> Result<(), CoreError> {
        let tx = ctx.env().tx.clone();
        let args: CreateAccountArgs = bincode::deserialize(&tx.args)
            .map_err(|e| CoreError::Contract(format!("invalid create account args: {}", e)))?;
        if args.fee > 0 {
            ctx.pay_fee(tx.from_id, tx.to_id, u128::from(args.fee))?;
        }
        let id = ctx.create_account(args.script)?;
        let mut out = [0u8; 4];
        LittleEndian::write_u32(&mut out, id);
        ctx.set_return_data(&out)
    }
}

/// Writes 64-byte `(key, value)` records into slots owned by the sender and
/// returns the previous values.
pub struct KvStoreContract;

impl KvStoreContract {
    fn slot(sender: u32, key: &H256) -> [u8; 36] {
        let mut slot = [0u8; 36];
        LittleEndian::write_u32(&mut slot[..4], sender);
        slot[4..].copy_from_slice(key.as_slice());
        slot
    }
}

impl Contract for KvStoreContract {
    fn name(&self) -> &'static str {
        "kv-store"
    }

    fn run(&self, ctx: &mut dyn ExecutionContext) -> Result<(), CoreError> {
        let tx = ctx.env().tx.clone();
        let records = KVPair::decode_records(&tx.args).ok_or_else(|| {
            CoreError::Contract(format!("args length {} is not a multiple of 64", tx.args.len()))
        })?;

        let mut previous = Vec::with_capacity(records.len() * 32);
        for record in &records {
            let slot = Self::slot(tx.from_id, &record.key);
            previous.extend_from_slice(ctx.load(tx.to_id, &slot)?.as_slice());
            ctx.store(tx.to_id, &slot, record.value)?;
        }

        let mut count = [0u8; 4];
        LittleEndian::write_u32(&mut count, records.len() as u32);
        ctx.log(tx.to_id, LOG_SERVICE_KV_STORE, &count)?;
        ctx.set_return_data(&previous)
    }
}

/// Archives data blobs, stamping each with the parent block hash.
///
/// Args start with an operation byte: [`ARCHIVE_OP_STORE`] followed by the
/// blob, or [`ARCHIVE_OP_READ`] followed by a 32-byte blob hash.
pub struct ArchiveContract;

impl Contract for ArchiveContract {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn run(&self, ctx: &mut dyn ExecutionContext) -> Result<(), CoreError> {
        let tx = ctx.env().tx.clone();
        let (op, payload) = tx
            .args
            .split_first()
            .ok_or_else(|| CoreError::Contract("empty archive args".to_string()))?;

        match *op {
            ARCHIVE_OP_STORE => {
                if payload.is_empty() {
                    return Err(CoreError::Contract("empty blob".to_string()));
                }
                let data_hash = ctx.store_data(payload)?;
                if ctx.load_data(&data_hash, 0, payload.len())? != payload {
                    return Err(CoreError::Contract("stored blob does not read back".to_string()));
                }

                let number = ctx.env().block_info.number;
                let stamp = if number > 0 {
                    ctx.get_block_hash(number - 1)?
                } else {
                    h256_from_u32(1)
                };
                ctx.store(tx.to_id, data_hash.as_slice(), stamp)?;
                ctx.store(tx.to_id, b"latest", data_hash)?;
                ctx.set_return_data(data_hash.as_slice())
            }
            ARCHIVE_OP_READ => {
                if payload.len() != 32 {
                    return Err(CoreError::Contract("blob hash must be 32 bytes".to_string()));
                }
                let mut hash = [0u8; 32];
                hash.copy_from_slice(payload);
                let data_hash: H256 = hash.into();
                if ctx.load(tx.to_id, data_hash.as_slice())?.is_zero() {
                    return Err(CoreError::Contract("blob was not archived here".to_string()));
                }
                let data = ctx.load_data(&data_hash, 0, usize::MAX)?;
                ctx.set_return_data(&data)
            }
            other => Err(CoreError::Contract(format!("unknown archive op {}", other))),
        }
    }
}
