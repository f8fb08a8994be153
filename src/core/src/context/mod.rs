//! Execution contexts.
//!
//! Contract logic only ever talks to an [`ExecutionContext`]. The trait has a
//! handful of raw primitives that each backing implements; everything a
//! contract calls (account lookups, storage, data, logs, fees, snapshots) is
//! provided on top of them, so the generator and the validator derive the
//! same keys and perform the same reads and writes for the same inputs.

pub mod generator;
pub mod validator;

pub use generator::{GeneratorContext, TouchedState};
pub use validator::ValidatorContext;

use crate::contracts::ContractRegistry;
use crate::errors::CoreError;
use crate::hasher::hash_bytes;
use crate::types::{
    build_account_field_key, build_account_key, build_data_hash_key,
    build_script_hash_to_account_id_key, h256_from_u32, h256_to_u32, short_hex, AccountId,
    BlockInfo, L2Transaction, LogItem, Script, GW_ACCOUNT_NONCE_TYPE,
    GW_ACCOUNT_SCRIPT_HASH_TYPE,
};
use byteorder::{ByteOrder, LittleEndian};
use sparse_merkle_tree::H256;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Maximum size of contract return data.
pub const MAX_RETURN_DATA_SIZE: usize = 128 * 1024;
/// Maximum size of a stored data blob.
pub const MAX_DATA_SIZE: usize = 25 * 1024;
/// Maximum size of an encoded script.
pub const MAX_SCRIPT_SIZE: usize = 256;
/// How many recent blocks a contract may read the hash of, unless a context
/// is given another depth.
pub const BLOCK_HASH_DEPTH: u64 = 256;

/// Log service flag of fee records.
pub const LOG_SERVICE_PAY_FEE: u8 = 0x1;

/// Byte offset of the existence flag in a script-hash-to-id value.
const SCRIPT_HASH_EXISTS_FLAG: usize = 4;

#[derive(Clone, Debug, PartialEq, Eq)]
enum JournalEntry {
    Store { key: H256, previous: H256 },
    AccountCount { previous: u32 },
    NewScript { script_hash: H256 },
    NewData { data_hash: H256 },
}

/// A point execution can be reverted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    journal_len: usize,
    logs_len: usize,
}

/// Per-transaction state shared by both contexts.
#[derive(Clone, Debug, Default)]
pub struct ExecutionEnv {
    /// Block the transaction executes in
    pub block_info: BlockInfo,
    /// The executing transaction
    pub tx: L2Transaction,
    /// Data returned by the contract
    pub return_data: Vec<u8>,
    /// Logs emitted so far
    pub logs: Vec<LogItem>,
    /// Scripts of accounts created by this transaction
    pub new_scripts: BTreeMap<H256, Script>,
    /// Data blobs stored by this transaction
    pub new_data: BTreeMap<H256, Vec<u8>>,
    journal: Vec<JournalEntry>,
}

impl ExecutionEnv {
    /// Creates the environment of `tx` executing in `block_info`.
    pub fn new(block_info: BlockInfo, tx: L2Transaction) -> Self {
        Self {
            block_info,
            tx,
            ..Default::default()
        }
    }

    /// Hash of the current return data.
    pub fn return_data_hash(&self) -> H256 {
        hash_bytes(&self.return_data)
    }
}

/// The capability surface exposed to contract logic.
pub trait ExecutionContext {
    /// Reads a raw state value.
    fn load_raw(&mut self, key: &H256) -> Result<H256, CoreError>;

    /// Writes a raw state value.
    fn store_raw(&mut self, key: H256, value: H256) -> Result<(), CoreError>;

    /// Current number of accounts.
    fn account_count(&self) -> u32;

    /// Sets the number of accounts.
    fn set_account_count(&mut self, count: u32);

    /// Hash of a recent block.
    fn get_block_hash(&mut self, number: u64) -> Result<H256, CoreError>;

    /// Looks up a script of an existing account.
    fn fetch_script(&mut self, script_hash: &H256) -> Result<Option<Script>, CoreError>;

    /// Looks up a data blob stored before this transaction.
    fn fetch_data(&mut self, data_hash: &H256) -> Result<Option<Vec<u8>>, CoreError>;

    /// The transaction environment.
    fn env(&self) -> &ExecutionEnv;

    /// The transaction environment.
    fn env_mut(&mut self) -> &mut ExecutionEnv;

    /// Writes a raw value, remembering the previous one for [`revert`](Self::revert).
    fn put(&mut self, key: H256, value: H256) -> Result<(), CoreError> {
        let previous = self.load_raw(&key)?;
        self.env_mut().journal.push(JournalEntry::Store { key, previous });
        self.store_raw(key, value)
    }

    /// Script hash of an account, zero if the account does not exist.
    fn get_script_hash_by_account_id(&mut self, account_id: AccountId) -> Result<H256, CoreError> {
        self.load_raw(&build_account_field_key(account_id, GW_ACCOUNT_SCRIPT_HASH_TYPE))
    }

    /// Fails with `AccountNotExists` unless the account has a script hash.
    fn ensure_account_exists(&mut self, account_id: AccountId) -> Result<H256, CoreError> {
        let script_hash = self.get_script_hash_by_account_id(account_id)?;
        if script_hash.is_zero() {
            return Err(CoreError::AccountNotExists(account_id));
        }
        Ok(script_hash)
    }

    /// Id of the account with the given script hash.
    fn get_account_id_by_script_hash(
        &mut self,
        script_hash: &H256,
    ) -> Result<Option<AccountId>, CoreError> {
        let value = self.load_raw(&build_script_hash_to_account_id_key(script_hash))?;
        if value.as_slice()[SCRIPT_HASH_EXISTS_FLAG] != 1 {
            return Ok(None);
        }
        Ok(Some(h256_to_u32(&value)))
    }

    /// Reads an account storage slot.
    fn load(&mut self, account_id: AccountId, key: &[u8]) -> Result<H256, CoreError> {
        self.ensure_account_exists(account_id)?;
        self.load_raw(&build_account_key(account_id, key))
    }

    /// Writes an account storage slot.
    fn store(&mut self, account_id: AccountId, key: &[u8], value: H256) -> Result<(), CoreError> {
        self.ensure_account_exists(account_id)?;
        self.put(build_account_key(account_id, key), value)
    }

    /// Nonce of an account.
    fn get_account_nonce(&mut self, account_id: AccountId) -> Result<u32, CoreError> {
        self.ensure_account_exists(account_id)?;
        let value = self.load_raw(&build_account_field_key(account_id, GW_ACCOUNT_NONCE_TYPE))?;
        Ok(h256_to_u32(&value))
    }

    /// Script of an account.
    fn get_account_script(&mut self, account_id: AccountId) -> Result<Script, CoreError> {
        let script_hash = self.ensure_account_exists(account_id)?;
        if let Some(script) = self.env().new_scripts.get(&script_hash) {
            return Ok(script.clone());
        }
        self.fetch_script(&script_hash)?
            .ok_or_else(|| CoreError::ScriptNotFound(hex::encode(script_hash.as_slice())))
    }

    /// Creates an account running `script` and returns its id.
    fn create_account(&mut self, script: Script) -> Result<AccountId, CoreError> {
        if script.as_bytes().len() > MAX_SCRIPT_SIZE {
            return Err(CoreError::InvalidData(format!(
                "script exceeds {} bytes",
                MAX_SCRIPT_SIZE
            )));
        }
        let script_hash = script.hash();
        if self.get_account_id_by_script_hash(&script_hash)?.is_some() {
            return Err(CoreError::DuplicatedScriptHash(hex::encode(script_hash.as_slice())));
        }

        let id = self.account_count();
        let next = id
            .checked_add(1)
            .ok_or_else(|| CoreError::InvalidData("account count overflow".to_string()))?;
        self.put(build_account_field_key(id, GW_ACCOUNT_NONCE_TYPE), H256::zero())?;
        self.put(build_account_field_key(id, GW_ACCOUNT_SCRIPT_HASH_TYPE), script_hash)?;
        let mut id_value: [u8; 32] = h256_from_u32(id).into();
        id_value[SCRIPT_HASH_EXISTS_FLAG] = 1;
        self.put(build_script_hash_to_account_id_key(&script_hash), id_value.into())?;

        let previous = self.account_count();
        self.env_mut().journal.push(JournalEntry::AccountCount { previous });
        self.set_account_count(next);
        if self.env_mut().new_scripts.insert(script_hash, script).is_none() {
            self.env_mut().journal.push(JournalEntry::NewScript { script_hash });
        }
        debug!(id, script_hash = %short_hex(&script_hash), "account created");
        Ok(id)
    }

    /// Stores a data blob and returns its hash.
    fn store_data(&mut self, data: &[u8]) -> Result<H256, CoreError> {
        if data.len() > MAX_DATA_SIZE {
            return Err(CoreError::InvalidData(format!(
                "data exceeds {} bytes",
                MAX_DATA_SIZE
            )));
        }
        let data_hash = hash_bytes(data);
        if data.is_empty() {
            return Ok(data_hash);
        }
        self.put(build_data_hash_key(&data_hash), h256_from_u32(1))?;
        if self.env_mut().new_data.insert(data_hash, data.to_vec()).is_none() {
            self.env_mut().journal.push(JournalEntry::NewData { data_hash });
        }
        Ok(data_hash)
    }

    /// Reads up to `len` bytes from `offset` of a stored data blob.
    fn load_data(&mut self, data_hash: &H256, offset: usize, len: usize) -> Result<Vec<u8>, CoreError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let marker = self.load_raw(&build_data_hash_key(data_hash))?;
        if marker.is_zero() {
            return Err(CoreError::NotFound(hex::encode(data_hash.as_slice())));
        }
        let data = match self.env().new_data.get(data_hash) {
            Some(data) => data.clone(),
            None => self
                .fetch_data(data_hash)?
                .ok_or_else(|| CoreError::NotFound(hex::encode(data_hash.as_slice())))?,
        };
        if offset >= data.len() {
            return Ok(Vec::new());
        }
        let end = offset.saturating_add(len).min(data.len());
        Ok(data[offset..end].to_vec())
    }

    /// Sets the data returned by the transaction.
    fn set_return_data(&mut self, data: &[u8]) -> Result<(), CoreError> {
        if data.len() > MAX_RETURN_DATA_SIZE {
            return Err(CoreError::InvalidData(format!(
                "return data exceeds {} bytes",
                MAX_RETURN_DATA_SIZE
            )));
        }
        self.env_mut().return_data = data.to_vec();
        Ok(())
    }

    /// Emits a log record on behalf of an account.
    fn log(&mut self, account_id: AccountId, service_flag: u8, data: &[u8]) -> Result<(), CoreError> {
        self.ensure_account_exists(account_id)?;
        self.env_mut().logs.push(LogItem {
            account_id,
            service_flag,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Records a fee paid by `payer_id` in the token held by `token_id`.
    fn pay_fee(&mut self, payer_id: AccountId, token_id: AccountId, amount: u128) -> Result<(), CoreError> {
        self.ensure_account_exists(payer_id)?;
        self.ensure_account_exists(token_id)?;
        let mut data = vec![0u8; 24];
        LittleEndian::write_u32(&mut data[0..4], payer_id);
        LittleEndian::write_u32(&mut data[4..8], token_id);
        LittleEndian::write_u128(&mut data[8..24], amount);
        self.env_mut().logs.push(LogItem {
            account_id: token_id,
            service_flag: LOG_SERVICE_PAY_FEE,
            data,
        });
        Ok(())
    }

    /// Marks the current state so it can be restored with [`revert`](Self::revert).
    fn snapshot(&mut self) -> Snapshot {
        let env = self.env();
        Snapshot {
            journal_len: env.journal.len(),
            logs_len: env.logs.len(),
        }
    }

    /// Undoes every write made since `snapshot`, including created scripts and
    /// stored data blobs.
    fn revert(&mut self, snapshot: Snapshot) -> Result<(), CoreError> {
        if snapshot.journal_len > self.env().journal.len() || snapshot.logs_len > self.env().logs.len() {
            return Err(CoreError::FatalContext("revert to an expired snapshot".to_string()));
        }
        while self.env().journal.len() > snapshot.journal_len {
            let entry = match self.env_mut().journal.pop() {
                Some(entry) => entry,
                None => break,
            };
            match entry {
                JournalEntry::Store { key, previous } => self.store_raw(key, previous)?,
                JournalEntry::AccountCount { previous } => self.set_account_count(previous),
                JournalEntry::NewScript { script_hash } => {
                    self.env_mut().new_scripts.remove(&script_hash);
                }
                JournalEntry::NewData { data_hash } => {
                    self.env_mut().new_data.remove(&data_hash);
                }
            }
        }
        self.env_mut().logs.truncate(snapshot.logs_len);
        Ok(())
    }
}

/// Fails with `NotFound` unless block `number` is one of the `depth` blocks
/// before `current`.
pub(crate) fn check_block_hash_window(current: u64, number: u64, depth: u64) -> Result<(), CoreError> {
    if number >= current || current - number > depth {
        return Err(CoreError::NotFound(format!("block hash #{}", number)));
    }
    Ok(())
}

/// Runs the transaction of the context's environment.
///
/// Dispatches on the code hash of the target account's script, then bumps the
/// sender nonce unless the contract already moved it forward.
pub fn execute_transaction(
    ctx: &mut dyn ExecutionContext,
    registry: &ContractRegistry,
) -> Result<(), CoreError> {
    let tx = ctx.env().tx.clone();
    let original_nonce = ctx.get_account_nonce(tx.from_id)?;
    let script = ctx.get_account_script(tx.to_id)?;
    let contract = registry
        .get(&script.code_hash)
        .ok_or_else(|| CoreError::ScriptNotFound(hex::encode(script.code_hash.as_slice())))?;

    debug!(
        from = tx.from_id,
        to = tx.to_id,
        contract = contract.name(),
        "executing transaction"
    );
    contract.run(ctx)?;
    finalize_sender_nonce(ctx, tx.from_id, original_nonce)
}

/// Increases the sender nonce by one if execution left it unchanged.
pub fn finalize_sender_nonce(
    ctx: &mut dyn ExecutionContext,
    sender_id: AccountId,
    original_nonce: u32,
) -> Result<(), CoreError> {
    let nonce = ctx.get_account_nonce(sender_id)?;
    if nonce < original_nonce {
        warn!(sender_id, original_nonce, nonce, "sender nonce decreased");
        return Err(CoreError::InvalidNonce { expected: original_nonce, actual: nonce });
    }
    if nonce == original_nonce {
        let next = nonce
            .checked_add(1)
            .ok_or_else(|| CoreError::InvalidData("nonce overflow".to_string()))?;
        ctx.put(
            build_account_field_key(sender_id, GW_ACCOUNT_NONCE_TYPE),
            h256_from_u32(next),
        )?;
    }
    Ok(())
}
