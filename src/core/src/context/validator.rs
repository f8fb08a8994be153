//! Validator-side execution context backed by witness data.

use super::{check_block_hash_window, ExecutionContext, ExecutionEnv, BLOCK_HASH_DEPTH};
use crate::errors::CoreError;
use crate::hasher::hash_bytes;
use crate::overlay::StateOverlay;
use crate::types::{block_smt_key, Script};
use sparse_merkle_tree::H256;
use std::collections::BTreeMap;

/// Executes contract logic against the key/value pairs of a replay witness.
///
/// Reads of keys that are not in the witness fail; the witness must carry
/// every key the transaction touches.
pub struct ValidatorContext {
    kv_state: StateOverlay,
    block_hashes: StateOverlay,
    account_count: u32,
    scripts: BTreeMap<H256, Script>,
    load_data: BTreeMap<H256, Vec<u8>>,
    block_hash_depth: u64,
    env: ExecutionEnv,
}

impl ValidatorContext {
    /// Creates a context over verified witness data.
    pub fn new(
        env: ExecutionEnv,
        kv_state: StateOverlay,
        block_hashes: StateOverlay,
        account_count: u32,
        scripts: Vec<Script>,
        load_data: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            kv_state,
            block_hashes,
            account_count,
            scripts: scripts.into_iter().map(|script| (script.hash(), script)).collect(),
            load_data: load_data.into_iter().map(|data| (hash_bytes(&data), data)).collect(),
            block_hash_depth: BLOCK_HASH_DEPTH,
            env,
        }
    }

    /// Limits block hash reads to the `depth` blocks before the current one.
    pub fn with_block_hash_depth(mut self, depth: u64) -> Self {
        self.block_hash_depth = depth;
        self
    }

    /// The state overlay.
    pub fn kv_state(&self) -> &StateOverlay {
        &self.kv_state
    }

    /// The state overlay, for checkpoint verification.
    pub fn kv_state_mut(&mut self) -> &mut StateOverlay {
        &mut self.kv_state
    }
}

impl ExecutionContext for ValidatorContext {
    fn load_raw(&mut self, key: &H256) -> Result<H256, CoreError> {
        self.kv_state.fetch(key)
    }

    fn store_raw(&mut self, key: H256, value: H256) -> Result<(), CoreError> {
        self.kv_state.update(key, value)
    }

    fn account_count(&self) -> u32 {
        self.account_count
    }

    fn set_account_count(&mut self, count: u32) {
        self.account_count = count;
    }

    fn get_block_hash(&mut self, number: u64) -> Result<H256, CoreError> {
        check_block_hash_window(self.env.block_info.number, number, self.block_hash_depth)?;
        self.block_hashes
            .fetch(&block_smt_key(number))
            .map_err(|_| CoreError::NotFound(format!("block hash #{}", number)))
    }

    fn fetch_script(&mut self, script_hash: &H256) -> Result<Option<Script>, CoreError> {
        Ok(self.scripts.get(script_hash).cloned())
    }

    fn fetch_data(&mut self, data_hash: &H256) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.load_data.get(data_hash).cloned())
    }

    fn env(&self) -> &ExecutionEnv {
        &self.env
    }

    fn env_mut(&mut self) -> &mut ExecutionEnv {
        &mut self.env
    }
}
