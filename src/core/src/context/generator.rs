//! Generator-side execution context backed by the live state store.

use super::{check_block_hash_window, ExecutionContext, ExecutionEnv, BLOCK_HASH_DEPTH};
use crate::errors::CoreError;
use crate::smt::State;
use crate::types::{block_smt_key, BlockHashEntry, KVPair, Script};
use sparse_merkle_tree::H256;
use std::collections::BTreeMap;

/// Everything a transaction read from the state, captured for replay.
#[derive(Clone, Debug, Default)]
pub struct TouchedState {
    /// Value of every touched key before the transaction, sorted by key
    pub kv_state: Vec<KVPair>,
    /// Account count before the transaction
    pub account_count: u32,
    /// Scripts of pre-existing accounts that were looked up
    pub scripts: Vec<Script>,
    /// Pre-existing data blobs that were loaded
    pub load_data: Vec<Vec<u8>>,
    /// Block hashes that were read
    pub block_hashes: Vec<BlockHashEntry>,
}

/// Executes contract logic directly against a [`State`].
///
/// Every key is recorded with the value it had before its first access, so the
/// exact set of pairs the validator needs can be rebuilt afterwards.
pub struct GeneratorContext<'a, S: State> {
    state: &'a mut S,
    block_tree: &'a S,
    account_count: u32,
    initial_account_count: u32,
    block_hash_depth: u64,
    env: ExecutionEnv,
    touched: BTreeMap<H256, H256>,
    used_scripts: BTreeMap<H256, Script>,
    used_data: BTreeMap<H256, Vec<u8>>,
    used_block_hashes: BTreeMap<u64, H256>,
}

impl<'a, S: State> GeneratorContext<'a, S> {
    /// Creates a context executing `env` over `state`, reading block hashes from
    /// `block_tree`.
    pub fn new(state: &'a mut S, block_tree: &'a S, env: ExecutionEnv) -> Result<Self, CoreError> {
        let account_count = state.get_account_count()?;
        Ok(Self {
            state,
            block_tree,
            account_count,
            initial_account_count: account_count,
            block_hash_depth: BLOCK_HASH_DEPTH,
            env,
            touched: BTreeMap::new(),
            used_scripts: BTreeMap::new(),
            used_data: BTreeMap::new(),
            used_block_hashes: BTreeMap::new(),
        })
    }

    /// Limits block hash reads to the `depth` blocks before the current one.
    pub fn with_block_hash_depth(mut self, depth: u64) -> Self {
        self.block_hash_depth = depth;
        self
    }

    fn touch(&mut self, key: &H256) -> Result<H256, CoreError> {
        let current = self.state.get_raw(key)?;
        self.touched.entry(*key).or_insert(current);
        Ok(current)
    }

    /// Writes back the account count and new scripts and data, returning the
    /// environment and the captured pre-state.
    pub fn finish(self) -> Result<(ExecutionEnv, TouchedState), CoreError> {
        self.state.set_account_count(self.account_count)?;
        for script in self.env.new_scripts.values() {
            self.state.insert_script(script.clone())?;
        }
        for (hash, data) in &self.env.new_data {
            self.state.insert_data(*hash, data.clone())?;
        }

        let touched = TouchedState {
            kv_state: self
                .touched
                .iter()
                .map(|(key, value)| KVPair::new(*key, *value))
                .collect(),
            account_count: self.initial_account_count,
            scripts: self.used_scripts.into_values().collect(),
            load_data: self.used_data.into_values().collect(),
            block_hashes: self
                .used_block_hashes
                .into_iter()
                .map(|(number, hash)| BlockHashEntry { number, hash })
                .collect(),
        };
        Ok((self.env, touched))
    }
}

impl<'a, S: State> ExecutionContext for GeneratorContext<'a, S> {
    fn load_raw(&mut self, key: &H256) -> Result<H256, CoreError> {
        self.touch(key)
    }

    fn store_raw(&mut self, key: H256, value: H256) -> Result<(), CoreError> {
        self.touch(&key)?;
        self.state.update_raw(key, value)
    }

    fn account_count(&self) -> u32 {
        self.account_count
    }

    fn set_account_count(&mut self, count: u32) {
        self.account_count = count;
    }

    fn get_block_hash(&mut self, number: u64) -> Result<H256, CoreError> {
        check_block_hash_window(self.env.block_info.number, number, self.block_hash_depth)?;
        let hash = self.block_tree.get_raw(&block_smt_key(number))?;
        if hash.is_zero() {
            return Err(CoreError::NotFound(format!("block hash #{}", number)));
        }
        self.used_block_hashes.insert(number, hash);
        Ok(hash)
    }

    fn fetch_script(&mut self, script_hash: &H256) -> Result<Option<Script>, CoreError> {
        let script = self.state.get_script(script_hash)?;
        if let Some(script) = &script {
            self.used_scripts.insert(*script_hash, script.clone());
        }
        Ok(script)
    }

    fn fetch_data(&mut self, data_hash: &H256) -> Result<Option<Vec<u8>>, CoreError> {
        let data = self.state.get_data(data_hash)?;
        if let Some(data) = &data {
            self.used_data.insert(*data_hash, data.clone());
        }
        Ok(data)
    }

    fn env(&self) -> &ExecutionEnv {
        &self.env
    }

    fn env_mut(&mut self) -> &mut ExecutionEnv {
        &mut self.env
    }
}
