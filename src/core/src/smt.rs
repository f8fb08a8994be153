//! Sparse Merkle Tree state store used by the generator.
//!
//! Leaves are kept in a map ordered by path; the root and compact proofs are
//! computed on demand with the same hashing rules as the proof evaluator, so
//! a compiled proof always reproduces [`SMT::root`].

use crate::errors::CoreError;
use crate::hasher::{hash_leaf, lift, merge};
use crate::proofs::{OP_LEAF, OP_MERGE, OP_PARENT};
use crate::types::{short_hex, AccountMerkleState, Script};
use sparse_merkle_tree::H256;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// Authenticated key/value storage with an account counter.
pub trait State {
    /// Reads a value; absent keys read as zero.
    fn get_raw(&self, key: &H256) -> Result<H256, CoreError>;

    /// Writes a value; writing zero removes the key.
    fn update_raw(&mut self, key: H256, value: H256) -> Result<(), CoreError>;

    /// Number of accounts.
    fn get_account_count(&self) -> Result<u32, CoreError>;

    /// Sets the number of accounts.
    fn set_account_count(&mut self, count: u32) -> Result<(), CoreError>;

    /// Root of the tree.
    fn calculate_root(&self) -> Result<H256, CoreError>;

    /// Compact proof for `keys`, which must be sorted and unique.
    fn merkle_proof(&self, keys: &[H256]) -> Result<Vec<u8>, CoreError>;

    /// Looks a script up by hash.
    fn get_script(&self, script_hash: &H256) -> Result<Option<Script>, CoreError>;

    /// Stores a script under its hash.
    fn insert_script(&mut self, script: Script) -> Result<H256, CoreError>;

    /// Looks a data blob up by hash.
    fn get_data(&self, data_hash: &H256) -> Result<Option<Vec<u8>>, CoreError>;

    /// Stores a data blob under its hash.
    fn insert_data(&mut self, data_hash: H256, data: Vec<u8>) -> Result<(), CoreError>;

    /// Root and account count.
    fn merkle_state(&self) -> Result<AccountMerkleState, CoreError> {
        Ok(AccountMerkleState::new(self.calculate_root()?, self.get_account_count()?))
    }

    /// Checkpoint of the current state.
    fn calculate_checkpoint(&self) -> Result<H256, CoreError> {
        Ok(self.merkle_state()?.checkpoint())
    }
}

/// In-memory Sparse Merkle Tree with the scripts and data blobs it refers to.
#[derive(Clone, Default)]
pub struct SMT {
    /// Non-zero leaves ordered by path
    leaves: BTreeMap<H256, H256>,
    /// Number of accounts
    account_count: u32,
    /// Scripts by hash
    scripts: HashMap<H256, Script>,
    /// Data blobs by hash
    data: HashMap<H256, Vec<u8>>,
}

impl SMT {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Root of the tree.
    pub fn root(&self) -> H256 {
        let leaves: Vec<(H256, H256)> = self.leaves.iter().map(|(k, v)| (*k, *v)).collect();
        subtree_hash(256, &leaves)
    }

    /// Number of non-zero leaves.
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// Whether the tree has no non-zero leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Non-zero leaves in path order.
    pub fn leaves(&self) -> impl Iterator<Item = (&H256, &H256)> {
        self.leaves.iter()
    }

    fn compile(
        &self,
        height: u16,
        targets: &[H256],
        leaves: &[(H256, H256)],
        proof: &mut Vec<u8>,
    ) {
        if let [target] = targets {
            if leaves.iter().all(|(key, _)| key == target) {
                proof.push(OP_LEAF);
                return;
            }
        }
        // height > 0 here: distinct keys always split before the last bit
        let bit = (height - 1) as u8;
        let target_split = targets.partition_point(|key| !key.get_bit(bit));
        let leaf_split = leaves.partition_point(|(key, _)| !key.get_bit(bit));
        let (left_targets, right_targets) = targets.split_at(target_split);
        let (left_leaves, right_leaves) = leaves.split_at(leaf_split);

        match (left_targets.is_empty(), right_targets.is_empty()) {
            (false, false) => {
                self.compile(bit as u16, left_targets, left_leaves, proof);
                self.compile(bit as u16, right_targets, right_leaves, proof);
                proof.push(OP_MERGE);
                proof.push(bit);
            }
            (false, true) => {
                self.compile(bit as u16, left_targets, left_leaves, proof);
                push_parent(proof, bit, &subtree_hash(bit as u16, right_leaves));
            }
            (true, false) => {
                self.compile(bit as u16, right_targets, right_leaves, proof);
                push_parent(proof, bit, &subtree_hash(bit as u16, left_leaves));
            }
            (true, true) => {}
        }
    }
}

fn push_parent(proof: &mut Vec<u8>, height: u8, sibling: &H256) {
    if sibling.is_zero() {
        return;
    }
    proof.push(OP_PARENT);
    proof.push(height);
    proof.extend_from_slice(sibling.as_slice());
}

/// Hash of the subtree spanning bits `0..height` of the sorted `leaves`.
fn subtree_hash(height: u16, leaves: &[(H256, H256)]) -> H256 {
    match leaves {
        [] => H256::zero(),
        [(key, value)] => lift(key, &hash_leaf(key, value), 0, height),
        _ => {
            let bit = (height - 1) as u8;
            let split = leaves.partition_point(|(key, _)| !key.get_bit(bit));
            let (left, right) = leaves.split_at(split);
            merge(bit, &subtree_hash(bit as u16, left), &subtree_hash(bit as u16, right))
        }
    }
}

impl State for SMT {
    fn get_raw(&self, key: &H256) -> Result<H256, CoreError> {
        Ok(self.leaves.get(key).copied().unwrap_or_else(H256::zero))
    }

    fn update_raw(&mut self, key: H256, value: H256) -> Result<(), CoreError> {
        if value.is_zero() {
            self.leaves.remove(&key);
        } else {
            self.leaves.insert(key, value);
        }
        Ok(())
    }

    fn get_account_count(&self) -> Result<u32, CoreError> {
        Ok(self.account_count)
    }

    fn set_account_count(&mut self, count: u32) -> Result<(), CoreError> {
        self.account_count = count;
        Ok(())
    }

    fn calculate_root(&self) -> Result<H256, CoreError> {
        Ok(self.root())
    }

    fn merkle_proof(&self, keys: &[H256]) -> Result<Vec<u8>, CoreError> {
        if keys.is_empty() {
            return Err(CoreError::InvalidData("no keys to prove".to_string()));
        }
        if !keys.windows(2).all(|w| w[0] < w[1]) {
            return Err(CoreError::InvalidData(
                "proof keys must be sorted and unique".to_string(),
            ));
        }
        let leaves: Vec<(H256, H256)> = self.leaves.iter().map(|(k, v)| (*k, *v)).collect();
        let mut proof = Vec::new();
        self.compile(256, keys, &leaves, &mut proof);
        debug!(
            keys = keys.len(),
            proof_size = proof.len(),
            first = %short_hex(&keys[0]),
            "compiled merkle proof"
        );
        Ok(proof)
    }

    fn get_script(&self, script_hash: &H256) -> Result<Option<Script>, CoreError> {
        Ok(self.scripts.get(script_hash).cloned())
    }

    fn insert_script(&mut self, script: Script) -> Result<H256, CoreError> {
        let hash = script.hash();
        self.scripts.insert(hash, script);
        Ok(hash)
    }

    fn get_data(&self, data_hash: &H256) -> Result<Option<Vec<u8>>, CoreError> {
        Ok(self.data.get(data_hash).cloned())
    }

    fn insert_data(&mut self, data_hash: H256, data: Vec<u8>) -> Result<(), CoreError> {
        self.data.insert(data_hash, data);
        Ok(())
    }
}

impl fmt::Debug for SMT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SMT")
            .field("root", &hex::encode(self.root().as_slice()))
            .field("leaves", &self.leaves.len())
            .field("account_count", &self.account_count)
            .finish()
    }
}
