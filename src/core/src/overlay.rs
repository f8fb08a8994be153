//! Fixed-capacity key/value overlay used by the validator.
//!
//! The overlay keeps pairs in insertion order. `insert` appends while there is
//! room and only overwrites once full; `normalize` sorts and collapses
//! duplicate keys keeping the earliest pair.

use crate::errors::CoreError;
use crate::types::short_hex;
use serde::{Deserialize, Serialize};
use sparse_merkle_tree::H256;
use tracing::debug;

/// Maximum number of pairs loaded from a witness.
pub const MAX_KV_PAIRS: usize = 1024;

/// A key/value pair with the order in which it entered the overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    /// The state key
    #[serde(with = "crate::types::serde_h256")]
    pub key: H256,
    /// The state value
    #[serde(with = "crate::types::serde_h256")]
    pub value: H256,
    /// Position at which the pair was first inserted
    pub order: u32,
}

/// An ordered, bounded collection of key/value pairs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateOverlay {
    pairs: Vec<Pair>,
    capacity: usize,
    next_order: u32,
}

impl StateOverlay {
    /// Creates an empty overlay holding at most `capacity` pairs.
    pub fn new(capacity: usize) -> Self {
        Self {
            pairs: Vec::with_capacity(capacity),
            capacity,
            next_order: 0,
        }
    }

    /// Number of pairs held.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the overlay holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Maximum number of pairs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The pairs in their current order.
    pub fn pairs(&self) -> &[Pair] {
        &self.pairs
    }

    /// `(key, value)` leaves in the current order.
    pub fn leaves(&self) -> Vec<(H256, H256)> {
        self.pairs.iter().map(|pair| (pair.key, pair.value)).collect()
    }

    /// Appends a pair unconditionally, failing only when full.
    pub fn push_pair(&mut self, key: H256, value: H256) -> Result<(), CoreError> {
        if self.pairs.len() >= self.capacity {
            return Err(CoreError::Capacity { what: "state overlay", capacity: self.capacity });
        }
        self.pairs.push(Pair { key, value, order: self.next_order });
        self.next_order += 1;
        Ok(())
    }

    /// Inserts a pair.
    ///
    /// Appends while under capacity, even if the key is already present. Once
    /// full, the most recent pair with the same key is overwritten in place;
    /// if there is none the insert fails.
    pub fn insert(&mut self, key: H256, value: H256) -> Result<(), CoreError> {
        if self.pairs.len() < self.capacity {
            return self.push_pair(key, value);
        }
        match self.pairs.iter_mut().rev().find(|pair| pair.key == key) {
            Some(pair) => {
                pair.value = value;
                Ok(())
            }
            None => {
                debug!(key = %short_hex(&key), capacity = self.capacity, "overlay full");
                Err(CoreError::Capacity { what: "state overlay", capacity: self.capacity })
            }
        }
    }

    /// Overwrites the most recent pair with `key`, or inserts a new one.
    pub fn update(&mut self, key: H256, value: H256) -> Result<(), CoreError> {
        match self.pairs.iter_mut().rev().find(|pair| pair.key == key) {
            Some(pair) => {
                pair.value = value;
                Ok(())
            }
            None => self.insert(key, value),
        }
    }

    /// Returns the value of the most recent pair with `key`.
    pub fn fetch(&self, key: &H256) -> Result<H256, CoreError> {
        self.pairs
            .iter()
            .rev()
            .find(|pair| &pair.key == key)
            .map(|pair| pair.value)
            .ok_or_else(|| CoreError::NotFound(hex::encode(key.as_slice())))
    }

    /// Sorts pairs by key and keeps the earliest pair of each key.
    pub fn normalize(&mut self) {
        self.pairs.sort_by(|a, b| a.key.cmp(&b.key).then(a.order.cmp(&b.order)));
        self.pairs.dedup_by(|later, earlier| later.key == earlier.key);
    }

    /// Whether the pairs are sorted with unique keys.
    pub fn is_normalized(&self) -> bool {
        self.pairs.windows(2).all(|w| w[0].key < w[1].key)
    }
}

impl Default for StateOverlay {
    fn default() -> Self {
        Self::new(MAX_KV_PAIRS)
    }
}
