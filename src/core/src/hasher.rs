//! Keyed SHA-256 hashing shared by the state tree, checkpoints and block data.

use sha2::{Digest, Sha256};
use sparse_merkle_tree::{traits::Hasher, H256};

/// Domain prefix fed to every hasher before any payload.
pub const HASH_PERSONALIZATION: &[u8; 16] = b"rollup-state-h32";

/// SHA-256 hasher for the Sparse Merkle Tree.
#[derive(Clone)]
pub struct Sha256Hasher(Sha256);

impl Default for Sha256Hasher {
    fn default() -> Self {
        Self(Sha256::new_with_prefix(HASH_PERSONALIZATION))
    }
}

impl Hasher for Sha256Hasher {
    fn write_h256(&mut self, h: &H256) {
        self.0.update(h.as_slice());
    }

    fn write_byte(&mut self, b: u8) {
        self.0.update([b]);
    }

    fn finish(self) -> H256 {
        let result = self.0.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash.into()
    }
}

impl Sha256Hasher {
    /// Creates a hasher already seeded with the domain prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds arbitrary bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }
}

/// Keyed hash of a byte string.
pub fn hash_bytes(data: &[u8]) -> H256 {
    let mut hasher = Sha256Hasher::new();
    hasher.update(data);
    hasher.finish()
}

/// Hash of a tree leaf. A zero value is an empty leaf and hashes to zero.
pub fn hash_leaf(key: &H256, value: &H256) -> H256 {
    if value.is_zero() {
        return H256::zero();
    }
    let mut hasher = Sha256Hasher::new();
    hasher.write_h256(key);
    hasher.write_h256(value);
    hasher.finish()
}

/// Combines two child hashes at `height`. Only two empty sides combine to an
/// empty node; any other pair is hashed with its height, so a subtree's hash
/// fixes the side it sits on.
pub fn merge(height: u8, lhs: &H256, rhs: &H256) -> H256 {
    if lhs.is_zero() && rhs.is_zero() {
        return H256::zero();
    }
    let mut hasher = Sha256Hasher::new();
    hasher.write_byte(height);
    hasher.write_h256(lhs);
    hasher.write_h256(rhs);
    hasher.finish()
}

/// Raises the hash of the node on `path` from level `from` to level `to`,
/// merging with an empty sibling at every height in between.
///
/// Level `n` covers bits `0..n` of the path: leaves are at level 0 and the
/// root at level 256.
pub fn lift(path: &H256, hash: &H256, from: u16, to: u16) -> H256 {
    let zero = H256::zero();
    let mut hash = *hash;
    if hash.is_zero() {
        return hash;
    }
    for level in from..to.min(256) {
        let height = level as u8;
        hash = if path.get_bit(height) {
            merge(height, &zero, &hash)
        } else {
            merge(height, &hash, &zero)
        };
    }
    hash
}
