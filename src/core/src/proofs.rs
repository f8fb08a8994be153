//! Compact merkle proofs.
//!
//! A proof is a flat instruction stream evaluated against a stack of
//! `(path, hash)` entries:
//!
//! | opcode | operands                   | effect                                  |
//! |--------|----------------------------|-----------------------------------------|
//! | `0x4C` | -                          | push the next leaf                      |
//! | `0x50` | `height: u8, sibling: H256`| combine the top entry with a sibling    |
//! | `0x48` | `height: u8`               | combine the two top entries             |
//!
//! Leaves are consumed in list order, which must be ascending key order. A
//! proof is valid when it is fully consumed, every leaf was pushed exactly once
//! and a single entry remains: its hash, lifted to the top of the tree, is the
//! root.
//!
//! Every entry tracks the level it has reached. Heights skipped between two
//! instructions are filled with empty siblings, so a proof only carries the
//! non-empty ones. An instruction may never combine an entry below a level it
//! has already passed.

use crate::errors::ProofError;
use crate::hasher::{hash_leaf, lift, merge};
use sparse_merkle_tree::H256;
use tracing::debug;

/// Push the next leaf.
pub const OP_LEAF: u8 = 0x4C;
/// Combine the top entry with a sibling hash carried in the proof.
pub const OP_PARENT: u8 = 0x50;
/// Combine the two top entries.
pub const OP_MERGE: u8 = 0x48;

/// Maximum number of entries on the evaluation stack.
pub const STACK_CAPACITY: usize = 32;

/// Size in bytes of a PARENT instruction.
pub const PARENT_SIZE: usize = 1 + 1 + 32;
/// Size in bytes of a MERGE instruction.
pub const MERGE_SIZE: usize = 1 + 1;

/// Clears bits `0..=height` of a path. Height 255 clears everything.
fn parent_path(path: &H256, height: u8) -> H256 {
    if height == u8::MAX {
        H256::zero()
    } else {
        path.parent_path(height)
    }
}

#[derive(Clone, Copy)]
struct Entry {
    path: H256,
    hash: H256,
    level: u16,
}

impl Entry {
    /// Hash of this entry raised to `height`, with its level checked.
    fn lifted_to(&self, height: u8) -> Result<H256, ProofError> {
        if self.level > u16::from(height) {
            return Err(ProofError::InvalidHeight { height });
        }
        Ok(lift(&self.path, &self.hash, self.level, u16::from(height)))
    }
}

/// Fixed-capacity evaluation stack.
struct ProofStack {
    entries: [Entry; STACK_CAPACITY],
    len: usize,
}

impl ProofStack {
    fn new() -> Self {
        let empty = Entry { path: H256::zero(), hash: H256::zero(), level: 0 };
        Self { entries: [empty; STACK_CAPACITY], len: 0 }
    }

    fn push(&mut self, entry: Entry) -> Result<(), ProofError> {
        if self.len >= STACK_CAPACITY {
            return Err(ProofError::StackOverflow { capacity: STACK_CAPACITY });
        }
        self.entries[self.len] = entry;
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self, offset: usize) -> Result<Entry, ProofError> {
        if self.len == 0 {
            return Err(ProofError::StackUnderflow { offset });
        }
        self.len -= 1;
        Ok(self.entries[self.len])
    }
}

/// Computes the root committed to by `leaves` and `proof`.
///
/// `leaves` must be sorted by key; a zero value denotes an absent key.
pub fn calculate_root(leaves: &[(H256, H256)], proof: &[u8]) -> Result<H256, ProofError> {
    let mut stack = ProofStack::new();
    let mut next_leaf = 0usize;
    let mut offset = 0usize;

    while offset < proof.len() {
        let opcode = proof[offset];
        match opcode {
            OP_LEAF => {
                let (key, value) = leaves
                    .get(next_leaf)
                    .ok_or(ProofError::MissingLeaf { provided: leaves.len() })?;
                stack.push(Entry { path: *key, hash: hash_leaf(key, value), level: 0 })?;
                next_leaf += 1;
                offset += 1;
            }
            OP_PARENT => {
                if offset + PARENT_SIZE > proof.len() {
                    return Err(ProofError::Truncated { offset });
                }
                let height = proof[offset + 1];
                let mut sibling = [0u8; 32];
                sibling.copy_from_slice(&proof[offset + 2..offset + PARENT_SIZE]);
                let sibling: H256 = sibling.into();

                let entry = stack.pop(offset)?;
                let own = entry.lifted_to(height)?;
                let hash = if entry.path.get_bit(height) {
                    merge(height, &sibling, &own)
                } else {
                    merge(height, &own, &sibling)
                };
                stack.push(Entry {
                    path: parent_path(&entry.path, height),
                    hash,
                    level: u16::from(height) + 1,
                })?;
                offset += PARENT_SIZE;
            }
            OP_MERGE => {
                if offset + MERGE_SIZE > proof.len() {
                    return Err(ProofError::Truncated { offset });
                }
                let height = proof[offset + 1];
                let b = stack.pop(offset)?;
                let a = stack.pop(offset)?;

                let a_parent = parent_path(&a.path, height);
                let b_parent = parent_path(&b.path, height);
                let a_bit = a.path.get_bit(height);
                if a_parent != b_parent || a_bit == b.path.get_bit(height) {
                    return Err(ProofError::InvalidSibling { height });
                }
                let a_hash = a.lifted_to(height)?;
                let b_hash = b.lifted_to(height)?;
                let hash = if a_bit {
                    merge(height, &b_hash, &a_hash)
                } else {
                    merge(height, &a_hash, &b_hash)
                };
                stack.push(Entry { path: a_parent, hash, level: u16::from(height) + 1 })?;
                offset += MERGE_SIZE;
            }
            _ => return Err(ProofError::InvalidOpcode { opcode, offset }),
        }
    }

    if next_leaf != leaves.len() {
        return Err(ProofError::UnusedLeaves);
    }
    if stack.len != 1 {
        return Err(ProofError::InvalidStackLength { len: stack.len });
    }
    let top = stack.entries[0];
    debug!(leaves = leaves.len(), proof_size = proof.len(), "calculated merkle root");
    Ok(lift(&top.path, &top.hash, top.level, 256))
}

/// Verifies that `leaves` and `proof` commit to `expected_root`.
pub fn verify(expected_root: &H256, leaves: &[(H256, H256)], proof: &[u8]) -> Result<(), ProofError> {
    let root = calculate_root(leaves, proof)?;
    if &root != expected_root {
        return Err(ProofError::RootMismatch);
    }
    Ok(())
}
