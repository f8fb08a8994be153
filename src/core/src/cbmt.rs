//! Complete binary merkle tree over the transactions of a block.
//!
//! `n` leaves are laid out at nodes `n-1..2n-1` of an array of `2n-1` nodes,
//! each internal node `i` being the hash of nodes `2i+1` and `2i+2`. The root
//! is node `0`; an empty tree has a zero root.

use crate::errors::CoreError;
use crate::hasher::Sha256Hasher;
use crate::types::{short_hex, L2Transaction};
use byteorder::{ByteOrder, LittleEndian};
use sparse_merkle_tree::{traits::Hasher, H256};

fn merge(lhs: &H256, rhs: &H256) -> H256 {
    let mut hasher = Sha256Hasher::new();
    hasher.write_h256(lhs);
    hasher.write_h256(rhs);
    hasher.finish()
}

fn is_left(index: usize) -> bool {
    index & 1 == 1
}

fn parent(index: usize) -> usize {
    (index - 1) / 2
}

fn sibling(index: usize) -> usize {
    if is_left(index) {
        index + 1
    } else {
        index - 1
    }
}

/// Leaf committing to the transaction at `tx_index`.
pub fn tx_leaf(tx_index: u32, tx_hash: &H256) -> H256 {
    let mut index_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut index_bytes, tx_index);
    let mut hasher = Sha256Hasher::new();
    hasher.update(&index_bytes);
    hasher.write_h256(tx_hash);
    hasher.finish()
}

/// Leaves for an ordered list of transactions.
pub fn tx_leaves(txs: &[L2Transaction]) -> Vec<H256> {
    txs.iter()
        .enumerate()
        .map(|(index, tx)| tx_leaf(index as u32, &tx.hash()))
        .collect()
}

fn build_nodes(leaves: &[H256]) -> Vec<H256> {
    let n = leaves.len();
    let mut nodes = vec![H256::zero(); 2 * n - 1];
    nodes[n - 1..].copy_from_slice(leaves);
    for i in (0..n - 1).rev() {
        nodes[i] = merge(&nodes[2 * i + 1], &nodes[2 * i + 2]);
    }
    nodes
}

/// Root of the tree built from `leaves`.
pub fn root(leaves: &[H256]) -> H256 {
    if leaves.is_empty() {
        return H256::zero();
    }
    build_nodes(leaves)[0]
}

/// Sibling hashes from the leaf at `index` up to the root.
pub fn build_proof(leaves: &[H256], index: usize) -> Result<Vec<H256>, CoreError> {
    let n = leaves.len();
    if index >= n {
        return Err(CoreError::TxProof(format!("leaf {} out of {}", index, n)));
    }
    let nodes = build_nodes(leaves);
    let mut lemmas = Vec::new();
    let mut node = n - 1 + index;
    while node > 0 {
        lemmas.push(nodes[sibling(node)]);
        node = parent(node);
    }
    Ok(lemmas)
}

/// Verifies that `leaf` is member `index` of a tree of `count` leaves.
pub fn verify(
    root: &H256,
    count: u32,
    index: u32,
    leaf: &H256,
    lemmas: &[H256],
) -> Result<(), CoreError> {
    if index >= count {
        return Err(CoreError::TxProof(format!(
            "index {} out of {} transactions",
            index, count
        )));
    }
    let mut node = (count - 1) as usize + index as usize;
    let mut hash = *leaf;
    for lemma in lemmas {
        if node == 0 {
            return Err(CoreError::TxProof("too many lemmas".to_string()));
        }
        hash = if is_left(node) {
            merge(&hash, lemma)
        } else {
            merge(lemma, &hash)
        };
        node = parent(node);
    }
    if node != 0 {
        return Err(CoreError::TxProof("too few lemmas".to_string()));
    }
    if &hash != root {
        return Err(CoreError::TxProof(format!(
            "root {} does not match {}",
            short_hex(&hash),
            short_hex(root)
        )));
    }
    Ok(())
}
