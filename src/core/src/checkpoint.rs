//! Checkpoints bind a state root to the account count.

use crate::errors::CoreError;
use crate::hasher::Sha256Hasher;
use crate::overlay::StateOverlay;
use crate::proofs;
use byteorder::{ByteOrder, LittleEndian};
use sparse_merkle_tree::{traits::Hasher, H256};
use tracing::{debug, warn};

/// Commits to `(root, count)`.
pub fn commit(root: &H256, count: u32) -> H256 {
    let mut count_bytes = [0u8; 4];
    LittleEndian::write_u32(&mut count_bytes, count);
    let mut hasher = Sha256Hasher::new();
    hasher.write_h256(root);
    hasher.update(&count_bytes);
    hasher.finish()
}

/// Verifies that the overlay, proof and account count reproduce `checkpoint`.
///
/// The overlay is normalized first; proof errors are propagated as is.
pub fn verify(
    checkpoint: &H256,
    overlay: &mut StateOverlay,
    proof: &[u8],
    account_count: u32,
) -> Result<(), CoreError> {
    overlay.normalize();
    let root = proofs::calculate_root(&overlay.leaves(), proof)?;
    let actual = commit(&root, account_count);
    if &actual != checkpoint {
        warn!(
            expected = %hex::encode(checkpoint.as_slice()),
            actual = %hex::encode(actual.as_slice()),
            account_count,
            "checkpoint mismatch"
        );
        return Err(CoreError::CheckpointMismatch {
            expected: hex::encode(checkpoint.as_slice()),
            actual: hex::encode(actual.as_slice()),
        });
    }
    debug!(account_count, pairs = overlay.len(), "checkpoint verified");
    Ok(())
}
