//! Checkpoint command for the rollup CLI.

use crate::errors::{parse_h256, CliError};
use rollup_core::checkpoint::commit;
use rollup_core::H256;
use tracing::debug;

/// Runs the checkpoint command.
pub fn run(root: &str, count: u32) -> Result<H256, CliError> {
    let root = parse_h256(root)?;
    let checkpoint = commit(&root, count);
    debug!("Checkpoint of {} with {} accounts: {}", hex::encode(root.as_slice()), count, hex::encode(checkpoint.as_slice()));
    Ok(checkpoint)
}
