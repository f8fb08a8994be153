//! Verify-proof command for the rollup CLI.

use crate::config::VerifierConfig;
use crate::errors::{parse_h256, CliError};
use rollup_core::{proofs, CoreError, KVPair, ProofError, StateOverlay, H256};
use std::path::Path;
use tracing::{debug, info};

/// Reads a JSON list of `{ "key": hex, "value": hex }` pairs.
pub fn read_leaves<P: AsRef<Path>>(path: P) -> Result<Vec<KVPair>, CliError> {
    let contents = std::fs::read_to_string(path)?;
    let pairs = serde_json::from_str(&contents)?;
    Ok(pairs)
}

/// Runs the verify-proof command.
///
/// The leaves are normalized before evaluation. When `expected_root` is given
/// the computed root must match it.
pub fn run<P: AsRef<Path>>(
    config: &VerifierConfig,
    leaves_path: P,
    proof: &str,
    expected_root: Option<&str>,
) -> Result<H256, CliError> {
    let pairs = read_leaves(&leaves_path)?;
    let mut overlay = StateOverlay::new(config.limits.max_kv_pairs);
    for pair in &pairs {
        overlay.insert(pair.key, pair.value)?;
    }
    overlay.normalize();
    debug!("Loaded {} leaves ({} unique)", pairs.len(), overlay.len());

    let proof = hex::decode(proof.trim().trim_start_matches("0x"))?;
    if proof.len() > config.limits.max_proof_size {
        return Err(CoreError::Capacity {
            what: "merkle proof",
            capacity: config.limits.max_proof_size,
        }
        .into());
    }

    let root = proofs::calculate_root(&overlay.leaves(), &proof).map_err(CoreError::from)?;
    if let Some(expected) = expected_root {
        if parse_h256(expected)? != root {
            return Err(CoreError::Proof(ProofError::RootMismatch).into());
        }
        info!("Proof verified against {}", expected);
    }
    Ok(root)
}
