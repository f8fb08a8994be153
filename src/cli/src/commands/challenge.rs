//! Challenge command for the rollup CLI.

use crate::config::VerifierConfig;
use crate::errors::CliError;
use rollup_core::{verify_challenge, ChallengeInput, ChallengeOutcome, ContractRegistry, WitnessEncoding};
use std::path::Path;
use tracing::info;

/// Reads a challenge input file.
pub fn read_input<P: AsRef<Path>>(path: P, encoding: WitnessEncoding) -> Result<ChallengeInput, CliError> {
    let data = std::fs::read(path.as_ref())?;
    info!("Read {} bytes of {} challenge input from {}", data.len(), encoding, path.as_ref().display());
    Ok(ChallengeInput::decode(&data, encoding)?)
}

/// Runs the challenge command. Without an input file there is nothing to verify.
pub fn run(
    config: &VerifierConfig,
    input: Option<&Path>,
    encoding: Option<WitnessEncoding>,
) -> Result<ChallengeOutcome, CliError> {
    let encoding = encoding.unwrap_or(config.witness_encoding);
    let input = match input {
        Some(path) => Some(read_input(path, encoding)?),
        None => None,
    };

    let registry = ContractRegistry::builtin();
    let outcome = verify_challenge(input, &registry, config.limits.clone())?;
    Ok(outcome)
}
