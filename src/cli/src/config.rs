//! Configuration for the rollup verifier.

use anyhow::Result;
use rollup_core::{ChallengeLimits, WitnessEncoding};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Configuration for the rollup verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Encoding of challenge input files
    pub witness_encoding: WitnessEncoding,
    /// Log filter used when `RUST_LOG` is not set
    pub log_filter: String,
    /// Bounds enforced on challenge witnesses
    pub limits: ChallengeLimits,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            witness_encoding: WitnessEncoding::Json,
            log_filter: "info".to_string(),
            limits: ChallengeLimits::default(),
        }
    }
}

impl VerifierConfig {
    /// Loads configuration from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Saves configuration to a file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
