//! Command line tools for rollup checkpoints, proofs and challenges.

pub mod commands;
pub mod config;
pub mod errors;

// Re-export commonly used types and functions
pub use commands::{challenge, checkpoint, demo_challenge, verify_proof};
pub use config::VerifierConfig;
pub use errors::CliError;
