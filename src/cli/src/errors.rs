//! Error types for the rollup CLI.

use rollup_core::CoreError;
use std::error::Error as StdError;
use std::fmt;

/// Errors that can occur in the rollup CLI.
#[derive(Debug)]
pub enum CliError {
    /// Error when a file operation fails.
    FileError(std::io::Error),

    /// Error when JSON serialization or deserialization fails.
    JsonError(serde_json::Error),

    /// Error when a hex string cannot be decoded.
    HexError(hex::FromHexError),

    /// Error raised by the rollup core.
    Core(CoreError),

    /// Error when a command line argument is invalid.
    InvalidArgument(String),
}

impl CliError {
    /// Process exit code. Core errors keep their own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::FileError(_) => 2,
            CliError::JsonError(_) => 3,
            CliError::HexError(_) => 4,
            CliError::InvalidArgument(_) => 5,
            CliError::Core(e) => e.exit_code(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::FileError(e) => write!(f, "File error: {}", e),
            CliError::JsonError(e) => write!(f, "JSON error: {}", e),
            CliError::HexError(e) => write!(f, "Hex error: {}", e),
            CliError::Core(e) => write!(f, "{}", e),
            CliError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
        }
    }
}

impl StdError for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        CliError::FileError(error)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        CliError::JsonError(error)
    }
}

impl From<hex::FromHexError> for CliError {
    fn from(error: hex::FromHexError) -> Self {
        CliError::HexError(error)
    }
}

impl From<CoreError> for CliError {
    fn from(error: CoreError) -> Self {
        CliError::Core(error)
    }
}

/// Parses a 32-byte hex value, with or without `0x`.
pub fn parse_h256(text: &str) -> Result<rollup_core::H256, CliError> {
    let raw = hex::decode(text.trim().trim_start_matches("0x"))?;
    if raw.len() != 32 {
        return Err(CliError::InvalidArgument(format!(
            "expected 32 bytes, got {}",
            raw.len()
        )));
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&raw);
    Ok(bytes.into())
}
