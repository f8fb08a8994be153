//! Error types for the core crate.

use thiserror::Error;

/// Errors raised while evaluating a compact merkle proof.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofError {
    /// A push was attempted while the stack was full.
    #[error("Proof stack overflow (capacity {capacity})")]
    StackOverflow {
        /// The stack capacity
        capacity: usize,
    },

    /// An instruction needed more entries than the stack held.
    #[error("Proof stack underflow at offset {offset}")]
    StackUnderflow {
        /// Offset of the instruction in the proof
        offset: usize,
    },

    /// The opcode is not part of the instruction set.
    #[error("Invalid opcode 0x{opcode:02x} at offset {offset}")]
    InvalidOpcode {
        /// The unknown opcode
        opcode: u8,
        /// Offset of the opcode in the proof
        offset: usize,
    },

    /// The proof ended in the middle of an instruction's operands.
    #[error("Truncated proof at offset {offset}")]
    Truncated {
        /// Offset of the instruction in the proof
        offset: usize,
    },

    /// The two entries of a MERGE are not siblings at the given height.
    #[error("Merged entries are not siblings at height {height}")]
    InvalidSibling {
        /// The merge height
        height: u8,
    },

    /// An instruction combines an entry below a level it has already reached.
    #[error("Entry combined at height {height} below its level")]
    InvalidHeight {
        /// The instruction height
        height: u8,
    },

    /// A LEAF instruction ran past the end of the leaf list.
    #[error("Proof consumes more leaves than provided ({provided})")]
    MissingLeaf {
        /// Number of leaves provided
        provided: usize,
    },

    /// The proof finished without consuming every leaf.
    #[error("Proof left leaves unconsumed")]
    UnusedLeaves,

    /// The proof finished with a stack size other than one.
    #[error("Proof finished with {len} stack entries")]
    InvalidStackLength {
        /// Number of entries left on the stack
        len: usize,
    },

    /// The computed root differs from the expected one.
    #[error("Computed root does not match the expected root")]
    RootMismatch,
}

/// Errors that can occur in the core crate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The execution context is missing or unusable.
    #[error("Invalid execution context: {0}")]
    FatalContext(String),

    /// Witness or block data is structurally invalid.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A compact merkle proof could not be evaluated.
    #[error("Proof error: {0}")]
    Proof(#[from] ProofError),

    /// A bounded buffer is exhausted.
    #[error("Capacity exceeded: {what} (capacity {capacity})")]
    Capacity {
        /// The exhausted buffer
        what: &'static str,
        /// Its capacity
        capacity: usize,
    },

    /// The recomputed checkpoint differs from the committed one.
    #[error("Checkpoint mismatch: expected {expected}, got {actual}")]
    CheckpointMismatch {
        /// The committed checkpoint (hex)
        expected: String,
        /// The recomputed checkpoint (hex)
        actual: String,
    },

    /// A key is not present in the state overlay.
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The account id has no script hash.
    #[error("Account {0} does not exist")]
    AccountNotExists(u32),

    /// An account with the same script hash already exists.
    #[error("Duplicated script hash: {0}")]
    DuplicatedScriptHash(String),

    /// The script of an existing account was not provided.
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    /// The contract output hash differs from the committed one.
    #[error("Return data hash mismatch: expected {expected}, got {actual}")]
    ReturnDataMismatch {
        /// The committed hash (hex)
        expected: String,
        /// The recomputed hash (hex)
        actual: String,
    },

    /// The transaction is not the committed member at the target index.
    #[error("Transaction inclusion proof failed: {0}")]
    TxProof(String),

    /// The block in the witness is not the challenged block.
    #[error("Block hash mismatch: expected {expected}, got {actual}")]
    BlockHashMismatch {
        /// The challenged block hash (hex)
        expected: String,
        /// The witness block hash (hex)
        actual: String,
    },

    /// The sender nonce is not the expected one, or went backwards.
    #[error("Invalid nonce: expected {expected}, got {actual}")]
    InvalidNonce {
        /// The expected nonce
        expected: u32,
        /// The observed nonce
        actual: u32,
    },

    /// Error raised by contract logic.
    #[error("Contract error: {0}")]
    Contract(String),

    /// Error when serialization or deserialization fails.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CoreError {
    /// Process exit code reported for this error. Never zero.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::FatalContext(_) => 50,
            CoreError::InvalidData(_) => 51,
            CoreError::SerializationError(_) => 52,
            CoreError::Proof(_) => 60,
            CoreError::TxProof(_) => 61,
            CoreError::BlockHashMismatch { .. } => 62,
            CoreError::Capacity { .. } => 70,
            CoreError::CheckpointMismatch { .. } => 80,
            CoreError::ReturnDataMismatch { .. } => 81,
            CoreError::InvalidNonce { .. } => 82,
            CoreError::NotFound(_) => 83,
            CoreError::AccountNotExists(_) => 84,
            CoreError::DuplicatedScriptHash(_) => 85,
            CoreError::ScriptNotFound(_) => 86,
            CoreError::Contract(_) => 90,
        }
    }
}

impl From<bincode::Error> for CoreError {
    fn from(error: bincode::Error) -> Self {
        CoreError::SerializationError(error.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(error: serde_json::Error) -> Self {
        CoreError::SerializationError(error.to_string())
    }
}
