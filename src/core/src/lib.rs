//! Core primitives for the rollup state layer.
//!
//! This crate provides the authenticated state of an optimistic rollup: compact
//! merkle proofs over a sparse merkle tree, the fixed-capacity state overlay,
//! checkpoints binding a root to an account count, the execution contexts
//! contract logic runs in, and the challenge protocol replaying one disputed
//! transaction.

pub mod cbmt;
pub mod challenge;
pub mod checkpoint;
pub mod context;
pub mod contracts;
pub mod errors;
pub mod generator;
pub mod hasher;
pub mod overlay;
pub mod proofs;
pub mod smt;
pub mod types;
pub mod witness;

// Re-export commonly used types
pub use challenge::{verify_challenge, ChallengeLimits, ChallengeOutcome, ChallengeState, ChallengeVerifier};
pub use context::{ExecutionContext, ExecutionEnv, GeneratorContext, ValidatorContext};
pub use contracts::{Contract, ContractRegistry};
pub use errors::{CoreError, ProofError};
pub use generator::Generator;
pub use overlay::StateOverlay;
pub use smt::{State, SMT};
pub use types::{AccountId, AccountMerkleState, KVPair, L2Transaction, RawBlock, Script, H256};
pub use witness::{build_challenge_input, ChallengeInput, WitnessEncoding};
