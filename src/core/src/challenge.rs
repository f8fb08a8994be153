//! Challenge verification.
//!
//! A challenge disputes one transaction of a block. Verification replays that
//! transaction from the witness and passes only if the replay starts from the
//! block's pre-checkpoint and lands exactly on its post-checkpoint:
//!
//! ```text
//! AwaitingChallenge -> Loaded -> PreVerified -> Executed -> PostVerified
//!                         \___________\______________\________> Rejected
//! ```
//!
//! Every step runs at most once and any failure is terminal.

use crate::cbmt;
use crate::checkpoint;
use crate::context::{execute_transaction, ExecutionContext, ExecutionEnv, ValidatorContext, MAX_DATA_SIZE, MAX_SCRIPT_SIZE};
use crate::contracts::ContractRegistry;
use crate::errors::CoreError;
use crate::overlay::StateOverlay;
use crate::proofs;
use crate::types::{block_smt_key, short_hex};
use crate::witness::{ChallengeInput, VerifyTransactionWitness};
use serde::{Deserialize, Serialize};
use sparse_merkle_tree::H256;
use std::fmt;
use tracing::{debug, info, warn};

/// Bounds enforced on a challenge witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeLimits {
    /// Maximum number of kv pairs
    pub max_kv_pairs: usize,
    /// Maximum size of each compact proof in bytes
    pub max_proof_size: usize,
    /// How far back block hashes may reach
    pub block_hash_depth: u64,
    /// Maximum number of scripts
    pub max_scripts: usize,
    /// Maximum number of data blobs
    pub max_load_data: usize,
}

impl Default for ChallengeLimits {
    fn default() -> Self {
        Self {
            max_kv_pairs: 1024,
            max_proof_size: 32 * 1024,
            block_hash_depth: 256,
            max_scripts: 100,
            max_load_data: 100,
        }
    }
}

/// Progress of a challenge verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeState {
    /// Nothing loaded yet
    AwaitingChallenge,
    /// Witness framing validated
    Loaded,
    /// Inclusion and pre-state proven
    PreVerified,
    /// Transaction replayed
    Executed,
    /// Post-state matches the block
    PostVerified,
    /// A step failed
    Rejected,
}

impl fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChallengeState::AwaitingChallenge => "awaiting-challenge",
            ChallengeState::Loaded => "loaded",
            ChallengeState::PreVerified => "pre-verified",
            ChallengeState::Executed => "executed",
            ChallengeState::PostVerified => "post-verified",
            ChallengeState::Rejected => "rejected",
        };
        write!(f, "{}", name)
    }
}

/// Result of a successful verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// There was nothing to verify
    NoChallenge,
    /// The disputed transaction replays to the committed post-state
    Verified {
        /// Checkpoint after the transaction
        post_checkpoint: H256,
        /// Hash of the replayed return data
        return_data_hash: H256,
    },
}

/// Witness data after framing checks, ready for proof verification.
struct LoadedChallenge {
    witness: VerifyTransactionWitness,
    block_merkle_root: H256,
    tx_index: u32,
    prev_checkpoint: H256,
    post_checkpoint: H256,
    kv_state: StateOverlay,
    block_hashes: StateOverlay,
}

/// State after replay, awaiting the post-state check.
struct ExecutedChallenge {
    ctx: ValidatorContext,
    kv_state_proof: Vec<u8>,
    return_data_hash: H256,
    post_checkpoint: H256,
}

/// Drives one challenge through its states.
pub struct ChallengeVerifier<'r> {
    registry: &'r ContractRegistry,
    limits: ChallengeLimits,
    state: ChallengeState,
}

impl<'r> ChallengeVerifier<'r> {
    /// Creates a verifier dispatching contracts through `registry`.
    pub fn new(registry: &'r ContractRegistry, limits: ChallengeLimits) -> Self {
        Self {
            registry,
            limits,
            state: ChallengeState::AwaitingChallenge,
        }
    }

    /// Current state.
    pub fn state(&self) -> ChallengeState {
        self.state
    }

    fn advance(&mut self, next: ChallengeState) {
        debug!(from = %self.state, to = %next, "challenge state");
        self.state = next;
    }

    /// Runs the verification. `None` means no challenge was raised.
    pub fn run(&mut self, input: Option<ChallengeInput>) -> Result<ChallengeOutcome, CoreError> {
        if self.state != ChallengeState::AwaitingChallenge {
            return Err(CoreError::FatalContext(format!(
                "challenge verifier already {}",
                self.state
            )));
        }
        let input = match input {
            Some(input) => input,
            None => {
                info!("no challenge input, nothing to verify");
                return Ok(ChallengeOutcome::NoChallenge);
            }
        };

        match self.verify(input) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(state = %self.state, code = err.exit_code(), "challenge rejected: {}", err);
                self.state = ChallengeState::Rejected;
                Err(err)
            }
        }
    }

    fn verify(&mut self, input: ChallengeInput) -> Result<ChallengeOutcome, CoreError> {
        let loaded = self.load(input)?;
        self.advance(ChallengeState::Loaded);

        let loaded = self.pre_verify(loaded)?;
        self.advance(ChallengeState::PreVerified);

        let executed = self.execute(loaded)?;
        self.advance(ChallengeState::Executed);

        let post_checkpoint = executed.post_checkpoint;
        let outcome = self.post_verify(executed)?;
        self.advance(ChallengeState::PostVerified);
        info!(post_checkpoint = %short_hex(&post_checkpoint), "challenge verified");
        Ok(outcome)
    }

    fn load(&self, input: ChallengeInput) -> Result<LoadedChallenge, CoreError> {
        let ChallengeInput { target, block_merkle_root, witness } = input;
        let limits = &self.limits;

        let block_hash = witness.raw_block.hash();
        if block_hash != target.block_hash {
            return Err(CoreError::BlockHashMismatch {
                expected: hex::encode(target.block_hash.as_slice()),
                actual: hex::encode(block_hash.as_slice()),
            });
        }

        if witness.kv_state.len() > limits.max_kv_pairs {
            return Err(CoreError::Capacity { what: "witness kv state", capacity: limits.max_kv_pairs });
        }
        if witness.kv_state_proof.len() > limits.max_proof_size {
            return Err(CoreError::Capacity { what: "kv state proof", capacity: limits.max_proof_size });
        }
        if witness.block_hashes_proof.len() > limits.max_proof_size {
            return Err(CoreError::Capacity { what: "block hashes proof", capacity: limits.max_proof_size });
        }

        let number = witness.raw_block.number;
        let oldest = number.saturating_sub(limits.block_hash_depth);
        for entry in &witness.block_hashes {
            if entry.number >= number || entry.number < oldest {
                return Err(CoreError::InvalidData(format!(
                    "block hash #{} outside [{}, {})",
                    entry.number, oldest, number
                )));
            }
        }
        if witness.block_hashes.is_empty() && !witness.block_hashes_proof.is_empty() {
            return Err(CoreError::InvalidData("block hashes proof without block hashes".to_string()));
        }

        if witness.scripts.len() > limits.max_scripts {
            return Err(CoreError::Capacity { what: "witness scripts", capacity: limits.max_scripts });
        }
        if let Some(script) = witness.scripts.iter().find(|s| s.as_bytes().len() > MAX_SCRIPT_SIZE) {
            return Err(CoreError::InvalidData(format!(
                "script {} exceeds {} bytes",
                short_hex(&script.hash()),
                MAX_SCRIPT_SIZE
            )));
        }
        if witness.load_data.len() > limits.max_load_data {
            return Err(CoreError::Capacity { what: "witness load data", capacity: limits.max_load_data });
        }
        if witness.load_data.iter().any(|entry| entry.data.len() > MAX_DATA_SIZE) {
            return Err(CoreError::InvalidData(format!("load data exceeds {} bytes", MAX_DATA_SIZE)));
        }

        let tx_index = target.tx_index;
        if tx_index >= witness.raw_block.submit_transactions.tx_count {
            return Err(CoreError::InvalidData(format!(
                "tx index {} out of {} transactions",
                tx_index, witness.raw_block.submit_transactions.tx_count
            )));
        }
        let (prev_checkpoint, post_checkpoint) = witness
            .raw_block
            .tx_checkpoints(tx_index)
            .ok_or_else(|| CoreError::InvalidData(format!("no checkpoints for tx {}", tx_index)))?;

        let mut kv_state = StateOverlay::new(limits.max_kv_pairs);
        for pair in &witness.kv_state {
            kv_state.insert(pair.key, pair.value)?;
        }
        let depth = usize::try_from(limits.block_hash_depth)
            .map_err(|_| CoreError::InvalidData("block hash depth too large".to_string()))?;
        let mut block_hashes = StateOverlay::new(depth);
        for entry in &witness.block_hashes {
            block_hashes.insert(block_smt_key(entry.number), entry.hash)?;
        }

        debug!(
            block = number,
            tx_index,
            kv_pairs = kv_state.len(),
            block_hashes = block_hashes.len(),
            "challenge witness loaded"
        );
        Ok(LoadedChallenge {
            witness,
            block_merkle_root,
            tx_index,
            prev_checkpoint,
            post_checkpoint,
            kv_state,
            block_hashes,
        })
    }

    fn pre_verify(&self, mut loaded: LoadedChallenge) -> Result<LoadedChallenge, CoreError> {
        let witness = &loaded.witness;
        let submit = &witness.raw_block.submit_transactions;
        let leaf = cbmt::tx_leaf(loaded.tx_index, &witness.l2tx.hash());
        cbmt::verify(&submit.tx_witness_root, submit.tx_count, loaded.tx_index, &leaf, &witness.tx_proof)?;

        if !loaded.block_hashes.is_empty() {
            loaded.block_hashes.normalize();
            proofs::verify(
                &loaded.block_merkle_root,
                &loaded.block_hashes.leaves(),
                &witness.block_hashes_proof,
            )?;
        }

        checkpoint::verify(
            &loaded.prev_checkpoint,
            &mut loaded.kv_state,
            &witness.kv_state_proof,
            witness.account_count,
        )?;
        Ok(loaded)
    }

    fn execute(&self, loaded: LoadedChallenge) -> Result<ExecutedChallenge, CoreError> {
        let LoadedChallenge { witness, post_checkpoint, kv_state, block_hashes, .. } = loaded;

        let env = ExecutionEnv::new(witness.raw_block.block_info(), witness.l2tx);
        let mut ctx = ValidatorContext::new(
            env,
            kv_state,
            block_hashes,
            witness.account_count,
            witness.scripts,
            witness.load_data.into_iter().map(|entry| entry.data).collect(),
        )
        .with_block_hash_depth(self.limits.block_hash_depth);
        execute_transaction(&mut ctx, self.registry)?;

        Ok(ExecutedChallenge {
            ctx,
            kv_state_proof: witness.kv_state_proof,
            return_data_hash: witness.return_data_hash,
            post_checkpoint,
        })
    }

    fn post_verify(&self, executed: ExecutedChallenge) -> Result<ChallengeOutcome, CoreError> {
        let ExecutedChallenge { mut ctx, kv_state_proof, return_data_hash: expected, post_checkpoint } =
            executed;

        let return_data_hash = ctx.env().return_data_hash();
        if return_data_hash != expected {
            return Err(CoreError::ReturnDataMismatch {
                expected: hex::encode(expected.as_slice()),
                actual: hex::encode(return_data_hash.as_slice()),
            });
        }

        let account_count = ctx.account_count();
        checkpoint::verify(&post_checkpoint, ctx.kv_state_mut(), &kv_state_proof, account_count)?;
        Ok(ChallengeOutcome::Verified { post_checkpoint, return_data_hash })
    }
}

/// Verifies a challenge with a fresh verifier.
pub fn verify_challenge(
    input: Option<ChallengeInput>,
    registry: &ContractRegistry,
    limits: ChallengeLimits,
) -> Result<ChallengeOutcome, CoreError> {
    ChallengeVerifier::new(registry, limits).run(input)
}
