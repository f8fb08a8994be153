//! Off-chain block production.
//!
//! The generator executes transactions against the live state, records for
//! each one what a validator needs to replay it, and seals blocks carrying a
//! checkpoint after every transaction.

use crate::cbmt;
use crate::context::{execute_transaction, ExecutionContext, ExecutionEnv, GeneratorContext, TouchedState};
use crate::contracts::ContractRegistry;
use crate::errors::CoreError;
use crate::smt::{State, SMT};
use crate::types::{
    block_smt_key, build_account_field_key, h256_to_u32, short_hex, AccountId, BlockInfo,
    L2Transaction, LogItem, RawBlock, Script, SubmitTransactions, GW_ACCOUNT_NONCE_TYPE,
};
use sparse_merkle_tree::H256;
use tracing::{debug, info, warn};

/// Outcome of an included transaction.
#[derive(Clone, Debug)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: H256,
    /// Data returned by the contract
    pub return_data: Vec<u8>,
    /// Logs emitted by the contract
    pub logs: Vec<LogItem>,
    /// Checkpoint after the transaction
    pub post_checkpoint: H256,
}

/// What a validator needs to replay an included transaction.
#[derive(Clone, Debug)]
pub struct ReplayRecord {
    /// Pre-state of every touched key
    pub touched: TouchedState,
    /// Proof of the touched keys, valid before and after the transaction
    pub kv_state_proof: Vec<u8>,
    /// Hash of the return data
    pub return_data_hash: H256,
}

/// A sealed block and everything produced along with it.
#[derive(Clone, Debug)]
pub struct ProducedBlock {
    /// The block header
    pub raw: RawBlock,
    /// Included transactions, in order
    pub transactions: Vec<L2Transaction>,
    /// Receipts of the included transactions
    pub receipts: Vec<TxReceipt>,
    /// Replay records of the included transactions
    pub replays: Vec<ReplayRecord>,
    /// Transactions that failed and were left out
    pub rejected: Vec<(L2Transaction, CoreError)>,
}

impl ProducedBlock {
    /// Block hash.
    pub fn hash(&self) -> H256 {
        self.raw.hash()
    }
}

/// Produces blocks over an in-memory state.
pub struct Generator {
    state: SMT,
    block_tree: SMT,
    registry: ContractRegistry,
    blocks: Vec<ProducedBlock>,
}

impl Generator {
    /// Creates a chain whose genesis block holds accounts for `scripts`, in order.
    pub fn genesis(registry: ContractRegistry, scripts: Vec<Script>) -> Result<Self, CoreError> {
        let mut generator = Self {
            state: SMT::new(),
            block_tree: SMT::new(),
            registry,
            blocks: Vec::new(),
        };

        let env = ExecutionEnv::default();
        let mut ctx = GeneratorContext::new(&mut generator.state, &generator.block_tree, env)?;
        for script in scripts {
            ctx.create_account(script)?;
        }
        ctx.finish()?;

        generator.produce_block(Vec::new(), 0)?;
        Ok(generator)
    }

    /// The account state.
    pub fn state(&self) -> &SMT {
        &self.state
    }

    /// The block merkle tree.
    pub fn block_tree(&self) -> &SMT {
        &self.block_tree
    }

    /// Root of the block merkle tree.
    pub fn block_merkle_root(&self) -> H256 {
        self.block_tree.root()
    }

    /// Contract backends.
    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// The latest block.
    pub fn tip(&self) -> Option<&ProducedBlock> {
        self.blocks.last()
    }

    /// Block by number.
    pub fn block(&self, number: u64) -> Option<&ProducedBlock> {
        self.blocks.get(usize::try_from(number).ok()?)
    }

    /// Block by hash.
    pub fn block_by_hash(&self, block_hash: &H256) -> Option<&ProducedBlock> {
        self.blocks.iter().find(|block| &block.hash() == block_hash)
    }

    /// Current nonce of an account.
    pub fn get_nonce(&self, account_id: AccountId) -> Result<u32, CoreError> {
        let value = self
            .state
            .get_raw(&build_account_field_key(account_id, GW_ACCOUNT_NONCE_TYPE))?;
        Ok(h256_to_u32(&value))
    }

    fn apply_transaction(
        &mut self,
        block_info: &BlockInfo,
        tx: &L2Transaction,
    ) -> Result<(TxReceipt, ReplayRecord), CoreError> {
        let env = ExecutionEnv::new(block_info.clone(), tx.clone());
        let mut ctx = GeneratorContext::new(&mut self.state, &self.block_tree, env)?;
        let snapshot = ctx.snapshot();

        let result = ctx.get_account_nonce(tx.from_id).and_then(|nonce| {
            if nonce != tx.nonce {
                return Err(CoreError::InvalidNonce { expected: nonce, actual: tx.nonce });
            }
            execute_transaction(&mut ctx, &self.registry)
        });
        if let Err(err) = result {
            ctx.revert(snapshot)?;
            return Err(err);
        }

        let (env, touched) = ctx.finish()?;
        let keys: Vec<H256> = touched.kv_state.iter().map(|pair| pair.key).collect();
        let kv_state_proof = self.state.merkle_proof(&keys)?;
        let post_checkpoint = self.state.calculate_checkpoint()?;
        let return_data_hash = env.return_data_hash();
        debug!(
            tx = %short_hex(&tx.hash()),
            touched = keys.len(),
            proof_size = kv_state_proof.len(),
            "transaction applied"
        );

        let receipt = TxReceipt {
            tx_hash: tx.hash(),
            return_data: env.return_data,
            logs: env.logs,
            post_checkpoint,
        };
        let replay = ReplayRecord { touched, kv_state_proof, return_data_hash };
        Ok((receipt, replay))
    }

    /// Executes `txs` in order and seals the next block, returning its hash.
    ///
    /// Failing transactions leave no trace in the state and are left out of
    /// the block.
    pub fn produce_block(&mut self, txs: Vec<L2Transaction>, timestamp: u64) -> Result<H256, CoreError> {
        let number = self.blocks.len() as u64;
        let parent_block_hash = self.tip().map(ProducedBlock::hash).unwrap_or_else(H256::zero);
        let prev_account = self.state.merkle_state()?;
        let block_info = BlockInfo { number, timestamp, block_producer_id: 0 };

        let mut transactions = Vec::new();
        let mut receipts = Vec::new();
        let mut replays = Vec::new();
        let mut rejected = Vec::new();
        for tx in txs {
            match self.apply_transaction(&block_info, &tx) {
                Ok((receipt, replay)) => {
                    transactions.push(tx);
                    receipts.push(receipt);
                    replays.push(replay);
                }
                Err(err) => {
                    warn!(block = number, tx = %short_hex(&tx.hash()), "transaction rejected: {}", err);
                    rejected.push((tx, err));
                }
            }
        }

        let raw = RawBlock {
            number,
            parent_block_hash,
            timestamp,
            block_producer_id: block_info.block_producer_id,
            prev_account,
            post_account: self.state.merkle_state()?,
            submit_transactions: SubmitTransactions {
                tx_witness_root: cbmt::root(&cbmt::tx_leaves(&transactions)),
                tx_count: transactions.len() as u32,
                prev_state_checkpoint: prev_account.checkpoint(),
            },
            state_checkpoint_list: receipts.iter().map(|r: &TxReceipt| r.post_checkpoint).collect(),
        };
        let block_hash = raw.hash();
        self.block_tree.update_raw(block_smt_key(number), block_hash)?;
        info!(
            number,
            txs = transactions.len(),
            rejected = rejected.len(),
            hash = %short_hex(&block_hash),
            "block produced"
        );

        self.blocks.push(ProducedBlock { raw, transactions, receipts, replays, rejected });
        Ok(block_hash)
    }
}
