//! Ledger orchestrator
//!
//! State machine over block heights: genesis (height 0, parent `0x`) →
//! height 1 → height N, strictly sequential. One canonical chain is kept on
//! disk; there is no reorg path. Genesis creation, local production and
//! external ingestion all funnel through one execution routine and one
//! commit routine.

use crate::block::{Block, Receipt};
use crate::crypto::{Address, Amount, Hash};
use crate::error::{ChainError, Result};
use crate::ledger::core::overlay::Overlay;
use crate::ledger::core::validation;
use crate::mempool::Mempool;
use crate::store::StateStore;
use crate::transaction::{Instruction, Transaction};
use crate::vm::engine::{BlockEnv, CallOutcome, ExecutionEngine};
use once_cell::sync::Lazy;
use tracing::{info, warn};

/// 50 whole coins, the genesis-era block reward.
static BASE_BLOCK_REWARD: Lazy<Amount> = Lazy::new(|| Amount::from_whole(50));

pub const HALVING_INTERVAL: u64 = 210_000;

/// Reward for the block at `height`, halving on a fixed schedule.
pub fn block_reward(height: u64) -> Amount {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 64 {
        return Amount::zero();
    }
    Amount(BASE_BLOCK_REWARD.0 >> halvings)
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub min_txs_per_block: usize,
    pub max_txs_per_block: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            min_txs_per_block: 1,
            max_txs_per_block: 100,
        }
    }
}

/// Composition of the state store, the mempool and the execution engine.
/// The orchestrator is the only component with authority to decide
/// abort-vs-continue on a failing transaction.
pub struct Ledger {
    store: StateStore,
    mempool: Mempool,
    engine: ExecutionEngine,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(
        store: StateStore,
        mempool: Mempool,
        engine: ExecutionEngine,
        config: LedgerConfig,
    ) -> Self {
        Ledger {
            store,
            mempool,
            engine,
            config,
        }
    }

    pub fn height(&self) -> u64 {
        self.store.block_count()
    }

    pub fn last_block_hash(&self) -> Hash {
        self.store.last_block_hash()
    }

    pub fn has_genesis(&self) -> bool {
        self.store.block_count() > 0
    }

    pub fn pending_transactions(&self) -> usize {
        self.mempool.len()
    }

    pub fn total_supply(&self) -> Amount {
        self.store.total_supply()
    }

    pub fn block(&self, height: u64) -> Result<Block> {
        self.store.load_block(height)
    }

    pub fn block_hash_at(&self, height: u64) -> Option<Hash> {
        self.store.block_hash_at(height).cloned()
    }

    pub fn account(&self, address: &Address) -> Result<crate::account::Account> {
        self.store.account_or_default(address)
    }

    pub fn transaction_height(&self, tx_hash: &str) -> Option<u64> {
        self.store.transaction_height(tx_hash)
    }

    /// Mempool submission on behalf of the (external) RPC layer.
    pub fn submit_transaction(
        &mut self,
        from: Address,
        instructions: Vec<Instruction>,
        nonce: Option<u64>,
    ) -> Result<Transaction> {
        let tx_count = self.store.account_or_default(&from)?.tx_count;
        self.mempool.submit(from, instructions, nonce, tx_count)
    }

    /// Admission for transactions relayed by peers.
    pub fn admit_transaction(&mut self, tx: Transaction) -> Result<()> {
        let tx_count = self.store.account_or_default(&tx.from)?.tx_count;
        self.mempool.admit(tx, tx_count)
    }

    /// Read-only contract call against committed state.
    pub fn call_contract(&self, target: &Address, method: &str, args: Vec<String>) -> CallOutcome {
        self.engine.call_readonly(&self.store, target, method, args)
    }

    /// Create the genesis block: height 0, parent `0x`, carrying only the
    /// synthetic reward mint.
    pub fn init_genesis(&mut self, miner: &Address, timestamp: u64) -> Result<Block> {
        if self.has_genesis() {
            return Err(ChainError::InvalidBlock(
                "genesis already exists".to_string(),
            ));
        }
        let (overlay, included, receipts) = self.execute_candidates(Vec::new())?;
        let block = self.finalize_block(overlay, included, receipts, miner, timestamp, 0)?;
        info!(hash = %block.hash()?, "created genesis block");
        Ok(block)
    }

    /// Produce a block from pending transactions. Returns `None` when
    /// fewer than the configured minimum are pending, or when too few
    /// survive execution.
    pub fn produce_block(
        &mut self,
        miner: &Address,
        timestamp: u64,
        nonce: u64,
    ) -> Result<Option<Block>> {
        if !self.has_genesis() {
            return Err(ChainError::InvalidBlock(
                "cannot produce before genesis".to_string(),
            ));
        }
        let candidates = self.mempool.select(self.config.max_txs_per_block);
        if candidates.len() < self.config.min_txs_per_block {
            return Ok(None);
        }
        let (overlay, included, receipts) = self.execute_candidates(candidates)?;
        if included.len() < self.config.min_txs_per_block {
            return Ok(None);
        }
        let block = self.finalize_block(overlay, included, receipts, miner, timestamp, nonce)?;
        info!(
            height = block.height,
            transactions = block.transactions.len(),
            "produced block"
        );
        Ok(Some(block))
    }

    /// First half of the execution routine: run every candidate against a
    /// fresh overlay. A failing transaction is rolled back to its
    /// pre-transaction checkpoint and dropped from the pool; during
    /// production, the orchestrator continues rather than aborts.
    #[allow(clippy::type_complexity)]
    fn execute_candidates(
        &mut self,
        candidates: Vec<Transaction>,
    ) -> Result<(Overlay, Vec<Transaction>, Vec<Receipt>)> {
        let height = self.store.block_count();
        let parent_hash = self.store.last_block_hash();
        let mut overlay = Overlay::new();
        let mut included = Vec::new();
        let mut receipts: Vec<Receipt> = Vec::new();
        let mut dropped = Vec::new();

        for tx in candidates {
            let checkpoint = overlay.checkpoint();
            let mut env = BlockEnv {
                store: &self.store,
                overlay: &mut overlay,
                height,
                parent_hash: parent_hash.clone(),
            };
            match self.engine.execute_transaction(&tx, &mut env) {
                Ok(receipt) => {
                    let mut tx = tx;
                    tx.created_contract = receipt.created_contract.clone();
                    included.push(tx);
                    receipts.push(receipt);
                }
                Err(failed) => {
                    overlay.restore(checkpoint);
                    warn!(
                        tx = %tx.hash,
                        fees = %failed.fees,
                        "dropping failed transaction: {}", failed.error
                    );
                    dropped.push(tx.hash.clone());
                }
            }
        }
        self.mempool.purge(&dropped);
        Ok((overlay, included, receipts))
    }

    /// Second half: append the synthetic mint crediting the miner with
    /// reward plus collected fees, seal, commit.
    fn finalize_block(
        &mut self,
        mut overlay: Overlay,
        mut included: Vec<Transaction>,
        mut receipts: Vec<Receipt>,
        miner: &Address,
        timestamp: u64,
        nonce: u64,
    ) -> Result<Block> {
        let height = self.store.block_count();
        let parent_hash = self.store.last_block_hash();

        // Synthetic mint: block reward plus collected fees, fee-exempt.
        // Appended only when constructing a fresh block, never when
        // validating one whose hash is already fixed.
        let collected = sum_fees(&receipts)?;
        let reward = block_reward(height);
        let mint_amount = reward
            .checked_add(collected)
            .ok_or_else(|| ChainError::InvalidBlock("reward overflow".to_string()))?;
        let mint = Transaction::new(
            Address::system(),
            height,
            vec![Instruction::Mint {
                to: miner.clone(),
                amount: mint_amount,
            }],
        )?;
        let mut env = BlockEnv {
            store: &self.store,
            overlay: &mut overlay,
            height,
            parent_hash: parent_hash.clone(),
        };
        let mint_receipt = self
            .engine
            .execute_transaction(&mint, &mut env)
            .map_err(|failed| failed.error)?;
        included.push(mint);
        receipts.push(mint_receipt);

        let mut block = Block::new(
            height,
            parent_hash,
            miner.clone(),
            timestamp,
            nonce,
            included,
        );
        block.receipts = receipts;
        block.seal()?;

        self.commit(&block, overlay)?;
        Ok(block)
    }

    /// Ingest an externally produced block. Any failure rejects the whole
    /// block; the recomputed receipts must match the carried ones
    /// byte-for-byte.
    pub fn ingest_block(&mut self, block: Block) -> Result<()> {
        block.verify_hash()?;
        validation::validate_structure(&block)?;
        validation::validate_continuity(
            &block,
            self.store.block_count(),
            &self.store.last_block_hash(),
        )?;

        let mut overlay = Overlay::new();
        let mut receipts: Vec<Receipt> = Vec::new();
        let user_txs = &block.transactions[..block.transactions.len() - 1];

        for tx in user_txs {
            let mut env = BlockEnv {
                store: &self.store,
                overlay: &mut overlay,
                height: block.height,
                parent_hash: block.parent_hash.clone(),
            };
            let receipt = self
                .engine
                .execute_transaction(tx, &mut env)
                .map_err(|failed| {
                    ChainError::InvalidBlock(format!(
                        "block {} transaction {} failed: {}",
                        block.height, tx.hash, failed.error
                    ))
                })?;
            receipts.push(receipt);
        }

        let collected = sum_fees(&receipts)?;
        validation::validate_reward(&block, block_reward(block.height), collected)?;

        let mint = block
            .transactions
            .last()
            .ok_or_else(|| ChainError::InvalidBlock("block has no transactions".to_string()))?;
        let mut env = BlockEnv {
            store: &self.store,
            overlay: &mut overlay,
            height: block.height,
            parent_hash: block.parent_hash.clone(),
        };
        let mint_receipt = self
            .engine
            .execute_transaction(mint, &mut env)
            .map_err(|failed| failed.error)?;
        receipts.push(mint_receipt);

        if receipts != block.receipts {
            return Err(ChainError::IntegrityFailure(format!(
                "block {} receipts do not match local re-execution",
                block.height
            )));
        }
        for (tx, receipt) in block.transactions.iter().zip(&receipts) {
            if tx.created_contract != receipt.created_contract {
                return Err(ChainError::InvalidBlock(format!(
                    "block {} transaction {} mislabels its created contract",
                    block.height, tx.hash
                )));
            }
        }

        self.commit(&block, overlay)?;
        info!(height = block.height, "ingested block");
        Ok(())
    }

    /// The commit routine: one logical unit persisting the block, every
    /// touched account, the indices with their running digests, and the
    /// metadata, then purging confirmed transactions from the mempool.
    fn commit(&mut self, block: &Block, overlay: Overlay) -> Result<()> {
        validation::validate_continuity(
            block,
            self.store.block_count(),
            &self.store.last_block_hash(),
        )?;

        let minted = overlay.minted();
        let burned = overlay.burned();
        self.store.persist_block(block)?;
        for (_, mut account) in overlay.into_accounts() {
            account.seal()?;
            self.store.persist_account(&account)?;
        }

        let supply = self
            .store
            .total_supply()
            .checked_add(minted)
            .and_then(|s| s.checked_sub(burned))
            .ok_or_else(|| {
                ChainError::IntegrityFailure("total supply reconciliation failed".to_string())
            })?;
        self.store.set_total_supply(supply);
        self.store.commit_indices()?;

        let confirmed: Vec<Hash> = block.transactions.iter().map(|tx| tx.hash.clone()).collect();
        self.mempool.purge(&confirmed);
        Ok(())
    }
}

fn sum_fees(receipts: &[Receipt]) -> Result<Amount> {
    let mut total = Amount::zero();
    for receipt in receipts {
        total = total
            .checked_add(receipt.fees)
            .ok_or_else(|| ChainError::InvalidBlock("fee overflow".to_string()))?;
    }
    Ok(total)
}
