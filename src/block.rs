//! Block container
//!
//! A block is an ordered set of transactions plus their receipts and chain
//! metadata. Its content hash is computed exactly once, after receipts are
//! attached, and the block is immutable from then on: committed blocks are
//! never revised and reorgs are not modeled.

use crate::crypto::{content_hash, Address, Amount, Hash};
use crate::error::{ChainError, Result};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// Execution outcome for the transaction at the same position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub success: bool,
    pub fees: Amount,
    pub block_height: u64,
    pub created_contract: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// 0 for genesis, then strictly increasing by 1.
    pub height: u64,
    /// Hash of the block at `height - 1`, or `0x` for genesis.
    pub parent_hash: Hash,
    pub miner: Address,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub nonce: u64,
    pub transactions: Vec<Transaction>,
    /// Positionally aligned with `transactions`.
    pub receipts: Vec<Receipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<Hash>,
}

impl Block {
    pub fn new(
        height: u64,
        parent_hash: Hash,
        miner: Address,
        timestamp: u64,
        nonce: u64,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            height,
            parent_hash,
            miner,
            timestamp,
            nonce,
            transactions,
            receipts: Vec::new(),
            hash: None,
        }
    }

    /// Content hash over the canonical form with the `hash` field
    /// stripped; covers the child transactions and receipts.
    pub fn compute_hash(&self) -> Result<Hash> {
        let mut stripped = self.clone();
        stripped.hash = None;
        content_hash(&stripped)
    }

    /// Compute and fix the hash. Sealing twice is an error: the hash is
    /// immutable once set.
    pub fn seal(&mut self) -> Result<Hash> {
        if self.hash.is_some() {
            return Err(ChainError::InvalidBlock(format!(
                "block {} is already sealed",
                self.height
            )));
        }
        let hash = self.compute_hash()?;
        self.hash = Some(hash.clone());
        Ok(hash)
    }

    pub fn hash(&self) -> Result<&Hash> {
        self.hash
            .as_ref()
            .ok_or_else(|| ChainError::InvalidBlock(format!("block {} is not sealed", self.height)))
    }

    /// Recompute the content hash and compare with the sealed one.
    pub fn verify_hash(&self) -> Result<()> {
        let recorded = self.hash()?;
        let recomputed = self.compute_hash()?;
        if recomputed != *recorded {
            return Err(ChainError::IntegrityFailure(format!(
                "block {} hash mismatch: recorded {}, recomputed {}",
                self.height, recorded, recomputed
            )));
        }
        Ok(())
    }
}
