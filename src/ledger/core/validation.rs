//! Structural block validation
//!
//! Shape checks that need no state: receipt alignment, duplicate detection,
//! coinbase placement, and hash-chain continuity against an expected
//! (height, parent) pair. Stateful validation happens during execution.

use crate::block::Block;
use crate::crypto::{Amount, Hash, EMPTY_HASH};
use crate::error::{ChainError, Result};
use crate::transaction::Instruction;
use std::collections::HashSet;

/// Validate the shape of a sealed block: positionally aligned receipts, no
/// duplicate transactions, and exactly one system mint transaction in the
/// final position crediting the block's miner.
pub fn validate_structure(block: &Block) -> Result<()> {
    block.hash()?;

    if block.transactions.is_empty() {
        return Err(ChainError::InvalidBlock(format!(
            "block {} carries no transactions",
            block.height
        )));
    }

    if block.receipts.len() != block.transactions.len() {
        return Err(ChainError::InvalidBlock(format!(
            "block {} has {} transactions but {} receipts",
            block.height,
            block.transactions.len(),
            block.receipts.len()
        )));
    }

    let mut seen = HashSet::new();
    for tx in &block.transactions {
        if !seen.insert(tx.hash.as_str()) {
            return Err(ChainError::InvalidBlock(format!(
                "block {} contains duplicate transaction {}",
                block.height, tx.hash
            )));
        }
    }

    let system_positions: Vec<usize> = block
        .transactions
        .iter()
        .enumerate()
        .filter(|(_, tx)| tx.is_system())
        .map(|(i, _)| i)
        .collect();
    if system_positions.len() != 1 || system_positions[0] != block.transactions.len() - 1 {
        return Err(ChainError::InvalidBlock(format!(
            "block {} must end with exactly one system mint transaction",
            block.height
        )));
    }

    if (block.height == 0) != (block.parent_hash == EMPTY_HASH) {
        return Err(ChainError::InvalidBlock(format!(
            "block {} parent hash {} disagrees with its height",
            block.height, block.parent_hash
        )));
    }

    Ok(())
}

/// Validate height/parent-hash continuity against the chain tip.
pub fn validate_continuity(block: &Block, next_height: u64, last_hash: &Hash) -> Result<()> {
    if block.height != next_height {
        return Err(ChainError::InvalidBlock(format!(
            "expected block height {}, got {}",
            next_height, block.height
        )));
    }
    if block.parent_hash != *last_hash {
        return Err(ChainError::InvalidBlock(format!(
            "expected parent hash {}, got {}",
            last_hash, block.parent_hash
        )));
    }
    Ok(())
}

/// Validate that the block's final mint credits the miner with exactly the
/// block reward plus the fees collected from the preceding transactions.
pub fn validate_reward(block: &Block, reward: Amount, collected_fees: Amount) -> Result<()> {
    let mint = block
        .transactions
        .last()
        .ok_or_else(|| ChainError::InvalidBlock("block has no transactions".to_string()))?;
    let expected = reward
        .checked_add(collected_fees)
        .ok_or_else(|| ChainError::InvalidBlock("reward overflow".to_string()))?;
    match mint.instructions.as_slice() {
        [Instruction::Mint { to, amount }] if *to == block.miner && *amount == expected => Ok(()),
        _ => Err(ChainError::InvalidBlock(format!(
            "block {} mint does not credit the miner with reward {} plus fees {}",
            block.height, reward, collected_fees
        ))),
    }
}
