//! Transaction types for SlateChain
use crate::crypto::{content_hash, Address, Amount, Hash, EMPTY_HASH};
use crate::error::{ChainError, Result};
use crate::vm::abi::InterfaceDescriptor;
use serde::{Deserialize, Serialize};

/// Maximum serialized transaction size in bytes (100KB) to prevent DoS
pub const MAX_TRANSACTION_SIZE: usize = 100_000;

/// One step of a transaction, applied in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instruction {
    /// Move `amount` from the sender to `to`.
    Transfer { to: Address, amount: Amount },
    /// Deploy contract source at an untouched address.
    Create {
        address: Address,
        code: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        interface: Option<InterfaceDescriptor>,
    },
    /// Dispatch a method or attribute read on a deployed contract.
    Execute {
        address: Address,
        method: String,
        args: Vec<String>,
    },
    /// Credit `to` out of thin air. Only the system sender may carry this.
    Mint { to: Address, amount: Amount },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub from: Address,
    pub nonce: u64,
    /// Declared value: must equal the sum consumed by the instructions.
    pub value: Amount,
    pub instructions: Vec<Instruction>,
    pub hash: Hash,
    /// Set after execution when an instruction deployed a contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_contract: Option<Address>,
}

impl Transaction {
    /// Build a transaction with its declared value derived from the
    /// instructions and its content hash computed.
    pub fn new(from: Address, nonce: u64, instructions: Vec<Instruction>) -> Result<Self> {
        let value = declared_value(&instructions)?;
        let mut tx = Transaction {
            from,
            nonce,
            value,
            instructions,
            hash: EMPTY_HASH.to_string(),
            created_contract: None,
        };
        tx.hash = tx.compute_hash()?;
        Ok(tx)
    }

    /// Content hash over the canonical form, excluding the `hash` field
    /// itself and the post-execution `created_contract` field.
    pub fn compute_hash(&self) -> Result<Hash> {
        let mut stripped = self.clone();
        stripped.hash = EMPTY_HASH.to_string();
        stripped.created_contract = None;
        content_hash(&stripped)
    }

    /// Recompute and compare the content hash. Called before every
    /// execution; a mismatch means a tampered or replayed payload.
    pub fn verify_hash(&self) -> Result<()> {
        let recomputed = self.compute_hash()?;
        if recomputed != self.hash {
            return Err(ChainError::IntegrityFailure(format!(
                "transaction hash mismatch: recorded {}, recomputed {}",
                self.hash, recomputed
            )));
        }
        Ok(())
    }

    /// True for the synthetic coinbase/mint pseudo-transaction.
    pub fn is_system(&self) -> bool {
        self.from.is_system()
    }
}

/// Sum of value consumed by the instructions: transfer and mint amounts.
pub fn declared_value(instructions: &[Instruction]) -> Result<Amount> {
    let mut total = Amount::zero();
    for instruction in instructions {
        let consumed = match instruction {
            Instruction::Transfer { amount, .. } => *amount,
            Instruction::Mint { amount, .. } => *amount,
            Instruction::Create { .. } | Instruction::Execute { .. } => Amount::zero(),
        };
        total = total
            .checked_add(consumed)
            .ok_or_else(|| ChainError::InvalidTransaction("value overflow".to_string()))?;
    }
    Ok(total)
}
