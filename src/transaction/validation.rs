//! Stateless transaction validation, separated from the type definitions.
//! Stateful checks (balances, nonces, occupancy) happen inside block
//! execution against the working overlay.
use crate::error::{ChainError, Result};
use crate::transaction::types::{declared_value, Instruction, Transaction, MAX_TRANSACTION_SIZE};

impl Transaction {
    /// Validate everything checkable without state: size cap, instruction
    /// shape, sender/instruction compatibility, and value conservation.
    pub fn validate(&self) -> Result<()> {
        self.validate_size()?;

        if self.instructions.is_empty() {
            return Err(ChainError::InvalidTransaction(
                "transaction carries no instructions".to_string(),
            ));
        }

        for instruction in &self.instructions {
            match instruction {
                Instruction::Mint { amount, .. } => {
                    if !self.from.is_system() {
                        return Err(ChainError::InvalidTransaction(
                            "mint is reserved for the system sender".to_string(),
                        ));
                    }
                    if amount.is_zero() {
                        return Err(ChainError::InvalidTransaction(
                            "mint amount must be positive".to_string(),
                        ));
                    }
                }
                Instruction::Transfer { amount, .. } => {
                    if self.from.is_system() {
                        return Err(ChainError::InvalidTransaction(
                            "system sender may only mint".to_string(),
                        ));
                    }
                    if amount.is_zero() {
                        return Err(ChainError::InvalidTransaction(
                            "transfer amount must be positive".to_string(),
                        ));
                    }
                }
                Instruction::Create { code, address, .. } => {
                    if self.from.is_system() {
                        return Err(ChainError::InvalidTransaction(
                            "system sender may only mint".to_string(),
                        ));
                    }
                    if code.trim().is_empty() {
                        return Err(ChainError::InvalidTransaction(
                            "contract code is empty".to_string(),
                        ));
                    }
                    if address.is_system() {
                        return Err(ChainError::InvalidTransaction(
                            "cannot deploy to the system address".to_string(),
                        ));
                    }
                }
                Instruction::Execute { method, .. } => {
                    if self.from.is_system() {
                        return Err(ChainError::InvalidTransaction(
                            "system sender may only mint".to_string(),
                        ));
                    }
                    if method.is_empty() {
                        return Err(ChainError::InvalidTransaction(
                            "execute target method is empty".to_string(),
                        ));
                    }
                }
            }
        }

        let consumed = declared_value(&self.instructions)?;
        if consumed != self.value {
            return Err(ChainError::InvalidTransaction(format!(
                "declared value {} does not match consumed value {}",
                self.value, consumed
            )));
        }

        Ok(())
    }

    /// Validate serialized size to prevent DoS
    pub fn validate_size(&self) -> Result<()> {
        let serialized = bincode::serialize(self)
            .map_err(|e| ChainError::SerializationError(format!("serialization failed: {}", e)))?;
        if serialized.len() > MAX_TRANSACTION_SIZE {
            return Err(ChainError::InvalidTransaction(format!(
                "transaction too large: {} bytes (max: {})",
                serialized.len(),
                MAX_TRANSACTION_SIZE
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Address, Amount};

    #[test]
    fn test_valid_transfer_passes() {
        let tx = Transaction::new(
            Address::derive(b"alice"),
            0,
            vec![Instruction::Transfer {
                to: Address::derive(b"bob"),
                amount: Amount::from_u64(10),
            }],
        )
        .unwrap();
        tx.validate().unwrap();
    }

    #[test]
    fn test_mint_from_user_rejected() {
        let tx = Transaction::new(
            Address::derive(b"alice"),
            0,
            vec![Instruction::Mint {
                to: Address::derive(b"alice"),
                amount: Amount::from_u64(10),
            }],
        )
        .unwrap();
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_transfer_from_system_rejected() {
        let tx = Transaction::new(
            Address::system(),
            0,
            vec![Instruction::Transfer {
                to: Address::derive(b"bob"),
                amount: Amount::from_u64(10),
            }],
        )
        .unwrap();
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_declared_value_mismatch_rejected() {
        let mut tx = Transaction::new(
            Address::derive(b"alice"),
            0,
            vec![Instruction::Transfer {
                to: Address::derive(b"bob"),
                amount: Amount::from_u64(10),
            }],
        )
        .unwrap();
        tx.value = Amount::from_u64(9);
        tx.hash = tx.compute_hash().unwrap();
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_empty_instruction_list_rejected() {
        let tx = Transaction::new(Address::derive(b"alice"), 0, vec![]).unwrap();
        assert!(tx.validate().is_err());
    }
}
