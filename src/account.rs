//! Per-address ledger entries
//!
//! An account is created lazily with a zero balance on first reference, or
//! by a `create` instruction that installs the contract triple
//! (code + interface + storage). The triple is all-or-nothing: a partially
//! deployed contract never exists.

use crate::crypto::{content_hash, Address, Amount, Hash, EMPTY_HASH};
use crate::error::{ChainError, Result};
use crate::vm::abi::InterfaceDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<InterfaceDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<BTreeMap<String, serde_json::Value>>,
    pub tx_count: u64,
    /// Content hash as of the last persist; `0x` until first committed.
    pub hash: Hash,
}

impl Account {
    pub fn new(address: Address) -> Self {
        Account {
            address,
            balance: Amount::zero(),
            interface: None,
            code: None,
            storage: None,
            tx_count: 0,
            hash: EMPTY_HASH.to_string(),
        }
    }

    pub fn is_contract(&self) -> bool {
        self.code.is_some()
    }

    /// True when the address has never been used: no funds, no nonce
    /// history, no contract. A `create` instruction requires this.
    pub fn is_untouched(&self) -> bool {
        self.balance.is_zero() && self.tx_count == 0 && !self.is_contract() && self.interface.is_none()
    }

    /// Credit the account. Amount must be strictly positive.
    pub fn mint(&mut self, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Err(ChainError::InvalidTransaction(
                "mint amount must be positive".to_string(),
            ));
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| ChainError::Execution("balance overflow".to_string()))?;
        Ok(())
    }

    /// Debit the account. Amount must be strictly positive and covered.
    pub fn burn(&mut self, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            return Err(ChainError::InvalidTransaction(
                "burn amount must be positive".to_string(),
            ));
        }
        self.balance = self.balance.checked_sub(amount).ok_or_else(|| {
            ChainError::InsufficientBalance {
                needed: amount.to_string(),
                available: self.balance.to_string(),
            }
        })?;
        Ok(())
    }

    pub fn bump_tx_count(&mut self) {
        self.tx_count += 1;
    }

    /// Install the contract triple. Fails if any part is already present.
    pub fn deploy(
        &mut self,
        code: String,
        interface: InterfaceDescriptor,
        storage: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        if self.code.is_some() || self.interface.is_some() || self.storage.is_some() {
            return Err(ChainError::AddressOccupied(self.address.to_string()));
        }
        self.code = Some(code);
        self.interface = Some(interface);
        self.storage = Some(storage);
        Ok(())
    }

    /// Content hash over the canonical form with the `hash` field stripped.
    pub fn content_hash(&self) -> Result<Hash> {
        let mut stripped = self.clone();
        stripped.hash = EMPTY_HASH.to_string();
        content_hash(&stripped)
    }

    /// Freeze the content hash prior to persisting.
    pub fn seal(&mut self) -> Result<()> {
        self.hash = self.content_hash()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new(Address::derive(b"account-tests"))
    }

    #[test]
    fn test_new_account_is_untouched() {
        let acct = account();
        assert!(acct.is_untouched());
        assert!(!acct.is_contract());
        assert_eq!(acct.hash, EMPTY_HASH);
    }

    #[test]
    fn test_mint_and_burn() {
        let mut acct = account();
        acct.mint(Amount::from_u64(100)).unwrap();
        assert_eq!(acct.balance, Amount::from_u64(100));
        acct.burn(Amount::from_u64(40)).unwrap();
        assert_eq!(acct.balance, Amount::from_u64(60));
    }

    #[test]
    fn test_burn_rejects_overdraft() {
        let mut acct = account();
        acct.mint(Amount::from_u64(10)).unwrap();
        let err = acct.burn(Amount::from_u64(11)).unwrap_err();
        assert!(matches!(err, ChainError::InsufficientBalance { .. }));
        // Balance unchanged after the failed burn
        assert_eq!(acct.balance, Amount::from_u64(10));
    }

    #[test]
    fn test_zero_amounts_rejected() {
        let mut acct = account();
        assert!(acct.mint(Amount::zero()).is_err());
        assert!(acct.burn(Amount::zero()).is_err());
    }

    #[test]
    fn test_content_hash_ignores_stored_hash() {
        let mut acct = account();
        acct.mint(Amount::from_u64(5)).unwrap();
        let before = acct.content_hash().unwrap();
        acct.seal().unwrap();
        assert_eq!(acct.hash, before);
        // Hashing again after sealing yields the same digest
        assert_eq!(acct.content_hash().unwrap(), before);
    }

    #[test]
    fn test_deploy_is_first_write_wins() {
        let mut acct = account();
        acct.deploy(
            "state counter = 0;".to_string(),
            InterfaceDescriptor::default(),
            BTreeMap::new(),
        )
        .unwrap();
        assert!(acct.is_contract());
        let err = acct
            .deploy(
                "state other = 1;".to_string(),
                InterfaceDescriptor::default(),
                BTreeMap::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ChainError::AddressOccupied(_)));
    }
}
