//! Per-block working overlay
//!
//! The overlay is an arena of account snapshots keyed by address: every
//! account touched while building or validating the in-flight block lives
//! here, loaded lazily from the store and mutated in place. Nothing reaches
//! disk until the whole block commits; a failed transaction restores the
//! arena to its pre-transaction checkpoint, and a failed block discards the
//! arena outright. Supply movements (mints and fee burns) are tracked
//! alongside so the committed total supply reconciles.

use crate::account::Account;
use crate::crypto::{Address, Amount};
use crate::error::{ChainError, Result};
use crate::store::StateStore;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct Overlay {
    accounts: BTreeMap<Address, Account>,
    minted: Amount,
    burned: Amount,
}

/// A full snapshot of the overlay, cheap at per-block scale.
pub struct OverlayCheckpoint {
    accounts: BTreeMap<Address, Account>,
    minted: Amount,
    burned: Amount,
}

impl Overlay {
    pub fn new() -> Self {
        Overlay::default()
    }

    /// Borrow a touched account, pulling it into the arena on first
    /// reference (fresh zero-balance account if never persisted).
    pub fn account_mut(&mut self, store: &StateStore, address: &Address) -> Result<&mut Account> {
        if !self.accounts.contains_key(address) {
            let account = store.account_or_default(address)?;
            self.accounts.insert(address.clone(), account);
        }
        self.accounts
            .get_mut(address)
            .ok_or_else(|| ChainError::StorageError(format!("overlay lost account {}", address)))
    }

    /// Read-only view of an account through the overlay (never from disk
    /// directly once touched).
    pub fn account(&mut self, store: &StateStore, address: &Address) -> Result<&Account> {
        self.account_mut(store, address).map(|a| &*a)
    }

    pub fn record_mint(&mut self, amount: Amount) -> Result<()> {
        self.minted = self
            .minted
            .checked_add(amount)
            .ok_or_else(|| ChainError::Execution("supply overflow".to_string()))?;
        Ok(())
    }

    pub fn record_burn(&mut self, amount: Amount) -> Result<()> {
        self.burned = self
            .burned
            .checked_add(amount)
            .ok_or_else(|| ChainError::Execution("burn overflow".to_string()))?;
        Ok(())
    }

    pub fn minted(&self) -> Amount {
        self.minted
    }

    pub fn burned(&self) -> Amount {
        self.burned
    }

    pub fn checkpoint(&self) -> OverlayCheckpoint {
        OverlayCheckpoint {
            accounts: self.accounts.clone(),
            minted: self.minted,
            burned: self.burned,
        }
    }

    pub fn restore(&mut self, checkpoint: OverlayCheckpoint) {
        self.accounts = checkpoint.accounts;
        self.minted = checkpoint.minted;
        self.burned = checkpoint.burned;
    }

    /// Consume the overlay for the commit step.
    pub fn into_accounts(self) -> BTreeMap<Address, Account> {
        self.accounts
    }

    pub fn touched(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }
}
