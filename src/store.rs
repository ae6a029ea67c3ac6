//! Persistent chain state store
//!
//! Layout per chain data directory:
//! - `metadata.json`: counters, the three running digests, last block
//!   hash, total supply
//! - `blocks.json`: ordered height-to-block-hash index
//! - `accounts.json`: address-to-account-hash index
//! - `transactions.json`: transaction-hash-to-block-height index
//! - `blocks/<height, zero-padded>.json`: one file per block
//! - `accounts/<address>.json`: one file per account
//!
//! Every load recomputes the entity's content hash against the index, the
//! tamper/corruption check. The three running digests are recomputed from
//! the indices at every commit and compared against the persisted metadata
//! at startup; a mismatch is a warning by default and fatal under
//! `strict_integrity`. Files are written to a `.tmp` sibling and renamed
//! into place, with metadata written last, so a torn write sequence
//! surfaces as a digest mismatch at the next startup.

use crate::account::Account;
use crate::block::Block;
use crate::cache::{AccountCache, BlockCache};
use crate::crypto::{canonical_json, digest_bytes, Address, Amount, Hash, EMPTY_HASH};
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub block_count: u64,
    pub account_count: u64,
    pub transaction_count: u64,
    pub blocks_digest: Hash,
    pub accounts_digest: Hash,
    pub transactions_digest: Hash,
    pub last_block_hash: Hash,
    pub total_supply: Amount,
}

impl ChainMetadata {
    /// Zeroed metadata whose digests match freshly created empty indices.
    fn empty() -> Result<Self> {
        Ok(ChainMetadata {
            block_count: 0,
            account_count: 0,
            transaction_count: 0,
            blocks_digest: index_digest(&Vec::<Hash>::new())?,
            accounts_digest: index_digest(&BTreeMap::<Address, Hash>::new())?,
            transactions_digest: index_digest(&BTreeMap::<Hash, u64>::new())?,
            last_block_hash: EMPTY_HASH.to_string(),
            total_supply: Amount::zero(),
        })
    }
}

/// SHA-256 over the canonical serialization of an index structure.
pub fn index_digest<T: Serialize>(index: &T) -> Result<Hash> {
    Ok(digest_bytes(canonical_json(index)?.as_bytes()))
}

#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    metadata: ChainMetadata,
    blocks_index: Vec<Hash>,
    accounts_index: BTreeMap<Address, Hash>,
    transactions_index: BTreeMap<Hash, u64>,
    block_cache: BlockCache,
    account_cache: AccountCache,
    strict: bool,
}

impl StateStore {
    pub fn open(
        dir: impl Into<PathBuf>,
        strict: bool,
        block_cache_capacity: usize,
        account_cache_capacity: usize,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("blocks"))?;
        fs::create_dir_all(dir.join("accounts"))?;

        let metadata = match read_json_opt::<ChainMetadata>(&dir.join("metadata.json"))? {
            Some(meta) => meta,
            None => ChainMetadata::empty()?,
        };
        let blocks_index =
            read_json_opt::<Vec<Hash>>(&dir.join("blocks.json"))?.unwrap_or_default();
        let accounts_index = read_json_opt::<BTreeMap<Address, Hash>>(&dir.join("accounts.json"))?
            .unwrap_or_default();
        let transactions_index =
            read_json_opt::<BTreeMap<Hash, u64>>(&dir.join("transactions.json"))?
                .unwrap_or_default();

        let store = StateStore {
            dir,
            metadata,
            blocks_index,
            accounts_index,
            transactions_index,
            block_cache: BlockCache::new_lru(block_cache_capacity),
            account_cache: AccountCache::new_lru(account_cache_capacity),
            strict,
        };
        store.check_consistency()?;
        Ok(store)
    }

    /// Compare persisted metadata against freshly recomputed index sizes
    /// and digests.
    fn check_consistency(&self) -> Result<()> {
        let mut findings = Vec::new();
        if self.blocks_index.len() as u64 != self.metadata.block_count {
            findings.push(format!(
                "block count: index has {}, metadata says {}",
                self.blocks_index.len(),
                self.metadata.block_count
            ));
        }
        if self.accounts_index.len() as u64 != self.metadata.account_count {
            findings.push(format!(
                "account count: index has {}, metadata says {}",
                self.accounts_index.len(),
                self.metadata.account_count
            ));
        }
        if self.transactions_index.len() as u64 != self.metadata.transaction_count {
            findings.push(format!(
                "transaction count: index has {}, metadata says {}",
                self.transactions_index.len(),
                self.metadata.transaction_count
            ));
        }
        if index_digest(&self.blocks_index)? != self.metadata.blocks_digest {
            findings.push("blocks index digest mismatch".to_string());
        }
        if index_digest(&self.accounts_index)? != self.metadata.accounts_digest {
            findings.push("accounts index digest mismatch".to_string());
        }
        if index_digest(&self.transactions_index)? != self.metadata.transactions_digest {
            findings.push("transactions index digest mismatch".to_string());
        }

        if findings.is_empty() {
            return Ok(());
        }
        if self.strict {
            return Err(ChainError::IntegrityFailure(findings.join("; ")));
        }
        for finding in findings {
            warn!("state store consistency: {}", finding);
        }
        Ok(())
    }

    pub fn metadata(&self) -> &ChainMetadata {
        &self.metadata
    }

    /// Number of blocks on the chain (the next height to produce).
    pub fn block_count(&self) -> u64 {
        self.blocks_index.len() as u64
    }

    pub fn last_block_hash(&self) -> Hash {
        self.blocks_index
            .last()
            .cloned()
            .unwrap_or_else(|| EMPTY_HASH.to_string())
    }

    pub fn total_supply(&self) -> Amount {
        self.metadata.total_supply
    }

    pub fn set_total_supply(&mut self, supply: Amount) {
        self.metadata.total_supply = supply;
    }

    pub fn block_hash_at(&self, height: u64) -> Option<&Hash> {
        self.blocks_index.get(height as usize)
    }

    pub fn block_height_by_hash(&self, hash: &str) -> Option<u64> {
        self.blocks_index
            .iter()
            .position(|h| h == hash)
            .map(|p| p as u64)
    }

    pub fn transaction_height(&self, tx_hash: &str) -> Option<u64> {
        self.transactions_index.get(tx_hash).copied()
    }

    pub fn has_account(&self, address: &Address) -> bool {
        self.accounts_index.contains_key(address)
    }

    /// Load a block, verifying its content hash against the index entry.
    pub fn load_block(&self, height: u64) -> Result<Block> {
        let expected = self.block_hash_at(height).cloned().ok_or_else(|| {
            ChainError::StorageError(format!("no block at height {}", height))
        })?;
        if let Some(block) = self.block_cache.get(&height) {
            return Ok(block);
        }
        let block: Block = read_json(&self.block_path(height))?;
        let recomputed = block.compute_hash()?;
        if recomputed != expected {
            return Err(ChainError::IntegrityFailure(format!(
                "block {} on disk hashes to {}, index records {}",
                height, recomputed, expected
            )));
        }
        self.block_cache.put(height, block.clone());
        Ok(block)
    }

    /// Load an account if it has ever been persisted, verifying its content
    /// hash against the index entry.
    pub fn load_account(&self, address: &Address) -> Result<Option<Account>> {
        let expected = match self.accounts_index.get(address) {
            Some(hash) => hash.clone(),
            None => return Ok(None),
        };
        if let Some(account) = self.account_cache.get(address) {
            return Ok(Some(account));
        }
        let account: Account = read_json(&self.account_path(address))?;
        let recomputed = account.content_hash()?;
        if recomputed != expected {
            return Err(ChainError::IntegrityFailure(format!(
                "account {} on disk hashes to {}, index records {}",
                address, recomputed, expected
            )));
        }
        self.account_cache.put(address.clone(), account.clone());
        Ok(Some(account))
    }

    /// Load an account or materialize a fresh zero-balance one.
    pub fn account_or_default(&self, address: &Address) -> Result<Account> {
        Ok(self
            .load_account(address)?
            .unwrap_or_else(|| Account::new(address.clone())))
    }

    /// Persist a sealed block and record it in the block + transaction
    /// indices. The caller commits the indices afterwards.
    pub fn persist_block(&mut self, block: &Block) -> Result<()> {
        let hash = block.hash()?.clone();
        if block.height != self.block_count() {
            return Err(ChainError::StorageError(format!(
                "block {} does not extend the index (next height {})",
                block.height,
                self.block_count()
            )));
        }
        write_json_atomic(&self.block_path(block.height), block)?;
        self.blocks_index.push(hash);
        for tx in &block.transactions {
            self.transactions_index.insert(tx.hash.clone(), block.height);
        }
        self.block_cache.put(block.height, block.clone());
        Ok(())
    }

    /// Persist a sealed account and record it in the accounts index.
    pub fn persist_account(&mut self, account: &Account) -> Result<()> {
        if account.hash == EMPTY_HASH {
            return Err(ChainError::StorageError(format!(
                "account {} is not sealed",
                account.address
            )));
        }
        write_json_atomic(&self.account_path(&account.address), account)?;
        self.accounts_index
            .insert(account.address.clone(), account.hash.clone());
        self.account_cache
            .put(account.address.clone(), account.clone());
        Ok(())
    }

    /// Recompute the running digests and aggregate counters, then persist
    /// the indices and (last) the metadata.
    pub fn commit_indices(&mut self) -> Result<()> {
        self.metadata.block_count = self.blocks_index.len() as u64;
        self.metadata.account_count = self.accounts_index.len() as u64;
        self.metadata.transaction_count = self.transactions_index.len() as u64;
        self.metadata.blocks_digest = index_digest(&self.blocks_index)?;
        self.metadata.accounts_digest = index_digest(&self.accounts_index)?;
        self.metadata.transactions_digest = index_digest(&self.transactions_index)?;
        self.metadata.last_block_hash = self.last_block_hash();

        write_json_atomic(&self.dir.join("blocks.json"), &self.blocks_index)?;
        write_json_atomic(&self.dir.join("accounts.json"), &self.accounts_index)?;
        write_json_atomic(&self.dir.join("transactions.json"), &self.transactions_index)?;
        write_json_atomic(&self.dir.join("metadata.json"), &self.metadata)?;
        debug!(
            blocks = self.metadata.block_count,
            accounts = self.metadata.account_count,
            "committed chain indices"
        );
        Ok(())
    }

    fn block_path(&self, height: u64) -> PathBuf {
        self.dir.join("blocks").join(format!("{:012}.json", height))
    }

    fn account_path(&self, address: &Address) -> PathBuf {
        self.dir
            .join("accounts")
            .join(format!("{}.json", address))
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)
        .map_err(|e| ChainError::StorageError(format!("read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ChainError::StorageError(format!("parse {}: {}", path.display(), e)))
}

fn read_json_opt<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes())
        .map_err(|e| ChainError::StorageError(format!("write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path)
        .map_err(|e| ChainError::StorageError(format!("rename {}: {}", path.display(), e)))?;
    Ok(())
}
