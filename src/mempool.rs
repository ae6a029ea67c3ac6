//! Transaction mempool
//!
//! Holding area for admitted-but-unconfirmed transactions. Admission
//! enforces per-sender nonce continuity (current tx-count plus already
//! pending transactions) and de-duplicates by content hash. Selection is
//! pluggable (arrival order by default, estimated-fee priority as an
//! alternative) and always re-establishes per-sender nonce order in the
//! selected slice, so two transactions from one sender apply in nonce
//! order regardless of how they arrived.

use crate::crypto::{Address, Hash};
use crate::error::{ChainError, Result};
use crate::transaction::{Instruction, Transaction};
use crate::vm::engine::FeeSchedule;
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// First come, first served.
    Arrival,
    /// Highest estimated fee first, arrival order as tie-break.
    FeePriority,
}

pub struct Mempool {
    transactions: HashMap<Hash, Transaction>,
    /// Insertion order of the hashes above.
    order: Vec<Hash>,
    capacity: usize,
    policy: SelectionPolicy,
    fees: FeeSchedule,
}

impl Mempool {
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(capacity: usize, policy: SelectionPolicy, fees: FeeSchedule) -> Self {
        Mempool {
            transactions: HashMap::new(),
            order: Vec::new(),
            capacity,
            policy,
            fees,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.transactions.contains_key(hash)
    }

    /// Pending transactions from one sender.
    pub fn pending_from(&self, sender: &Address) -> usize {
        self.order
            .iter()
            .filter_map(|h| self.transactions.get(h))
            .filter(|tx| &tx.from == sender)
            .count()
    }

    /// Build and admit a transaction. When `nonce` is omitted the next one
    /// for the sender is assigned (current tx-count plus pending).
    pub fn submit(
        &mut self,
        from: Address,
        instructions: Vec<Instruction>,
        nonce: Option<u64>,
        sender_tx_count: u64,
    ) -> Result<Transaction> {
        let expected = sender_tx_count + self.pending_from(&from) as u64;
        let nonce = match nonce {
            Some(n) => n,
            None => expected,
        };
        let tx = Transaction::new(from, nonce, instructions)?;
        self.admit(tx.clone(), sender_tx_count)?;
        Ok(tx)
    }

    /// Admit a fully formed transaction (e.g. relayed by a peer).
    pub fn admit(&mut self, tx: Transaction, sender_tx_count: u64) -> Result<()> {
        if self.order.len() >= self.capacity {
            return Err(ChainError::MempoolFull);
        }
        tx.verify_hash()?;
        tx.validate()?;
        if tx.is_system() {
            return Err(ChainError::InvalidTransaction(
                "system transactions are synthesized during block production".to_string(),
            ));
        }

        let expected = sender_tx_count + self.pending_from(&tx.from) as u64;
        if tx.nonce != expected {
            // covers both stale nonces and a second pending transaction
            // reusing a nonce
            return Err(ChainError::NonceMismatch {
                expected,
                got: tx.nonce,
            });
        }

        if self.transactions.contains_key(&tx.hash) {
            return Err(ChainError::DuplicateTransaction(tx.hash));
        }

        self.order.push(tx.hash.clone());
        self.transactions.insert(tx.hash.clone(), tx);
        Ok(())
    }

    /// Select up to `max` transactions for a block. The policy orders the
    /// pool; a per-sender pass then rewrites each sender's subsequence into
    /// nonce order so execution never sees a gap.
    pub fn select(&self, max: usize) -> Vec<Transaction> {
        let mut ordered: Vec<&Transaction> = self
            .order
            .iter()
            .filter_map(|h| self.transactions.get(h))
            .collect();

        if self.policy == SelectionPolicy::FeePriority {
            // stable: arrival order breaks ties
            ordered.sort_by(|a, b| self.fees.estimate(b).cmp(&self.fees.estimate(a)));
        }

        // Per-sender queues sorted by nonce; each position occupied by a
        // sender yields that sender's lowest remaining nonce.
        let mut queues: BTreeMap<&Address, VecDeque<&Transaction>> = BTreeMap::new();
        for tx in &ordered {
            queues.entry(&tx.from).or_default().push_back(tx);
        }
        for queue in queues.values_mut() {
            let mut sorted: Vec<&Transaction> = queue.drain(..).collect();
            sorted.sort_by_key(|tx| tx.nonce);
            queue.extend(sorted);
        }

        let mut selected = Vec::new();
        for tx in &ordered {
            if selected.len() >= max {
                break;
            }
            if let Some(queue) = queues.get_mut(&tx.from) {
                if let Some(next) = queue.pop_front() {
                    selected.push(next.clone());
                }
            }
        }
        selected
    }

    /// Remove transactions that were included in a committed block.
    pub fn purge(&mut self, hashes: &[Hash]) {
        for hash in hashes {
            self.transactions.remove(hash);
        }
        self.order.retain(|h| self.transactions.contains_key(h));
    }
}
