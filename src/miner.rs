//! Block production control loop
//!
//! A periodic tokio task that decides, from the pending-transaction count
//! and the time since the last block, when to attempt producing one. The
//! ledger itself stays the authority on what actually goes into the block.

use crate::config::MinerConfig;
use crate::crypto::Address;
use crate::error::ChainError;
use crate::ledger::Ledger;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Produce when a full batch is waiting, or when anything has waited past
/// the configured ceiling.
pub fn should_produce(pending: usize, batch_txs: usize, waited: Duration, max_wait: Duration) -> bool {
    if pending == 0 {
        return false;
    }
    pending >= batch_txs || waited >= max_wait
}

pub struct MinerLoop {
    ledger: Arc<RwLock<Ledger>>,
    beneficiary: Address,
    tick: Duration,
    batch_txs: usize,
    max_wait: Duration,
}

impl MinerLoop {
    pub fn new(
        ledger: Arc<RwLock<Ledger>>,
        beneficiary: Address,
        config: &MinerConfig,
    ) -> Self {
        MinerLoop {
            ledger,
            beneficiary,
            tick: Duration::from_secs(config.tick_secs.max(1)),
            batch_txs: config.batch_txs.max(1),
            max_wait: Duration::from_secs(config.max_wait_secs),
        }
    }

    pub async fn run(self) {
        let mut last_block = Instant::now();
        loop {
            tokio::time::sleep(self.tick).await;

            let pending = self.ledger.read().await.pending_transactions();
            if !should_produce(pending, self.batch_txs, last_block.elapsed(), self.max_wait) {
                continue;
            }

            let timestamp = chrono::Utc::now().timestamp_millis() as u64;
            let result = self
                .ledger
                .write()
                .await
                .produce_block(&self.beneficiary, timestamp, 0);
            match result {
                Ok(Some(block)) => {
                    last_block = Instant::now();
                    info!(
                        height = block.height,
                        transactions = block.transactions.len(),
                        "miner produced block"
                    );
                }
                Ok(None) => {}
                Err(ChainError::InvalidBlock(reason)) => {
                    warn!("miner skipped a round: {}", reason);
                }
                Err(e) => {
                    warn!("block production failed: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_pool_never_produces() {
        assert!(!should_produce(
            0,
            1,
            Duration::from_secs(999),
            Duration::from_secs(30)
        ));
    }

    #[test]
    fn test_full_batch_produces_immediately() {
        assert!(should_produce(
            10,
            10,
            Duration::from_secs(0),
            Duration::from_secs(30)
        ));
    }

    #[test]
    fn test_partial_batch_waits_for_deadline() {
        assert!(!should_produce(
            3,
            10,
            Duration::from_secs(5),
            Duration::from_secs(30)
        ));
        assert!(should_produce(
            3,
            10,
            Duration::from_secs(31),
            Duration::from_secs(30)
        ));
    }
}
