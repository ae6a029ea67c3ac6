//! Node composition root
//!
//! Wires configuration, the state store, the ledger orchestrator, the peer
//! synchronizer and the miner loop together. All block construction and
//! ingestion is serialized behind one `RwLock<Ledger>`; peer and RPC
//! traffic arriving mid-block simply waits its turn.

use crate::config::Config;
use crate::crypto::Address;
use crate::ledger::{Ledger, LedgerConfig};
use crate::mempool::Mempool;
use crate::miner::MinerLoop;
use crate::store::StateStore;
use crate::sync::{ChainSynchronizer, NodeMetadata, PeerMessage, SyncAction};
use crate::vm::engine::{ExecutionEngine, FeeSchedule, VmLimits};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    Booting,
    Syncing,
    Ready,
    Degraded,
}

pub struct Node {
    pub config: Config,
    pub ledger: Arc<RwLock<Ledger>>,
    pub synchronizer: Arc<ChainSynchronizer>,
    pub state: Arc<RwLock<NodeState>>,
}

impl Node {
    pub async fn init(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        info!(
            network_id = %config.sync.network_id,
            data_dir = %config.chain.data_dir,
            "starting SlateChain node"
        );

        std::fs::create_dir_all(&config.chain.data_dir)?;
        let store = StateStore::open(
            &config.chain.data_dir,
            config.chain.strict_integrity,
            config.chain.block_cache,
            config.chain.account_cache,
        )?;

        let limits = VmLimits {
            max_calls: config.vm.max_calls,
            max_steps: config.vm.max_steps,
            timeout_ms: config.vm.timeout_ms,
        };
        let engine = ExecutionEngine::new(limits, FeeSchedule::default());
        let mempool = Mempool::new(
            config.mempool.capacity,
            config.mempool.policy,
            FeeSchedule::default(),
        );
        let ledger_config = LedgerConfig {
            min_txs_per_block: config.chain.min_txs_per_block,
            max_txs_per_block: config.chain.max_txs_per_block,
        };
        let mut ledger = Ledger::new(store, mempool, engine, ledger_config);

        if !ledger.has_genesis() {
            let beneficiary = if config.miner.beneficiary.is_empty() {
                warn!("no miner.beneficiary configured; deriving a genesis address");
                Address::derive(config.sync.network_id.as_bytes())
            } else {
                Address::parse(&config.miner.beneficiary)?
            };
            let timestamp = chrono::Utc::now().timestamp_millis() as u64;
            ledger.init_genesis(&beneficiary, timestamp)?;
        }
        info!(height = ledger.height(), "chain loaded");

        let synchronizer = Arc::new(ChainSynchronizer::new(config.sync.network_id.clone()));

        Ok(Self {
            config,
            ledger: Arc::new(RwLock::new(ledger)),
            synchronizer,
            state: Arc::new(RwLock::new(NodeState::Booting)),
        })
    }

    /// What this node advertises to peers.
    pub async fn local_metadata(&self) -> NodeMetadata {
        let ledger = self.ledger.read().await;
        NodeMetadata {
            network_id: self.config.sync.network_id.clone(),
            height: ledger.height(),
            head_hash: ledger.last_block_hash(),
        }
    }

    /// Apply an inbound peer message. The transport layer delivers the
    /// envelope; this routes it into the orchestrator/mempool and returns
    /// any reply the transport should carry back.
    pub async fn handle_peer_message(
        &self,
        peer_id: &str,
        message: PeerMessage,
    ) -> Option<PeerMessage> {
        let local = self.local_metadata().await;
        let action = match self
            .synchronizer
            .handle_message(peer_id, message, local)
            .await
        {
            Ok(action) => action,
            Err(e) => {
                warn!(peer = peer_id, "rejected peer message: {}", e);
                return None;
            }
        };
        match action {
            SyncAction::Ingest(block) => {
                let result = self.ledger.write().await.ingest_block(block);
                match result {
                    Ok(()) => self.synchronizer.record_block_received(peer_id).await,
                    Err(e) => {
                        warn!(peer = peer_id, "failed to ingest peer block: {}", e);
                        self.synchronizer.record_sync_failure(peer_id).await;
                    }
                }
                None
            }
            SyncAction::Admit(tx) => {
                if let Err(e) = self.ledger.write().await.admit_transaction(tx) {
                    warn!(peer = peer_id, "rejected peer transaction: {}", e);
                }
                None
            }
            SyncAction::Reply(reply) => Some(reply),
            SyncAction::SendBlock { height } => {
                match self.ledger.read().await.block(height) {
                    Ok(block) => Some(PeerMessage::NewBlock(block)),
                    Err(e) => {
                        warn!(peer = peer_id, height, "cannot serve block: {}", e);
                        None
                    }
                }
            }
            SyncAction::Noop => None,
        }
    }

    pub async fn start(self: Arc<Self>) -> Result<(), Box<dyn std::error::Error>> {
        {
            let mut state = self.state.write().await;
            *state = NodeState::Syncing;
        }

        // With no peers configured the local chain is authoritative.
        {
            let mut state = self.state.write().await;
            *state = NodeState::Ready;
        }

        if self.config.miner.enabled {
            let beneficiary = Address::parse(&self.config.miner.beneficiary)?;
            let miner = MinerLoop::new(self.ledger.clone(), beneficiary, &self.config.miner);
            tokio::spawn(async move {
                miner.run().await;
            });
            info!("miner loop started");
        }

        // Health loop
        loop {
            let (height, pending) = {
                let ledger = self.ledger.read().await;
                (ledger.height(), ledger.pending_transactions())
            };
            info!(height, pending, "node running");
            if *self.state.read().await == NodeState::Degraded {
                error!("node degraded; manual intervention required");
            }
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        }
    }
}
