//! Peer synchronization for SlateChain
//!
//! Interface-level only: this module owns the peer message contract and the
//! reconciliation logic, not the wire transport. It provides:
//! - the opaque peer message envelope
//! - peer registration with failure and staleness tracking
//! - a block-sync reconciliation plan built by comparing local vs. remote
//!   (height, hash) pairs, requesting each missing height from a peer known
//!   to hold the matching head

use crate::block::Block;
use crate::crypto::Hash;
use crate::error::{ChainError, Result};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// What a node advertises about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub network_id: String,
    pub height: u64,
    pub head_hash: Hash,
}

/// The opaque peer envelope. Transport framing is out of scope; only this
/// contract is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PeerMessage {
    #[serde(rename = "NODE_METADATA")]
    NodeMetadata(NodeMetadata),
    #[serde(rename = "NODE_METADATA_ACK")]
    NodeMetadataAck(NodeMetadata),
    #[serde(rename = "NEW_BLOCK")]
    NewBlock(Block),
    #[serde(rename = "NEW_TRANSACTION")]
    NewTransaction(Transaction),
    #[serde(rename = "REQUEST_BLOCK")]
    RequestBlock { height: u64 },
}

/// What the node shell should do with an inbound message.
#[derive(Debug)]
pub enum SyncAction {
    /// Feed the block to the orchestrator.
    Ingest(Block),
    /// Feed the transaction to the mempool.
    Admit(Transaction),
    /// Send a reply back to the originating peer.
    Reply(PeerMessage),
    /// Look up and send the requested block to the originating peer.
    SendBlock { height: u64 },
    /// Nothing to do.
    Noop,
}

/// One block to fetch, and the peer to fetch it from.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRequest {
    pub height: u64,
    pub peer_id: String,
}

/// Peer sync information
#[derive(Debug, Clone)]
pub struct PeerSyncInfo {
    pub peer_id: String,
    pub height: u64,
    pub head_hash: Hash,
    pub last_seen: Instant,
    pub blocks_received: u64,
    pub sync_failures: u32,
}

impl PeerSyncInfo {
    fn new(peer_id: String, height: u64, head_hash: Hash) -> Self {
        Self {
            peer_id,
            height,
            head_hash,
            last_seen: Instant::now(),
            blocks_received: 0,
            sync_failures: 0,
        }
    }

    /// A peer that failed three times is not asked again.
    pub fn is_unreliable(&self) -> bool {
        self.sync_failures >= 3
    }

    /// Not seen in five minutes.
    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() > Duration::from_secs(300)
    }
}

/// Tracks peers and drives block-sync reconciliation.
pub struct ChainSynchronizer {
    network_id: String,
    peers: Arc<RwLock<HashMap<String, PeerSyncInfo>>>,
}

impl ChainSynchronizer {
    pub fn new(network_id: String) -> Self {
        Self {
            network_id,
            peers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peer_info(&self, peer_id: &str) -> Option<PeerSyncInfo> {
        self.peers.read().await.get(peer_id).cloned()
    }

    /// Record a peer's advertised metadata, registering it on first
    /// contact. Peers on another network are rejected.
    pub async fn observe_peer(&self, peer_id: &str, metadata: &NodeMetadata) -> Result<()> {
        if metadata.network_id != self.network_id {
            return Err(ChainError::SyncError(format!(
                "peer {} is on network {:?}, expected {:?}",
                peer_id, metadata.network_id, self.network_id
            )));
        }
        let mut peers = self.peers.write().await;
        match peers.get_mut(peer_id) {
            Some(peer) => {
                peer.height = metadata.height;
                peer.head_hash = metadata.head_hash.clone();
                peer.last_seen = Instant::now();
            }
            None => {
                peers.insert(
                    peer_id.to_string(),
                    PeerSyncInfo::new(
                        peer_id.to_string(),
                        metadata.height,
                        metadata.head_hash.clone(),
                    ),
                );
            }
        }
        Ok(())
    }

    /// Record a successful block delivery from a peer.
    pub async fn record_block_received(&self, peer_id: &str) {
        if let Some(peer) = self.peers.write().await.get_mut(peer_id) {
            peer.blocks_received += 1;
            peer.last_seen = Instant::now();
        }
    }

    /// Record a failed or bogus delivery from a peer.
    pub async fn record_sync_failure(&self, peer_id: &str) {
        if let Some(peer) = self.peers.write().await.get_mut(peer_id) {
            peer.sync_failures += 1;
            peer.last_seen = Instant::now();
        }
    }

    /// Drop peers that have gone quiet.
    pub async fn cleanup_stale_peers(&self) {
        self.peers.write().await.retain(|_, p| !p.is_stale());
    }

    /// Map an inbound message to the action the node shell should take.
    pub async fn handle_message(
        &self,
        peer_id: &str,
        message: PeerMessage,
        local: NodeMetadata,
    ) -> Result<SyncAction> {
        match message {
            PeerMessage::NodeMetadata(metadata) => {
                self.observe_peer(peer_id, &metadata).await?;
                Ok(SyncAction::Reply(PeerMessage::NodeMetadataAck(local)))
            }
            PeerMessage::NodeMetadataAck(metadata) => {
                self.observe_peer(peer_id, &metadata).await?;
                Ok(SyncAction::Noop)
            }
            PeerMessage::NewBlock(block) => Ok(SyncAction::Ingest(block)),
            PeerMessage::NewTransaction(tx) => Ok(SyncAction::Admit(tx)),
            PeerMessage::RequestBlock { height } => Ok(SyncAction::SendBlock { height }),
        }
    }

    /// Build a reconciliation plan: compare the local (height, hash) pair
    /// against every reliable peer's advertised pair, pick the head claimed
    /// by the most peers among those ahead of us, and request each missing
    /// height round-robin from the peers known to hold that head.
    pub async fn reconcile(&self, local: &NodeMetadata) -> Vec<BlockRequest> {
        let peers = self.peers.read().await;
        let candidates: Vec<&PeerSyncInfo> = peers
            .values()
            .filter(|p| !p.is_unreliable() && !p.is_stale() && p.height > local.height)
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        // group by advertised head
        let mut heads: HashMap<(u64, &str), Vec<&PeerSyncInfo>> = HashMap::new();
        for peer in &candidates {
            heads
                .entry((peer.height, peer.head_hash.as_str()))
                .or_default()
                .push(peer);
        }
        let ((target_height, _), mut holders) = match heads
            .into_iter()
            .max_by_key(|((height, _), group)| (group.len(), *height))
        {
            Some(best) => best,
            None => return Vec::new(),
        };
        holders.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));

        (local.height..target_height)
            .enumerate()
            .map(|(i, height)| BlockRequest {
                height,
                peer_id: holders[i % holders.len()].peer_id.clone(),
            })
            .collect()
    }
}
