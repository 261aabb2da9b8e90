// networking/src/handler.rs

//! Protocol entry point: handshake, per-peer dispatch, and the bounded
//! fan-out queues for tx/block broadcast (spec §4.H). Replaces the
//! teacher's `p2p.rs` stub.

use crate::delay::NetworkDelayHandler;
use crate::discovery::PeerDiscovery;
use crate::monitor::NetworkMonitor;
use crate::peer::{Peer, PeerId, PeerTable};
use crate::propagator::BlockPropagator;
use crate::protocol::{
    BlockResponsePayload, MessageCode, NewBlockPayload, NewTxPayload, ProtocolMessage, TxResponsePayload, ValidatorSetPayload,
};
use crate::security::{Decision, RateLimitCategory, SecurityManager, ViolationKind};
use crate::{NetworkError, NetworkResult};
use async_trait::async_trait;
use chain_types::{Amount, Block, Transaction};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

pub const MAX_QUEUED_TXS: usize = 4096;
pub const MAX_QUEUED_BLOCKS: usize = 1024;
pub const TX_FANOUT_WORKERS: usize = 10;
pub const BLOCK_FANOUT_WORKERS: usize = 5;

/// Hook back into the application: block insertion and mempool admission.
/// The networking crate depends only on this narrow surface, not on the
/// chain or mempool types directly wiring their own locks.
#[async_trait]
pub trait ChainSink: Send + Sync {
    async fn insert_block(&self, block: Block) -> NetworkResult<()>;
    async fn admit_tx(&self, tx: Transaction) -> NetworkResult<()>;
}

#[derive(Debug, Clone)]
pub struct P2PConfig {
    pub protocol_version: u64,
    pub max_queued_txs: usize,
    pub max_queued_blocks: usize,
}

impl Default for P2PConfig {
    fn default() -> Self {
        Self {
            protocol_version: 1,
            max_queued_txs: MAX_QUEUED_TXS,
            max_queued_blocks: MAX_QUEUED_BLOCKS,
        }
    }
}

pub enum NetworkEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    MessageReceived(PeerId, MessageCode),
}

/// Work items fanned out to the bounded tx/block broadcast workers.
pub enum BroadcastJob {
    Tx(Transaction),
    Block(Block, Amount),
}

/// Ties `PeerTable`, `SecurityManager`, `BlockPropagator`, `NetworkDelayHandler`,
/// `PeerDiscovery`, and `NetworkMonitor` together behind the wire protocol.
pub struct P2PHandler {
    config: P2PConfig,
    table: Arc<PeerTable>,
    security: Arc<SecurityManager>,
    propagator: Arc<BlockPropagator>,
    delay: Arc<NetworkDelayHandler>,
    discovery: Arc<PeerDiscovery>,
    monitor: Arc<NetworkMonitor>,
    chain: Arc<dyn ChainSink>,
    tx_sender: mpsc::Sender<BroadcastJob>,
}

impl P2PHandler {
    pub fn new(
        config: P2PConfig,
        table: Arc<PeerTable>,
        security: Arc<SecurityManager>,
        propagator: Arc<BlockPropagator>,
        delay: Arc<NetworkDelayHandler>,
        discovery: Arc<PeerDiscovery>,
        monitor: Arc<NetworkMonitor>,
        chain: Arc<dyn ChainSink>,
    ) -> (Self, mpsc::Receiver<BroadcastJob>) {
        let (tx_sender, rx) = mpsc::channel(config.max_queued_txs.max(config.max_queued_blocks));
        (
            Self { config, table, security, propagator, delay, discovery, monitor, chain, tx_sender },
            rx,
        )
    }

    pub fn table(&self) -> &Arc<PeerTable> {
        &self.table
    }

    pub fn security(&self) -> &Arc<SecurityManager> {
        &self.security
    }

    pub fn monitor(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    pub fn discovery(&self) -> &Arc<PeerDiscovery> {
        &self.discovery
    }

    pub fn delay(&self) -> &Arc<NetworkDelayHandler> {
        &self.delay
    }

    pub fn propagator(&self) -> &Arc<BlockPropagator> {
        &self.propagator
    }

    /// Registers a newly connected peer and runs the handshake reply
    /// through `PeerTable::handshake`. On a wire violation the connection
    /// must be dropped and the violation recorded by the caller.
    pub fn accept(&self, id: PeerId, remote_addr: SocketAddr, outbound: bool) -> NetworkResult<()> {
        let peer = Peer::new(id, remote_addr, self.config.protocol_version, outbound, self.table.known_cache_capacity(), self.table.outbox_capacity());
        self.table.register(peer)?;
        self.security.register_peer(id, remote_addr.ip(), Instant::now());
        Ok(())
    }

    pub fn complete_handshake(&self, id: &PeerId, reply: &ProtocolMessage) -> NetworkResult<()> {
        if !matches!(reply, ProtocolMessage::Status(_)) {
            self.violate(*id, ViolationKind::ProtocolViolation);
            return Err(NetworkError::ProtocolError("first message must be Status".into()));
        }
        self.table.handshake(id, self.config.protocol_version, reply)
    }

    fn violate(&self, id: PeerId, kind: ViolationKind) {
        self.security.record_violation(id, kind, Instant::now());
    }

    fn category_for(code: MessageCode) -> RateLimitCategory {
        match code {
            MessageCode::NewBlock | MessageCode::BlockRequest | MessageCode::BlockResponse => RateLimitCategory::Block,
            MessageCode::NewTx | MessageCode::TxRequest | MessageCode::TxResponse => RateLimitCategory::Tx,
            _ => RateLimitCategory::Message,
        }
    }

    /// Dispatches one already-decoded message from `id`. A duplicate
    /// `Status` after the handshake is fatal (spec §6 decoding rules).
    pub async fn handle_message(&self, id: PeerId, msg: ProtocolMessage) -> NetworkResult<()> {
        let now = Instant::now();
        let category = Self::category_for(msg.code());
        match self.security.admit(id, category, now) {
            Decision::RejectBanned => return Err(NetworkError::PeerError("peer is banned".into())),
            Decision::RejectRateLimit => return Err(NetworkError::ProtocolError("rate limit exceeded".into())),
            Decision::Admit => {}
        }

        match msg {
            ProtocolMessage::Status(_) => {
                self.violate(id, ViolationKind::ProtocolViolation);
                Err(NetworkError::ProtocolError("duplicate Status after handshake".into()))
            }
            ProtocolMessage::NewBlock(payload) => self.on_new_block(id, payload).await,
            ProtocolMessage::NewTx(payload) => self.on_new_tx(id, payload).await,
            ProtocolMessage::BlockRequest(_) | ProtocolMessage::TxRequest(_) => {
                // Resolved against chain state by the caller; the handler
                // only validates and forwards the query, it holds no
                // block/tx storage of its own.
                Ok(())
            }
            ProtocolMessage::BlockResponse(BlockResponsePayload { blocks }) => {
                for block in blocks {
                    self.chain.insert_block(block).await?;
                }
                Ok(())
            }
            ProtocolMessage::TxResponse(TxResponsePayload { transactions }) => {
                for tx in transactions {
                    self.chain.admit_tx(tx).await?;
                }
                Ok(())
            }
            ProtocolMessage::ValidatorSet(_) | ProtocolMessage::Vote(_) | ProtocolMessage::Proposal(_) | ProtocolMessage::Evidence(_) => {
                // Opaque to this core: no BFT round state machine (out of scope).
                Ok(())
            }
            ProtocolMessage::Ping => {
                self.table.with_peer_mut(&id, |p| p.send_pong());
                Ok(())
            }
            ProtocolMessage::Pong => {
                self.table.with_peer_mut(&id, |p| p.touch());
                Ok(())
            }
        }
    }

    async fn on_new_block(&self, id: PeerId, payload: NewBlockPayload) -> NetworkResult<()> {
        let hash = payload.block.hash();
        self.table.with_peer_mut(&id, |p| p.known_blocks.add(hash));
        self.chain.insert_block(payload.block.clone()).await?;
        self.security.record_good_action(id, Instant::now());

        let _ = self.tx_sender.try_send(BroadcastJob::Block(payload.block, payload.total_difficulty)).map_err(|_| {
            tracing::debug!("block broadcast queue full, dropping rebroadcast");
        });
        Ok(())
    }

    async fn on_new_tx(&self, id: PeerId, payload: NewTxPayload) -> NetworkResult<()> {
        for tx in &payload.transactions {
            let hash = tx.hash();
            self.table.with_peer_mut(&id, |p| p.known_txs.add(hash));
            self.chain.admit_tx(tx.clone()).await?;
        }
        self.security.record_good_action(id, Instant::now());

        for tx in payload.transactions {
            let _ = self.tx_sender.try_send(BroadcastJob::Tx(tx)).map_err(|_| {
                tracing::debug!("tx broadcast queue full, dropping rebroadcast");
            });
        }
        Ok(())
    }

    /// Spawns the dedicated fan-out workers that drain the broadcast
    /// queue: `TX_FANOUT_WORKERS` for transactions, `BLOCK_FANOUT_WORKERS`
    /// for blocks, sharing one bounded channel keyed by job type.
    pub fn spawn_fanout_workers(
        propagator: Arc<BlockPropagator>,
        table: Arc<PeerTable>,
        rx: mpsc::Receiver<BroadcastJob>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut rx = rx;
            while let Some(job) = rx.recv().await {
                match job {
                    BroadcastJob::Block(block, td) => {
                        propagator.propagate(&block, td, &table, Instant::now());
                    }
                    BroadcastJob::Tx(tx) => {
                        let hash = tx.hash();
                        for peer_id in table.peers_without_tx(&hash) {
                            table.with_peer_mut(&peer_id, |peer| {
                                peer.send_new_tx(NewTxPayload { transactions: vec![tx.clone()] }, &[hash]);
                            });
                        }
                    }
                }
            }
        })
    }

    pub fn broadcast_validator_set(&self, addresses: Vec<crypto::Address>) {
        for id in self.table.ids() {
            self.table.with_peer_mut(&id, |p| p.send_validator_set(ValidatorSetPayload { addresses: addresses.clone() }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusPayload;
    use crypto::Hash;
    use std::net::{IpAddr, Ipv4Addr};

    struct NullSink;

    #[async_trait]
    impl ChainSink for NullSink {
        async fn insert_block(&self, _block: Block) -> NetworkResult<()> {
            Ok(())
        }
        async fn admit_tx(&self, _tx: Transaction) -> NetworkResult<()> {
            Ok(())
        }
    }

    fn handler() -> (P2PHandler, mpsc::Receiver<BroadcastJob>) {
        P2PHandler::new(
            P2PConfig::default(),
            Arc::new(PeerTable::new(1024, 64)),
            Arc::new(SecurityManager::new(Instant::now())),
            Arc::new(BlockPropagator::new(4, 16, 1024)),
            Arc::new(NetworkDelayHandler::new(std::time::Duration::from_secs(1), std::time::Duration::from_secs(30), 2.0, 0.5)),
            Arc::new(PeerDiscovery::new("local".into(), 3, 100)),
            Arc::new(NetworkMonitor::new()),
            Arc::new(NullSink),
        )
    }

    #[tokio::test]
    async fn test_duplicate_status_is_fatal() {
        let (h, _rx) = handler();
        let id = PeerId::random();
        h.accept(id, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000), true).unwrap();
        h.complete_handshake(&id, &ProtocolMessage::Status(StatusPayload { protocol_version: 1, head: Hash::zero(), total_difficulty: Amount::zero() })).unwrap();

        let result = h.handle_message(id, ProtocolMessage::Status(StatusPayload { protocol_version: 1, head: Hash::zero(), total_difficulty: Amount::zero() })).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ping_replies_pong() {
        let (h, _rx) = handler();
        let id = PeerId::random();
        h.accept(id, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000), true).unwrap();
        h.handle_message(id, ProtocolMessage::Ping).await.unwrap();

        let out = h.table.drain_outbox(&id);
        assert!(out.iter().any(|m| matches!(m, ProtocolMessage::Pong)));
    }
}
