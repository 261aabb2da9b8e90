use async_trait::async_trait;
use chain_types::{Amount, Block, Transaction, TransactionType};
use crypto::{Address, Hash, KeyPair, SignatureScheme};
use networking::handler::{ChainSink, P2PConfig, P2PHandler};
use networking::{
    BlockPropagator, Decision, NetworkDelayHandler, NetworkMonitor, NetworkResult, Peer, PeerDiscovery, PeerId, PeerTable,
    ProtocolMessage, RateLimitCategory, SecurityManager,
};
use networking::protocol::StatusPayload;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

struct RecordingSink {
    blocks: Mutex<Vec<Block>>,
    txs: Mutex<Vec<Transaction>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self { blocks: Mutex::new(Vec::new()), txs: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ChainSink for RecordingSink {
    async fn insert_block(&self, block: Block) -> NetworkResult<()> {
        self.blocks.lock().await.push(block);
        Ok(())
    }

    async fn admit_tx(&self, tx: Transaction) -> NetworkResult<()> {
        self.txs.lock().await.push(tx);
        Ok(())
    }
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

fn signed_transfer(nonce: u64, amount: u64) -> Transaction {
    let key = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
    let mut tx = Transaction::new(
        key.public_key().to_address(),
        nonce,
        TransactionType::Transfer { to: Address::zero(), amount: Amount::from_u64(amount) },
        10,
        21_000,
    );
    let sig = key.sign(tx.hash().as_bytes()).unwrap();
    tx.signature = Some(sig);
    tx
}

fn block_at(number: u64) -> Block {
    Block::new(number, Hash::zero(), Hash::zero(), Address::zero(), vec![], 1_000_000).unwrap()
}

/// Builds a handler for direct `handle_message` dispatch. The broadcast
/// receiver is dropped: these tests exercise dispatch synchronously and
/// don't need the background fan-out workers running.
fn make_handler(sink: Arc<RecordingSink>) -> Arc<P2PHandler> {
    let (handler, rx) = P2PHandler::new(
        P2PConfig::default(),
        Arc::new(PeerTable::new(1024, 64)),
        Arc::new(SecurityManager::new(Instant::now())),
        Arc::new(BlockPropagator::new(4, 16, 1024)),
        Arc::new(NetworkDelayHandler::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.5)),
        Arc::new(PeerDiscovery::new("local".into(), 3, 100)),
        Arc::new(NetworkMonitor::new()),
        sink,
    );
    drop(rx);
    Arc::new(handler)
}

#[tokio::test]
async fn test_handshake_then_new_block_reaches_chain_sink() {
    let sink = Arc::new(RecordingSink::new());
    let handler = make_handler(sink.clone());

    let id = PeerId::random();
    handler.accept(id, addr(9000), true).unwrap();
    handler
        .complete_handshake(&id, &ProtocolMessage::Status(StatusPayload { protocol_version: 1, head: Hash::zero(), total_difficulty: Amount::zero() }))
        .unwrap();

    let block = block_at(1);
    let msg = ProtocolMessage::NewBlock(networking::protocol::NewBlockPayload { block: block.clone(), total_difficulty: Amount::from_u64(10) });
    handler.handle_message(id, msg).await.unwrap();

    let blocks = sink.blocks.lock().await;
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].hash(), block.hash());
}

#[tokio::test]
async fn test_new_tx_reaches_chain_sink_and_marks_known() {
    let sink = Arc::new(RecordingSink::new());
    let handler = make_handler(sink.clone());

    let id = PeerId::random();
    handler.accept(id, addr(9001), true).unwrap();
    handler
        .complete_handshake(&id, &ProtocolMessage::Status(StatusPayload { protocol_version: 1, head: Hash::zero(), total_difficulty: Amount::zero() }))
        .unwrap();

    let tx = signed_transfer(0, 50);
    let hash = tx.hash();
    let msg = ProtocolMessage::NewTx(networking::protocol::NewTxPayload { transactions: vec![tx] });
    handler.handle_message(id, msg).await.unwrap();

    assert_eq!(sink.txs.lock().await.len(), 1);
    assert!(handler.table().with_peer(&id, |p| p.known_txs.contains(&hash)).unwrap());
}

#[tokio::test]
async fn test_duplicate_status_after_handshake_is_rejected() {
    let sink = Arc::new(RecordingSink::new());
    let handler = make_handler(sink);

    let id = PeerId::random();
    handler.accept(id, addr(9002), true).unwrap();
    let status = ProtocolMessage::Status(StatusPayload { protocol_version: 1, head: Hash::zero(), total_difficulty: Amount::zero() });
    handler.complete_handshake(&id, &status).unwrap();

    assert!(handler.handle_message(id, status).await.is_err());
}

#[tokio::test]
async fn test_rate_limited_peer_is_rejected() {
    let sink = Arc::new(RecordingSink::new());
    let handler = make_handler(sink);

    let id = PeerId::random();
    handler.accept(id, addr(9003), true).unwrap();
    handler
        .complete_handshake(&id, &ProtocolMessage::Status(StatusPayload { protocol_version: 1, head: Hash::zero(), total_difficulty: Amount::zero() }))
        .unwrap();

    for _ in 0..100 {
        assert_eq!(handler.security().admit(id, RateLimitCategory::Block, Instant::now()), Decision::Admit);
    }
    let block = block_at(2);
    let msg = ProtocolMessage::NewBlock(networking::protocol::NewBlockPayload { block, total_difficulty: Amount::from_u64(1) });
    assert!(handler.handle_message(id, msg).await.is_err());
}

#[tokio::test]
async fn test_propagation_and_monitor_snapshot_reflect_peer_state() {
    let table = Arc::new(PeerTable::new(1024, 64));
    let propagator = BlockPropagator::new(4, 16, 1024);
    let monitor = NetworkMonitor::new();
    let discovery = PeerDiscovery::new("local".into(), 3, 100);
    let delay = NetworkDelayHandler::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.5);
    let security = SecurityManager::new(Instant::now());

    for port in [9100u16, 9101] {
        let peer = Peer::new(PeerId::random(), addr(port), 1, true, 1024, 64);
        table.register(peer).unwrap();
    }

    let block = block_at(1);
    propagator.propagate(&block, Amount::from_u64(1), &table, Instant::now());
    assert_eq!(propagator.tracked_count(), 1);

    let stats = monitor.collect(&table, &discovery, &propagator, &delay, &security, Instant::now());
    assert_eq!(stats.peer_count, 2);
    assert!(stats.warnings.is_empty());
}
