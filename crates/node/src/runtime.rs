// node/src/runtime.rs
use crate::NodeConfig;
use async_trait::async_trait;
use chain_types::{Block, Blockchain, PoolConfig, StakeAmount, Transaction, TransactionPool};
use consensus::adapter::{ABCIAdapter, ChainConfig, GenesisValidator};
use crypto::{Address, Hash};
use networking::handler::{BroadcastJob, ChainSink, P2PConfig, P2PHandler};
use networking::{BlockPropagator, NetworkDelayHandler, NetworkMonitor, NetworkResult, PeerDiscovery, PeerTable, SecurityManager};
use storage::{Database, DatabaseConfig, PruningMode};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};

/// Bridges the networking layer's narrow `ChainSink` seam onto the node's
/// owned `Blockchain`/`TransactionPool`, so `networking` never depends on
/// `chain-types`' state machine directly.
struct NodeChainSink {
    blockchain: Arc<RwLock<Blockchain>>,
    mempool: Arc<RwLock<TransactionPool>>,
}

#[async_trait]
impl ChainSink for NodeChainSink {
    async fn insert_block(&self, block: Block) -> NetworkResult<()> {
        let mut chain = self.blockchain.write().await;
        chain
            .add_block(block)
            .map_err(|e| networking::NetworkError::PeerError(e.to_string()))
    }

    async fn admit_tx(&self, tx: Transaction) -> NetworkResult<()> {
        let nonce = self.blockchain.read().await.state().get_nonce(&tx.from);
        let mut pool = self.mempool.write().await;
        pool.add(tx, nonce).map_err(|e| networking::NetworkError::PeerError(e.to_string()))
    }
}

fn load_validator_address(key_path: &str) -> anyhow::Result<Address> {
    let contents = std::fs::read_to_string(key_path)?;
    let json: serde_json::Value = serde_json::from_str(&contents)?;
    let address = json["address"].as_str().ok_or_else(|| anyhow::anyhow!("missing address in {}", key_path))?;
    Ok(Address::from_hex(address)?)
}

pub struct Node {
    config: NodeConfig,
    blockchain: Arc<RwLock<Blockchain>>,
    adapter: Arc<RwLock<ABCIAdapter>>,
    database: Arc<Database>,
    mempool: Arc<RwLock<TransactionPool>>,
    handler: Arc<P2PHandler>,
    broadcast_rx: tokio::sync::Mutex<Option<mpsc::Receiver<BroadcastJob>>>,
}

impl Node {
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        tracing::info!("Initializing node components");

        let pruning_mode = if config.storage.pruning == "archive" {
            PruningMode::Archive
        } else {
            PruningMode::Pruned { keep_blocks: config.storage.keep_blocks }
        };

        let db_config = DatabaseConfig {
            path: format!("{}/db", config.data_dir),
            cache_size: config.storage.cache_size_mb * 1024 * 1024,
            max_open_files: config.storage.max_open_files,
            pruning_mode,
            ..Default::default()
        };
        let database = Arc::new(Database::open(db_config)?);

        let genesis = Block::genesis(Hash::zero());
        let blockchain = Arc::new(RwLock::new(Blockchain::new(genesis)?));

        let min_stake = StakeAmount::from_u64(config.consensus.min_validator_stake);
        let mut adapter = ABCIAdapter::new(min_stake, config.consensus.max_validators);

        let genesis_validators = match database.get_validator_set()? {
            Some(_) => vec![],
            None => config
                .validator
                .as_ref()
                .filter(|v| v.auto_stake)
                .map(|v| {
                    let operator = load_validator_address(&v.key_path).unwrap_or_else(Address::zero);
                    vec![GenesisValidator {
                        operator,
                        pub_key: vec![],
                        amount: StakeAmount::from_u64(v.initial_stake),
                        description: Default::default(),
                        commission: v.commission_rate,
                    }]
                })
                .unwrap_or_default(),
        };
        adapter.init_chain(genesis_validators)?;
        let adapter = Arc::new(RwLock::new(adapter));

        let mempool = Arc::new(RwLock::new(TransactionPool::new(PoolConfig::default())));

        let sink: Arc<dyn ChainSink> = Arc::new(NodeChainSink { blockchain: blockchain.clone(), mempool: mempool.clone() });

        let table = Arc::new(PeerTable::new(config.network.known_cache_capacity, config.network.outbox_capacity));
        let security = Arc::new(SecurityManager::new(Instant::now()));
        let propagator = Arc::new(BlockPropagator::new(4, 16, config.network.known_cache_capacity));
        let delay = Arc::new(NetworkDelayHandler::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.5));
        let discovery = Arc::new(PeerDiscovery::new("local".into(), config.network.discovery_min_peers, config.network.discovery_target_peers));
        let monitor = Arc::new(NetworkMonitor::new());

        let p2p_config = P2PConfig {
            protocol_version: 1,
            max_queued_txs: config.network.max_queued_txs,
            max_queued_blocks: config.network.max_queued_blocks,
        };
        let (handler, broadcast_rx) = P2PHandler::new(p2p_config, table, security, propagator, delay, discovery, monitor, sink);

        tracing::info!("Node components initialized");

        Ok(Self {
            config,
            blockchain,
            adapter,
            database,
            mempool,
            handler: Arc::new(handler),
            broadcast_rx: tokio::sync::Mutex::new(Some(broadcast_rx)),
        })
    }

    pub async fn start(self: Arc<Self>) -> anyhow::Result<()> {
        tracing::info!("Starting Eirene node");

        let rx = self.broadcast_rx.lock().await.take().expect("start called once");
        P2PHandler::spawn_fanout_workers(self.handler.propagator().clone(), self.handler.table().clone(), rx);

        self.start_monitor_task();
        self.start_discovery_task();

        tracing::info!("------------------------------------------------");
        tracing::info!("Node is fully operational");
        tracing::info!("  Network:  {}", self.config.network.listen_addr);
        tracing::info!("  Data Dir: {}", self.config.data_dir);
        tracing::info!("------------------------------------------------");

        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!("Shutting down node...");
        self.database.compact()?;
        tracing::info!("Node shutdown complete");
        Ok(())
    }

    pub fn blockchain(&self) -> &Arc<RwLock<Blockchain>> {
        &self.blockchain
    }

    pub fn adapter(&self) -> &Arc<RwLock<ABCIAdapter>> {
        &self.adapter
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn mempool(&self) -> &Arc<RwLock<TransactionPool>> {
        &self.mempool
    }

    pub fn handler(&self) -> &Arc<P2PHandler> {
        &self.handler
    }

    // ==================== BACKGROUND TASKS ====================

    fn start_monitor_task(&self) {
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let mut ticker = interval(networking::monitor::MONITORING_INTERVAL);
            loop {
                ticker.tick().await;
                let stats = handler.monitor().collect(
                    handler.table(),
                    handler.discovery(),
                    handler.propagator(),
                    handler.delay(),
                    handler.security(),
                    std::time::Instant::now(),
                );
                for warning in &stats.warnings {
                    tracing::warn!("network: {}", warning);
                }
            }
        });
        tracing::info!("monitor task started");
    }

    fn start_discovery_task(&self) {
        let database = self.database.clone();
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                let state = adapter.read().await;
                if let Err(e) = database.store_validator_set(state.validator_set()) {
                    tracing::warn!("failed to persist validator set: {}", e);
                }
                if let Err(e) = database.store_reward_state(state.reward_state()) {
                    tracing::warn!("failed to persist reward state: {}", e);
                }
            }
        });
        tracing::info!("persistence task started");
    }

    // ==================== BLOCK PRODUCTION ====================

    pub async fn produce_block(&self) -> anyhow::Result<Block> {
        let max_block_bytes = self.config.consensus.block_max_bytes;
        let max_tx_count = 1000usize;

        let txs = self.mempool.read().await.get_pending(max_block_bytes, max_tx_count);
        tracing::debug!("selected {} transactions for block", txs.len());

        let blockchain = self.blockchain.read().await;
        let parent = blockchain.head_block().clone();
        let next_number = parent.number() + 1;
        let state_root = blockchain.state().state_root();
        drop(blockchain);

        let proposer = Address::zero();
        let block = Block::new(next_number, parent.hash(), state_root, proposer, txs, max_block_bytes)?;

        let mut adapter = self.adapter.write().await;
        adapter.begin_block(&block, &[proposer])?;
        for tx in &block.transactions {
            adapter.deliver_tx(tx)?;
        }
        let updates = adapter.end_block(block.number(), proposer)?;
        adapter.commit()?;
        tracing::debug!("validator updates after block #{}: {}", block.number(), updates.len());

        tracing::info!("block #{} produced with {} transactions", block.number(), block.transactions.len());
        Ok(block)
    }

    pub async fn handle_incoming_block(&self, block: Block) -> anyhow::Result<()> {
        self.database.store_block(&block)?;
        let mut chain = self.blockchain.write().await;
        chain.add_block(block)?;
        Ok(())
    }

    // ==================== TRANSACTION SUBMISSION ====================

    pub async fn submit_transaction(&self, tx: Transaction) -> anyhow::Result<serde_json::Value> {
        tx.validate_basic()?;

        let blockchain = self.blockchain.read().await;
        let sender_nonce = blockchain.state().get_nonce(&tx.from);
        drop(blockchain);

        if tx.nonce != sender_nonce {
            return Err(anyhow::anyhow!("invalid nonce: expected {}, got {}", sender_nonce, tx.nonce));
        }

        let mut pool = self.mempool.write().await;
        pool.add(tx.clone(), sender_nonce)?;
        let position = pool.pending_count();
        drop(pool);

        tracing::info!("transaction {} submitted to pool (pending: {})", tx.hash().to_hex(), position);

        Ok(serde_json::json!({
            "tx_hash": tx.hash().to_hex(),
            "pending_count": position,
        }))
    }

    pub async fn update_pool_config(&self, config: PoolConfig) -> anyhow::Result<()> {
        let mut pool = self.mempool.write().await;
        *pool = TransactionPool::new(config);
        tracing::info!("mempool configuration updated (pool reset)");
        Ok(())
    }

    // ==================== CONSENSUS CONFIG ====================

    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            block_max_bytes: self.config.consensus.block_max_bytes,
            min_validator_stake: StakeAmount::from_u64(self.config.consensus.min_validator_stake),
            max_validators: self.config.consensus.max_validators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &str) -> NodeConfig {
        NodeConfig { data_dir: dir.into(), ..Default::default() }
    }

    #[tokio::test]
    async fn test_node_creation() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_str().unwrap());
        let node = Node::new(config).unwrap();
        assert_eq!(node.blockchain.read().await.height(), 0);
    }

    #[tokio::test]
    async fn test_block_production_empty_pool() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_str().unwrap());
        let node = Node::new(config).unwrap();

        let block = node.produce_block().await.unwrap();
        assert_eq!(block.transactions.len(), 0);
        assert_eq!(block.number(), 1);
    }

    #[tokio::test]
    async fn test_submit_transaction_rejects_wrong_nonce() {
        use chain_types::{Amount, TransactionType};
        use crypto::{KeyPair, SignatureScheme};

        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path().to_str().unwrap());
        let node = Node::new(config).unwrap();

        let key = KeyPair::generate(SignatureScheme::Ed25519).unwrap();
        let mut tx = Transaction::new(
            key.public_key().to_address(),
            5,
            TransactionType::Transfer { to: Address::zero(), amount: Amount::from_u64(1) },
            1,
            21_000,
        );
        tx.signature = Some(key.sign(tx.hash().as_bytes()).unwrap());

        assert!(node.submit_transaction(tx).await.is_err());
    }
}
