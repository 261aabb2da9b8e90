// node/src/config.rs
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: String,
    pub network: NetworkConfig,
    pub consensus: ConsensusConfig,
    pub storage: StorageConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<ValidatorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_addr: SocketAddr,
    pub max_peers: usize,
    pub bootstrap_peers: Vec<String>,
    pub known_cache_capacity: usize,
    pub outbox_capacity: usize,
    pub discovery_min_peers: usize,
    pub discovery_target_peers: usize,
    pub max_queued_txs: usize,
    pub max_queued_blocks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub block_max_bytes: u64,
    pub min_validator_stake: u64,
    pub max_validators: usize,
    pub block_time_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub cache_size_mb: usize,
    pub max_open_files: i32,
    pub pruning: String, // "archive" or "pruned"
    pub keep_blocks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub key_path: String,
    pub commission_rate: u16,
    pub auto_stake: bool,
    pub initial_stake: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            network: NetworkConfig {
                listen_addr: "0.0.0.0:30303".parse().unwrap(),
                max_peers: 50,
                bootstrap_peers: vec![],
                known_cache_capacity: 4096,
                outbox_capacity: 1024,
                discovery_min_peers: 8,
                discovery_target_peers: 25,
                max_queued_txs: 4096,
                max_queued_blocks: 1024,
            },
            consensus: ConsensusConfig {
                block_max_bytes: 4 * 1024 * 1024,
                min_validator_stake: 10_000,
                max_validators: 100,
                block_time_seconds: 3,
            },
            storage: StorageConfig {
                cache_size_mb: 512,
                max_open_files: 1024,
                pruning: "pruned".into(),
                keep_blocks: 10_000,
            },
            validator: None,
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.consensus.min_validator_stake, 10_000);
        assert_eq!(config.network.max_queued_txs, 4096);
        assert_eq!(config.network.max_queued_blocks, 1024);
        assert!(config.validator.is_none());
    }

    #[test]
    fn test_round_trip_toml() {
        let config = NodeConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: NodeConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.network.listen_addr, config.network.listen_addr);
        assert_eq!(parsed.consensus.max_validators, config.consensus.max_validators);
    }
}
