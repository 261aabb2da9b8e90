// networking/src/monitor.rs

//! Periodic aggregator of KnownCache/PeerTable/Discovery/Delay/Propagator/
//! Security state into a stats snapshot (spec §4.G).

use crate::delay::NetworkDelayHandler;
use crate::discovery::PeerDiscovery;
use crate::peer::PeerTable;
use crate::propagator::BlockPropagator;
use crate::security::SecurityManager;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const MONITORING_INTERVAL: Duration = Duration::from_secs(10);
pub const STATS_STORAGE_INTERVAL: Duration = Duration::from_secs(3600);
pub const STATS_RETENTION_PERIOD: Duration = Duration::from_secs(7 * 24 * 3600);
pub const MAX_STORED_STATS: usize = 168;
const MAX_IN_MEMORY_SNAPSHOTS: usize = 1000;

const LOW_PEER_THRESHOLD: usize = 3;
const LOW_PROPAGATION_SUCCESS_THRESHOLD: f64 = 0.8;
const HIGH_LATENCY_THRESHOLD_MS: u128 = 2000;
const REGION_IMBALANCE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkStats {
    pub timestamp: u64,
    pub peer_count: usize,
    pub inbound_count: usize,
    pub outbound_count: usize,
    pub region_distribution: HashMap<String, usize>,
    pub propagation_avg_ms: f64,
    pub propagation_max_ms: f64,
    pub propagation_success_rate: f64,
    pub latency_avg_ms: f64,
    pub latency_max_ms: f64,
    pub partition_risk: f64,
    pub banned_peer_count: usize,
    pub warnings: Vec<String>,
}

struct Inner {
    snapshots: Vec<NetworkStats>,
    last_persisted: Option<u64>,
}

/// Periodic stats aggregator over the other networking components.
pub struct NetworkMonitor {
    inner: RwLock<Inner>,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

impl NetworkMonitor {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner { snapshots: Vec::new(), last_persisted: None }),
        }
    }

    /// Builds one snapshot from the current state of the other components
    /// and appends it, trimming to `MAX_IN_MEMORY_SNAPSHOTS`.
    pub fn collect(
        &self,
        table: &PeerTable,
        discovery: &PeerDiscovery,
        propagator: &BlockPropagator,
        delay: &NetworkDelayHandler,
        security: &SecurityManager,
        now: std::time::Instant,
    ) -> NetworkStats {
        let peer_count = table.len();
        let (inbound_count, outbound_count) = table.inbound_outbound_counts();
        let region_distribution = discovery.region_distribution();
        let (propagation_avg_ms, propagation_max_ms) = propagator.propagation_latency_ms();
        let propagation_success_rate = propagator.propagation_success_rate();
        let (latency_avg_ms, latency_max_ms) = delay.network_latency_ms();
        let banned_peer_count = security.active_ban_count(now);
        let partition_risk = delay.partition_risk();

        let mut warnings = Vec::new();
        if peer_count < LOW_PEER_THRESHOLD {
            warnings.push(format!("low peer count: {}", peer_count));
        }
        if let Some((region, count)) = region_distribution.iter().max_by_key(|(_, c)| **c) {
            if peer_count > 0 && *count as f64 / peer_count as f64 > REGION_IMBALANCE_THRESHOLD {
                warnings.push(format!("region imbalance: {} holds {} of {} peers", region, count, peer_count));
            }
        }
        if propagation_success_rate < LOW_PROPAGATION_SUCCESS_THRESHOLD {
            warnings.push(format!("low propagation success rate: {:.2}", propagation_success_rate));
        }
        if latency_avg_ms > HIGH_LATENCY_THRESHOLD_MS as f64 {
            warnings.push(format!("high average latency: {:.0}ms", latency_avg_ms));
        }
        if partition_risk > 0.5 {
            warnings.push(format!("network partition risk: {:.2}", partition_risk));
        }
        if banned_peer_count > 0 {
            warnings.push(format!("{} banned peers", banned_peer_count));
        }

        let stats = NetworkStats {
            timestamp: now_unix(),
            peer_count,
            inbound_count,
            outbound_count,
            region_distribution,
            propagation_avg_ms,
            propagation_max_ms,
            propagation_success_rate,
            latency_avg_ms,
            latency_max_ms,
            partition_risk,
            banned_peer_count,
            warnings,
        };

        let mut inner = self.inner.write();
        inner.snapshots.push(stats.clone());
        if inner.snapshots.len() > MAX_IN_MEMORY_SNAPSHOTS {
            let overflow = inner.snapshots.len() - MAX_IN_MEMORY_SNAPSHOTS;
            inner.snapshots.drain(0..overflow);
        }
        stats
    }

    pub fn latest(&self) -> Option<NetworkStats> {
        self.inner.read().snapshots.last().cloned()
    }

    pub fn snapshots(&self) -> Vec<NetworkStats> {
        self.inner.read().snapshots.clone()
    }

    /// Serializes the in-memory snapshot history to JSON, as persisted at
    /// `<dataDir>/network_stats.json`.
    pub fn to_json(&self) -> Result<String, crate::NetworkError> {
        serde_json::to_string_pretty(&self.inner.read().snapshots).map_err(|e| crate::NetworkError::SerializationError(e.to_string()))
    }

    /// Loads a persisted snapshot history, dropping entries older than
    /// `STATS_RETENTION_PERIOD` and capping to `MAX_STORED_STATS`.
    pub fn load_json(&self, json: &str) -> Result<(), crate::NetworkError> {
        let mut snapshots: Vec<NetworkStats> = serde_json::from_str(json).map_err(|e| crate::NetworkError::SerializationError(e.to_string()))?;
        let now = now_unix();
        let retention_secs = STATS_RETENTION_PERIOD.as_secs();
        snapshots.retain(|s| now.saturating_sub(s.timestamp) < retention_secs);
        if snapshots.len() > MAX_STORED_STATS {
            let overflow = snapshots.len() - MAX_STORED_STATS;
            snapshots.drain(0..overflow);
        }
        self.inner.write().snapshots = snapshots;
        Ok(())
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_flags_low_peer_count() {
        let monitor = NetworkMonitor::new();
        let table = PeerTable::new(1024, 64);
        let discovery = PeerDiscovery::new("local".into(), 3, 100);
        let propagator = BlockPropagator::new(4, 16, 1024);
        let delay = NetworkDelayHandler::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.5);
        let security = SecurityManager::new(std::time::Instant::now());

        let stats = monitor.collect(&table, &discovery, &propagator, &delay, &security, std::time::Instant::now());
        assert!(stats.warnings.iter().any(|w| w.contains("low peer count")));
    }

    #[test]
    fn test_load_json_drops_stale_entries() {
        let monitor = NetworkMonitor::new();
        let stale = NetworkStats { timestamp: 0, ..Default::default() };
        let json = serde_json::to_string(&vec![stale]).unwrap();
        monitor.load_json(&json).unwrap();
        assert!(monitor.snapshots().is_empty());
    }

    #[test]
    fn test_snapshot_cap_in_memory() {
        let monitor = NetworkMonitor::new();
        let table = PeerTable::new(1024, 64);
        let discovery = PeerDiscovery::new("local".into(), 3, 100);
        let propagator = BlockPropagator::new(4, 16, 1024);
        let delay = NetworkDelayHandler::new(Duration::from_secs(1), Duration::from_secs(30), 2.0, 0.5);
        let security = SecurityManager::new(std::time::Instant::now());

        for _ in 0..(MAX_IN_MEMORY_SNAPSHOTS + 10) {
            monitor.collect(&table, &discovery, &propagator, &delay, &security, std::time::Instant::now());
        }
        assert_eq!(monitor.snapshots().len(), MAX_IN_MEMORY_SNAPSHOTS);
    }
}
