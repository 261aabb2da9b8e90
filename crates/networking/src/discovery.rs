// networking/src/discovery.rs

//! Bounded ledger of discovered nodes and the outbound dialing scheduler
//! (spec §4.C).

use crate::peer::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
pub const GC_MAX_AGE: Duration = Duration::from_secs(24 * 3600);
const MAX_GC_ATTEMPTS: u32 = 5;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(5);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);
const RETRY_BACKOFF_FACTOR: f64 = 1.5;
const BOOTNODE_SCORE: i32 = 10;
const SAME_REGION_BONUS: i32 = 5;

/// Coarse region classification, analogous to a GeoIP lookup. Private and
/// loopback ranges map to `"local"`; everything else buckets by first octet
/// as a stand-in for a real geo database.
pub fn classify_region(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            if v4.is_private() || v4.is_loopback() || v4.is_link_local() {
                "local".to_string()
            } else {
                format!("region-{}", v4.octets()[0] % 8)
            }
        }
        IpAddr::V6(v6) => {
            if v6.is_loopback() {
                "local".to_string()
            } else {
                "region-v6".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PeerQualityMetrics {
    pub latency: f64,
    pub uptime: f64,
    pub bandwidth: f64,
    pub reliability: f64,
}

impl PeerQualityMetrics {
    /// Combines the four inputs into a single 0..1 quality score with the
    /// fixed weights from spec §4.C.
    pub fn quality(&self) -> f64 {
        (0.3 * self.latency + 0.3 * self.uptime + 0.2 * self.bandwidth + 0.2 * self.reliability).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveredNode {
    pub id: PeerId,
    pub address: IpAddr,
    pub last_seen: Instant,
    pub attempts: u32,
    pub validated: bool,
    pub score: i32,
    pub region: String,
    pub next_retry: Instant,
}

impl DiscoveredNode {
    fn new(id: PeerId, address: IpAddr, region: String, now: Instant) -> Self {
        Self {
            id,
            address,
            last_seen: now,
            attempts: 0,
            validated: false,
            score: 0,
            region,
            next_retry: now,
        }
    }
}

struct Inner {
    known_nodes: HashMap<PeerId, DiscoveredNode>,
}

/// Discovered-node table plus the periodic dial scheduler (spec §4.C).
pub struct PeerDiscovery {
    inner: RwLock<Inner>,
    local_region: String,
    min_peers: usize,
    max_stored_nodes: usize,
}

/// Outcome of one `tick`: nodes selected for an outbound dial this round.
pub struct DialPlan {
    pub candidates: Vec<PeerId>,
}

impl PeerDiscovery {
    pub fn new(local_region: String, min_peers: usize, max_stored_nodes: usize) -> Self {
        Self {
            inner: RwLock::new(Inner { known_nodes: HashMap::new() }),
            local_region,
            min_peers,
            max_stored_nodes,
        }
    }

    pub fn add_bootnode(&self, id: PeerId, address: IpAddr, now: Instant) {
        let region = classify_region(address);
        let mut node = DiscoveredNode::new(id, address, region, now);
        node.validated = true;
        node.score = BOOTNODE_SCORE;
        self.inner.write().known_nodes.insert(id, node);
    }

    pub fn observe(&self, id: PeerId, address: IpAddr, now: Instant) {
        let mut inner = self.inner.write();
        let region = classify_region(address);
        let same_region = region == self.local_region;
        let entry = inner
            .known_nodes
            .entry(id)
            .or_insert_with(|| DiscoveredNode::new(id, address, region, now));
        entry.last_seen = now;
        if same_region {
            entry.score += SAME_REGION_BONUS;
        }
    }

    /// Re-derives a node's score from fresh quality metrics.
    pub fn record_quality(&self, id: &PeerId, metrics: &PeerQualityMetrics) {
        if let Some(node) = self.inner.write().known_nodes.get_mut(id) {
            let quality = metrics.quality();
            node.score = (quality * 10.0).round() as i32 - 5;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().known_nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, id: &PeerId) -> Option<DiscoveredNode> {
        self.inner.read().known_nodes.get(id).cloned()
    }

    /// Known-node count grouped by region, for the monitor's region spread
    /// warning.
    pub fn region_distribution(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for node in self.inner.read().known_nodes.values() {
            *counts.entry(node.region.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// One discovery-loop iteration: decides whether more peers are needed,
    /// ingests random + same-region nodes, and picks dial candidates.
    /// `random_nodes`/`region_nodes` stand in for a DHT lookup — the
    /// networking crate has no real DHT client, so callers supply the pool.
    pub fn tick(
        &self,
        live_peer_count: usize,
        connected: &[PeerId],
        random_nodes: &[(PeerId, IpAddr)],
        region_nodes: &[(PeerId, IpAddr)],
        now: Instant,
    ) -> DialPlan {
        if live_peer_count >= 2 * self.min_peers {
            return DialPlan { candidates: vec![] };
        }
        let needed = (self.min_peers.saturating_sub(live_peer_count)).max(1);

        for (id, addr) in random_nodes.iter().take(2 * needed) {
            self.observe(*id, *addr, now);
        }
        for (id, addr) in region_nodes.iter().filter(|(_, a)| classify_region(*a) == self.local_region).take(needed) {
            self.observe(*id, *addr, now);
        }

        let candidates = self.select_candidates(needed, connected, now);
        self.gc(now);
        DialPlan { candidates }
    }

    fn select_candidates(&self, count: usize, connected: &[PeerId], now: Instant) -> Vec<PeerId> {
        let mut inner = self.inner.write();
        let mut pool: Vec<&mut DiscoveredNode> = inner
            .known_nodes
            .values_mut()
            .filter(|n| !connected.contains(&n.id) && now >= n.next_retry)
            .collect();
        pool.sort_by(|a, b| b.score.cmp(&a.score));

        let local_quota = (count as f64 * 0.3).ceil() as usize;
        let mut chosen: Vec<PeerId> = Vec::with_capacity(count);

        let (mut locals, mut remotes): (Vec<&mut DiscoveredNode>, Vec<&mut DiscoveredNode>) =
            pool.into_iter().partition(|n| n.region == self.local_region);

        for n in locals.iter_mut().take(local_quota.min(count)) {
            chosen.push(n.id);
            bump_retry(n, now);
        }
        let remaining = count.saturating_sub(chosen.len());
        for n in remotes.iter_mut().take(remaining) {
            chosen.push(n.id);
            bump_retry(n, now);
        }
        let shortfall = count.saturating_sub(chosen.len());
        if shortfall > 0 {
            for n in locals.iter_mut().skip(local_quota.min(chosen.len())).take(shortfall) {
                chosen.push(n.id);
                bump_retry(n, now);
            }
        }
        chosen
    }

    /// Evicts stale or persistently bad nodes, then trims to capacity by
    /// score.
    fn gc(&self, now: Instant) {
        let mut inner = self.inner.write();
        inner.known_nodes.retain(|_, n| {
            let stale = now.duration_since(n.last_seen) > GC_MAX_AGE;
            let bad = n.attempts > MAX_GC_ATTEMPTS && n.score < 0;
            !(stale || bad)
        });
        if inner.known_nodes.len() > self.max_stored_nodes {
            let mut ids: Vec<(PeerId, i32)> = inner.known_nodes.iter().map(|(id, n)| (*id, n.score)).collect();
            ids.sort_by(|a, b| b.1.cmp(&a.1));
            let keep: std::collections::HashSet<PeerId> = ids.into_iter().take(self.max_stored_nodes).map(|(id, _)| id).collect();
            inner.known_nodes.retain(|id, _| keep.contains(id));
        }
    }
}

fn bump_retry(node: &mut DiscoveredNode, now: Instant) {
    node.attempts += 1;
    let backoff = INITIAL_RETRY_DELAY.mul_f64(RETRY_BACKOFF_FACTOR.powi(node.attempts as i32 - 1));
    node.next_retry = now + backoff.min(MAX_RETRY_DELAY);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_private_ip_is_local_region() {
        assert_eq!(classify_region(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))), "local");
    }

    #[test]
    fn test_bootnode_auto_validated_with_bonus_score() {
        let disc = PeerDiscovery::new("local".into(), 3, 100);
        let id = PeerId::random();
        disc.add_bootnode(id, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), Instant::now());
        let node = disc.node(&id).unwrap();
        assert!(node.validated);
        assert_eq!(node.score, BOOTNODE_SCORE);
    }

    #[test]
    fn test_tick_skips_when_peer_count_sufficient() {
        let disc = PeerDiscovery::new("local".into(), 3, 100);
        let plan = disc.tick(6, &[], &[], &[], Instant::now());
        assert!(plan.candidates.is_empty());
    }

    #[test]
    fn test_gc_evicts_stale_nodes() {
        let disc = PeerDiscovery::new("local".into(), 3, 100);
        let id = PeerId::random();
        let long_ago = Instant::now() - Duration::from_secs(25 * 3600);
        disc.observe(id, IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), long_ago);
        disc.gc(Instant::now());
        assert!(disc.node(&id).is_none());
    }

    #[test]
    fn test_retry_backoff_grows_with_attempts() {
        let disc = PeerDiscovery::new("local".into(), 5, 100);
        let id = PeerId::random();
        let now = Instant::now();
        disc.observe(id, IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), now);
        let first = disc.select_candidates(1, &[], now);
        assert_eq!(first, vec![id]);
        let node = disc.node(&id).unwrap();
        assert_eq!(node.attempts, 1);
        assert!(node.next_retry > now);
    }
}
