// networking/src/security.rs

//! Reputation, rate-limit, and ban subsystem (spec §4.F). This is the
//! admission-control layer `P2PHandler` consults before trusting anything a
//! peer sends.

use crate::peer::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

const MAX_SCORE: i32 = 100;
const MIN_SCORE: i32 = -100;
const PROBATION_THRESHOLD: i32 = -30;
const BAN_THRESHOLD: i32 = -50;
const BAN_30D_THRESHOLD: i32 = -70;
const PERMANENT_BAN_THRESHOLD: i32 = -100;

const DELTA_GOOD: i32 = 1;
const DELTA_MINOR: i32 = -5;
const DELTA_MAJOR: i32 = -20;
const DELTA_CRITICAL: i32 = -50;

const DEFAULT_BAN_DURATION: Duration = Duration::from_secs(24 * 3600);
const ESCALATED_BAN_DURATION: Duration = Duration::from_secs(30 * 24 * 3600);
const REPEAT_VIOLATION_THRESHOLD: u32 = 5;
const RECOVERY_INTERVAL: Duration = Duration::from_secs(3600);
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const SYBIL_IP_PEER_THRESHOLD: usize = 10;
const ECLIPSE_SHARE_THRESHOLD: f64 = 0.25;

/// 15 tagged violation kinds (spec §4.F), each mapped to a severity class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    InvalidMessage,
    InvalidBlock,
    InvalidTx,
    InvalidHeader,
    InvalidBody,
    InvalidNodeData,
    InvalidReceipt,
    RateLimitExceeded,
    ProtocolViolation,
    DuplicateMessage,
    DdosAttempt,
    EclipseAttempt,
    SybilAttempt,
    Spamming,
    MaliciousData,
}

impl ViolationKind {
    fn delta(self) -> i32 {
        use ViolationKind::*;
        match self {
            DuplicateMessage | RateLimitExceeded => DELTA_MINOR,
            InvalidMessage | InvalidTx | InvalidHeader | InvalidBody | InvalidNodeData | InvalidReceipt | Spamming => DELTA_MAJOR,
            InvalidBlock | ProtocolViolation => DELTA_MAJOR,
            DdosAttempt | EclipseAttempt | SybilAttempt | MaliciousData => DELTA_CRITICAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitCategory {
    Message,
    Block,
    Tx,
    Header,
    Body,
    NodeData,
    Receipt,
}

impl RateLimitCategory {
    fn threshold(self) -> u32 {
        match self {
            Self::Message => 1000,
            Self::Block => 100,
            Self::Tx => 5000,
            Self::Header => 500,
            Self::Body => 100,
            Self::NodeData => 200,
            Self::Receipt => 200,
        }
    }
}

struct RateLimiter {
    counts: HashMap<RateLimitCategory, u32>,
    window_start: Instant,
}

impl RateLimiter {
    fn new(now: Instant) -> Self {
        Self { counts: HashMap::new(), window_start: now }
    }

    fn roll_if_expired(&mut self, now: Instant) {
        if now.duration_since(self.window_start) > RATE_LIMIT_WINDOW {
            self.counts.clear();
            self.window_start = now;
        }
    }

    /// `true` if the message is admitted; `false` if it exceeds the
    /// category threshold.
    fn check(&mut self, category: RateLimitCategory, now: Instant) -> bool {
        self.roll_if_expired(now);
        let count = self.counts.entry(category).or_insert(0);
        *count += 1;
        *count <= category.threshold()
    }
}

struct Reputation {
    score: i32,
    first_seen: Instant,
    last_seen: Instant,
    last_update: Instant,
    violations: HashMap<ViolationKind, u32>,
    on_probation: bool,
    good_actions: u32,
    total_actions: u32,
}

impl Reputation {
    fn new(now: Instant) -> Self {
        Self {
            score: 0,
            first_seen: now,
            last_seen: now,
            last_update: now,
            violations: HashMap::new(),
            on_probation: false,
            good_actions: 0,
            total_actions: 0,
        }
    }

    fn apply(&mut self, delta: i32, now: Instant) {
        self.score = (self.score + delta).clamp(MIN_SCORE, MAX_SCORE);
        self.last_update = now;
        self.last_seen = now;
        self.on_probation = self.score <= PROBATION_THRESHOLD;
    }
}

#[derive(Debug, Clone)]
pub struct BanRecord {
    pub reason: String,
    pub ban_time: Instant,
    pub expiry_time: Instant,
    pub permanent: bool,
    pub ban_count: u32,
    pub ip: Option<IpAddr>,
}

impl BanRecord {
    pub fn is_active(&self, now: Instant) -> bool {
        self.permanent || now < self.expiry_time
    }
}

struct Inner {
    reputations: HashMap<PeerId, Reputation>,
    ip_reputations: HashMap<IpAddr, Reputation>,
    ip_peers: HashMap<IpAddr, Vec<PeerId>>,
    peer_ip: HashMap<PeerId, IpAddr>,
    rate_limiters: HashMap<PeerId, RateLimiter>,
    bans: HashMap<PeerId, BanRecord>,
    ip_bans: HashMap<IpAddr, BanRecord>,
    trusted: std::collections::HashSet<PeerId>,
    last_recovery: Instant,
    last_eclipse_check: Instant,
}

/// Reputation, rate-limit, ban, and aggregate-attack-heuristic subsystem.
pub struct SecurityManager {
    inner: RwLock<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    RejectRateLimit,
    RejectBanned,
}

impl SecurityManager {
    pub fn new(now: Instant) -> Self {
        Self {
            inner: RwLock::new(Inner {
                reputations: HashMap::new(),
                ip_reputations: HashMap::new(),
                ip_peers: HashMap::new(),
                peer_ip: HashMap::new(),
                rate_limiters: HashMap::new(),
                bans: HashMap::new(),
                ip_bans: HashMap::new(),
                trusted: std::collections::HashSet::new(),
                last_recovery: now,
                last_eclipse_check: now,
            }),
        }
    }

    pub fn trust(&self, id: PeerId) {
        self.inner.write().trusted.insert(id);
    }

    pub fn register_peer(&self, id: PeerId, ip: IpAddr, now: Instant) {
        let mut inner = self.inner.write();
        inner.reputations.entry(id).or_insert_with(|| Reputation::new(now));
        inner.ip_reputations.entry(ip).or_insert_with(|| Reputation::new(now));
        inner.peer_ip.insert(id, ip);
        inner.ip_peers.entry(ip).or_default().push(id);
    }

    pub fn score(&self, id: &PeerId) -> i32 {
        self.inner.read().reputations.get(id).map(|r| r.score).unwrap_or(0)
    }

    pub fn is_on_probation(&self, id: &PeerId) -> bool {
        self.inner.read().reputations.get(id).map(|r| r.on_probation).unwrap_or(false)
    }

    pub fn is_banned(&self, id: &PeerId, now: Instant) -> bool {
        self.inner.read().bans.get(id).map(|b| b.is_active(now)).unwrap_or(false)
    }

    /// Records a violation, applying its severity delta, escalating on a
    /// per-type repeat count, and banning once the score drops low enough
    /// (spec §4.F, scenario S4).
    pub fn record_violation(&self, id: PeerId, kind: ViolationKind, now: Instant) {
        let mut inner = self.inner.write();
        if inner.trusted.contains(&id) {
            return;
        }
        let ip = inner.peer_ip.get(&id).copied();

        let rep = inner.reputations.entry(id).or_insert_with(|| Reputation::new(now));
        rep.total_actions += 1;
        rep.apply(kind.delta(), now);

        let escalate = {
            let repeat = rep.violations.entry(kind).or_insert(0);
            *repeat += 1;
            if *repeat >= REPEAT_VIOLATION_THRESHOLD {
                *repeat = 0;
                true
            } else {
                false
            }
        };
        if escalate {
            rep.apply(DELTA_MAJOR, now);
        }
        let score = rep.score;

        if score <= BAN_THRESHOLD {
            let duration = if score <= PERMANENT_BAN_THRESHOLD {
                Duration::ZERO
            } else if score <= BAN_30D_THRESHOLD {
                ESCALATED_BAN_DURATION
            } else {
                DEFAULT_BAN_DURATION
            };
            let permanent = score <= PERMANENT_BAN_THRESHOLD;
            let ban_count = inner.bans.get(&id).map(|b| b.ban_count + 1).unwrap_or(1);
            inner.bans.insert(
                id,
                BanRecord { reason: format!("{:?}", kind), ban_time: now, expiry_time: now + duration, permanent, ban_count, ip },
            );
        }

        if let Some(ip) = ip {
            let ip_rep = inner.ip_reputations.entry(ip).or_insert_with(|| Reputation::new(now));
            ip_rep.apply(kind.delta(), now);
            if ip_rep.score <= BAN_THRESHOLD {
                let ban_count = inner.ip_bans.get(&ip).map(|b| b.ban_count + 1).unwrap_or(1);
                let duration = DEFAULT_BAN_DURATION.mul_f64(ban_count as f64);
                inner.ip_bans.insert(ip, BanRecord { reason: "ip reputation".into(), ban_time: now, expiry_time: now + duration, permanent: false, ban_count, ip: Some(ip) });
            }
        }
    }

    pub fn record_good_action(&self, id: PeerId, now: Instant) {
        let mut inner = self.inner.write();
        let rep = inner.reputations.entry(id).or_insert_with(|| Reputation::new(now));
        rep.total_actions += 1;
        rep.good_actions += 1;
        rep.apply(DELTA_GOOD, now);
    }

    /// Admits or rejects one message in `category` from `id`, applying the
    /// 60s rolling rate-limit window; rejection also records a
    /// `RateLimitExceeded` violation (spec scenario S6).
    pub fn admit(&self, id: PeerId, category: RateLimitCategory, now: Instant) -> Decision {
        if self.is_banned(&id, now) {
            return Decision::RejectBanned;
        }
        let trusted = self.inner.read().trusted.contains(&id);
        if trusted {
            return Decision::Admit;
        }
        let admitted = {
            let mut inner = self.inner.write();
            let limiter = inner.rate_limiters.entry(id).or_insert_with(|| RateLimiter::new(now));
            limiter.check(category, now)
        };
        if admitted {
            Decision::Admit
        } else {
            self.record_violation(id, ViolationKind::RateLimitExceeded, now);
            Decision::RejectRateLimit
        }
    }

    /// Every hour: +1 toward max for every non-trusted peer; clears
    /// probation once score exceeds the threshold.
    pub fn recover(&self, now: Instant) {
        let mut inner = self.inner.write();
        if now.duration_since(inner.last_recovery) < RECOVERY_INTERVAL {
            return;
        }
        inner.last_recovery = now;
        let trusted = inner.trusted.clone();
        for (id, rep) in inner.reputations.iter_mut() {
            if trusted.contains(id) {
                continue;
            }
            rep.apply(DELTA_GOOD, now);
        }
    }

    /// Removes expired, non-permanent bans.
    pub fn cleanup_bans(&self, now: Instant) {
        let mut inner = self.inner.write();
        inner.bans.retain(|_, b| b.is_active(now));
        inner.ip_bans.retain(|_, b| b.is_active(now));
    }

    /// Number of peer bans currently active (permanent or not yet expired).
    pub fn active_ban_count(&self, now: Instant) -> usize {
        self.inner.read().bans.values().filter(|b| b.is_active(now)).count()
    }

    /// More than 10 peers sharing one IP.
    pub fn is_sybil(&self, ip: &IpAddr) -> bool {
        self.inner.read().ip_peers.get(ip).map(|peers| peers.len() > SYBIL_IP_PEER_THRESHOLD).unwrap_or(false)
    }

    /// Every 5 min: if any IP holds more than 25% of peers, penalize it.
    pub fn check_eclipse(&self, now: Instant) {
        let mut inner = self.inner.write();
        let total: usize = inner.ip_peers.values().map(|v| v.len()).sum();
        if total == 0 {
            return;
        }
        let flagged: Vec<IpAddr> = inner
            .ip_peers
            .iter()
            .filter(|(_, peers)| peers.len() as f64 / total as f64 > ECLIPSE_SHARE_THRESHOLD)
            .map(|(ip, _)| *ip)
            .collect();
        for ip in flagged {
            let rep = inner.ip_reputations.entry(ip).or_insert_with(|| Reputation::new(now));
            rep.apply(DELTA_CRITICAL, now);
        }
        inner.last_eclipse_check = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_ban_escalation_scenario_s4() {
        let now = Instant::now();
        let sec = SecurityManager::new(now);
        let id = PeerId::random();
        sec.register_peer(id, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), now);

        sec.record_violation(id, ViolationKind::ProtocolViolation, now);
        sec.record_violation(id, ViolationKind::ProtocolViolation, now);
        assert_eq!(sec.score(&id), -40);
        assert!(sec.is_on_probation(&id));
        assert!(!sec.is_banned(&id, now));

        sec.record_violation(id, ViolationKind::ProtocolViolation, now);
        assert_eq!(sec.score(&id), -60);
        assert!(sec.is_banned(&id, now));
    }

    #[test]
    fn test_rate_limit_scenario_s6() {
        let now = Instant::now();
        let sec = SecurityManager::new(now);
        let id = PeerId::random();
        sec.register_peer(id, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), now);

        for _ in 0..100 {
            assert_eq!(sec.admit(id, RateLimitCategory::Block, now), Decision::Admit);
        }
        assert_eq!(sec.admit(id, RateLimitCategory::Block, now), Decision::RejectRateLimit);
        assert_eq!(sec.score(&id), -5);
    }

    #[test]
    fn test_trusted_peer_bypasses_rate_limit() {
        let now = Instant::now();
        let sec = SecurityManager::new(now);
        let id = PeerId::random();
        sec.trust(id);
        for _ in 0..200 {
            assert_eq!(sec.admit(id, RateLimitCategory::Block, now), Decision::Admit);
        }
    }

    #[test]
    fn test_ban_expires() {
        let now = Instant::now();
        let sec = SecurityManager::new(now);
        let id = PeerId::random();
        sec.register_peer(id, IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), now);
        for _ in 0..3 {
            sec.record_violation(id, ViolationKind::ProtocolViolation, now);
        }
        assert!(sec.is_banned(&id, now));
        let later = now + DEFAULT_BAN_DURATION + Duration::from_secs(1);
        assert!(!sec.is_banned(&id, later));
    }

    #[test]
    fn test_sybil_heuristic() {
        let now = Instant::now();
        let sec = SecurityManager::new(now);
        let ip = IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9));
        for _ in 0..11 {
            sec.register_peer(PeerId::random(), ip, now);
        }
        assert!(sec.is_sybil(&ip));
    }
}
