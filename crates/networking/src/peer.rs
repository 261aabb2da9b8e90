// networking/src/peer.rs

use crate::known_cache::KnownCache;
use crate::protocol::{ProtocolMessage, StatusPayload};
use crate::{NetworkError, NetworkResult};
use chain_types::{Amount, Timestamp};
use crypto::Hash;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Peer identifier: a raw 32-byte key derived from the peer's public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let bytes: [u8; 32] = rng.gen();
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Why a peer left the table; surfaced to `SecurityManager`/logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Quitting,
    ProtocolViolation,
    Banned,
    Timeout,
    Requested,
}

fn current_timestamp() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// A registered protocol peer: connection metadata, per-peer de-dup caches,
/// and a bounded outbound queue (spec's `PeerRecord`).
pub struct Peer {
    pub id: PeerId,
    pub remote_addr: SocketAddr,
    pub protocol_version: u64,
    pub head: Hash,
    pub total_difficulty: Amount,
    pub known_txs: KnownCache,
    pub known_blocks: KnownCache,
    pub connected_at: Timestamp,
    pub last_seen: Timestamp,
    pub is_validator: bool,
    pub outbound: bool,
    outbox: Vec<ProtocolMessage>,
    outbox_capacity: usize,
}

impl Peer {
    pub fn new(
        id: PeerId,
        remote_addr: SocketAddr,
        protocol_version: u64,
        outbound: bool,
        known_cache_capacity: usize,
        outbox_capacity: usize,
    ) -> Self {
        let now = current_timestamp();
        Self {
            id,
            remote_addr,
            protocol_version,
            head: Hash::zero(),
            total_difficulty: Amount::zero(),
            known_txs: KnownCache::new(known_cache_capacity),
            known_blocks: KnownCache::new(known_cache_capacity),
            connected_at: now,
            last_seen: now,
            is_validator: false,
            outbound,
            outbox: Vec::new(),
            outbox_capacity,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = current_timestamp();
    }

    /// Enqueues a message for delivery. Full queues drop the new message
    /// with a debug log rather than blocking the caller (spec §5).
    fn enqueue(&mut self, msg: ProtocolMessage) {
        if self.outbox.len() >= self.outbox_capacity {
            tracing::debug!(peer = %self.id.to_hex(), "outbound queue full, dropping message");
            return;
        }
        self.outbox.push(msg);
    }

    pub fn drain_outbox(&mut self) -> Vec<ProtocolMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Marks the block as known before queuing the announcement, so a
    /// concurrent rebroadcast of the same hash is suppressed.
    pub fn send_new_block(&mut self, payload: crate::protocol::NewBlockPayload, hash: Hash) {
        self.known_blocks.add(hash);
        self.enqueue(ProtocolMessage::NewBlock(payload));
    }

    pub fn send_new_tx(&mut self, payload: crate::protocol::NewTxPayload, hashes: &[Hash]) {
        for h in hashes {
            self.known_txs.add(*h);
        }
        self.enqueue(ProtocolMessage::NewTx(payload));
    }

    pub fn send_validator_set(&mut self, payload: crate::protocol::ValidatorSetPayload) {
        self.enqueue(ProtocolMessage::ValidatorSet(payload));
    }

    pub fn send_vote(&mut self, payload: crate::protocol::OpaquePayload) {
        self.enqueue(ProtocolMessage::Vote(payload));
    }

    pub fn send_proposal(&mut self, payload: crate::protocol::OpaquePayload) {
        self.enqueue(ProtocolMessage::Proposal(payload));
    }

    pub fn send_evidence(&mut self, payload: crate::protocol::OpaquePayload) {
        self.enqueue(ProtocolMessage::Evidence(payload));
    }

    pub fn send_status(&mut self, payload: StatusPayload) {
        self.enqueue(ProtocolMessage::Status(payload));
    }

    pub fn send_ping(&mut self) {
        self.enqueue(ProtocolMessage::Ping);
    }

    pub fn send_pong(&mut self) {
        self.enqueue(ProtocolMessage::Pong);
    }
}

struct Inner {
    peers: HashMap<PeerId, Peer>,
}

/// The set of live protocol peers: registration, handshake, and
/// snapshot queries for the propagator (spec §4.B).
pub struct PeerTable {
    inner: RwLock<Inner>,
    known_cache_capacity: usize,
    outbox_capacity: usize,
}

impl PeerTable {
    pub fn new(known_cache_capacity: usize, outbox_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner { peers: HashMap::new() }),
            known_cache_capacity,
            outbox_capacity,
        }
    }

    pub fn known_cache_capacity(&self) -> usize {
        self.known_cache_capacity
    }

    pub fn outbox_capacity(&self) -> usize {
        self.outbox_capacity
    }

    pub fn register(&self, peer: Peer) -> NetworkResult<()> {
        let mut inner = self.inner.write();
        if inner.peers.contains_key(&peer.id) {
            return Err(NetworkError::PeerError(format!("{} already registered", peer.id.to_hex())));
        }
        inner.peers.insert(peer.id, peer);
        Ok(())
    }

    pub fn unregister(&self, id: &PeerId) -> NetworkResult<()> {
        let mut inner = self.inner.write();
        if inner.peers.remove(id).is_none() {
            return Err(NetworkError::PeerError(format!("{} not registered", id.to_hex())));
        }
        Ok(())
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.inner.read().peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (inbound_count, outbound_count) split of the current peer set.
    pub fn inbound_outbound_counts(&self) -> (usize, usize) {
        let outbound = self.inner.read().peers.values().filter(|p| p.outbound).count();
        let total = self.len();
        (total - outbound, outbound)
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.inner.read().peers.keys().copied().collect()
    }

    pub fn validators(&self) -> Vec<PeerId> {
        self.inner
            .read()
            .peers
            .values()
            .filter(|p| p.is_validator)
            .map(|p| p.id)
            .collect()
    }

    pub fn with_peer<R>(&self, id: &PeerId, f: impl FnOnce(&Peer) -> R) -> Option<R> {
        self.inner.read().peers.get(id).map(f)
    }

    pub fn with_peer_mut<R>(&self, id: &PeerId, f: impl FnOnce(&mut Peer) -> R) -> Option<R> {
        self.inner.write().peers.get_mut(id).map(f)
    }

    /// Peer with strictly greatest total difficulty; ties broken by
    /// whichever the table visits first (insertion order is not tracked).
    pub fn best_peer(&self) -> Option<PeerId> {
        self.inner
            .read()
            .peers
            .values()
            .max_by(|a, b| a.total_difficulty.inner().cmp(b.total_difficulty.inner()))
            .map(|p| p.id)
    }

    pub fn peers_without_tx(&self, h: &Hash) -> Vec<PeerId> {
        self.inner
            .read()
            .peers
            .values()
            .filter(|p| !p.known_txs.contains(h))
            .map(|p| p.id)
            .collect()
    }

    pub fn peers_without_block(&self, h: &Hash) -> Vec<PeerId> {
        self.inner
            .read()
            .peers
            .values()
            .filter(|p| !p.known_blocks.contains(h))
            .map(|p| p.id)
            .collect()
    }

    /// Validates a peer's handshake reply: must be `Status`, within the
    /// frame cap (enforced by the caller's decode step), and carry a
    /// matching protocol version. On success, records the peer's head/td.
    pub fn handshake(&self, id: &PeerId, local_protocol_version: u64, reply: &ProtocolMessage) -> NetworkResult<()> {
        let status = match reply {
            ProtocolMessage::Status(s) => s,
            _ => return Err(NetworkError::ProtocolError("expected Status as first message".into())),
        };
        if status.protocol_version != local_protocol_version {
            return Err(NetworkError::ProtocolError(format!(
                "protocol version mismatch: local {} remote {}",
                local_protocol_version, status.protocol_version
            )));
        }
        self.with_peer_mut(id, |p| {
            p.head = status.head;
            p.total_difficulty = status.total_difficulty.clone();
            p.touch();
        })
        .ok_or_else(|| NetworkError::PeerError(format!("{} not registered", id.to_hex())))
    }

    pub fn drain_outbox(&self, id: &PeerId) -> Vec<ProtocolMessage> {
        self.with_peer_mut(id, |p| p.drain_outbox()).unwrap_or_default()
    }

    /// Disconnects every peer with `Quitting`, clearing the table.
    pub fn close(&self) -> Vec<(PeerId, DisconnectReason)> {
        let mut inner = self.inner.write();
        let ids: Vec<PeerId> = inner.peers.keys().copied().collect();
        inner.peers.clear();
        ids.into_iter().map(|id| (id, DisconnectReason::Quitting)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StatusPayload;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080)
    }

    fn new_peer() -> Peer {
        Peer::new(PeerId::random(), addr(), 1, true, 1024, 64)
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let table = PeerTable::new(1024, 64);
        let peer = new_peer();
        let id = peer.id;
        table.register(peer).unwrap();

        let dup = Peer::new(id, addr(), 1, true, 1024, 64);
        assert!(table.register(dup).is_err());
    }

    #[test]
    fn test_unregister_missing_fails() {
        let table = PeerTable::new(1024, 64);
        assert!(table.unregister(&PeerId::random()).is_err());
    }

    #[test]
    fn test_handshake_requires_matching_version() {
        let table = PeerTable::new(1024, 64);
        let peer = new_peer();
        let id = peer.id;
        table.register(peer).unwrap();

        let bad = ProtocolMessage::Status(StatusPayload {
            protocol_version: 2,
            head: Hash::zero(),
            total_difficulty: Amount::zero(),
        });
        assert!(table.handshake(&id, 1, &bad).is_err());

        let good = ProtocolMessage::Status(StatusPayload {
            protocol_version: 1,
            head: Hash::zero(),
            total_difficulty: Amount::from_u64(5),
        });
        table.handshake(&id, 1, &good).unwrap();
        assert_eq!(table.with_peer(&id, |p| p.total_difficulty.clone()).unwrap(), Amount::from_u64(5));
    }

    #[test]
    fn test_best_peer_by_total_difficulty() {
        let table = PeerTable::new(1024, 64);
        let mut p1 = new_peer();
        p1.total_difficulty = Amount::from_u64(10);
        let mut p2 = new_peer();
        p2.total_difficulty = Amount::from_u64(20);
        let best_id = p2.id;
        table.register(p1).unwrap();
        table.register(p2).unwrap();

        assert_eq!(table.best_peer(), Some(best_id));
    }

    #[test]
    fn test_close_disconnects_all_with_quitting() {
        let table = PeerTable::new(1024, 64);
        table.register(new_peer()).unwrap();
        table.register(new_peer()).unwrap();

        let closed = table.close();
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|(_, reason)| *reason == DisconnectReason::Quitting));
        assert!(table.is_empty());
    }

    #[test]
    fn test_outbox_drop_on_full() {
        let mut peer = Peer::new(PeerId::random(), addr(), 1, true, 1024, 2);
        peer.send_ping();
        peer.send_ping();
        peer.send_ping();
        assert_eq!(peer.drain_outbox().len(), 2);
    }
}
