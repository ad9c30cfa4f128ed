use std::collections::{HashMap, HashSet};

use libp2p::{Multiaddr, PeerId};
use tracing::debug;

/// Tracks live connections and the best-known addresses for each peer,
/// fed by mDNS discovery, rendezvous records and identify.
#[derive(Debug, Default)]
pub struct PeerTracker {
    connected: HashSet<PeerId>,
    addresses: HashMap<PeerId, Vec<Multiaddr>>,
}

impl PeerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connected(&mut self, peer_id: PeerId, address: Multiaddr) {
        debug!(peer = %peer_id, addr = %address, "tracking peer connection");
        self.connected.insert(peer_id);
        self.add_address(peer_id, address);
    }

    pub fn on_disconnected(&mut self, peer_id: &PeerId) {
        if self.connected.remove(peer_id) {
            debug!(peer = %peer_id, "peer disconnected");
        }
    }

    pub fn add_address(&mut self, peer_id: PeerId, address: Multiaddr) {
        let addrs = self.addresses.entry(peer_id).or_default();
        if !addrs.contains(&address) {
            addrs.push(address);
            // Newest addresses first; cap the list so stale entries age out.
            if addrs.len() > 8 {
                addrs.remove(0);
            }
        }
    }

    pub fn addresses_of(&self, peer_id: &PeerId) -> Vec<Multiaddr> {
        self.addresses.get(peer_id).cloned().unwrap_or_default()
    }

    pub fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.connected.contains(peer_id)
    }

    pub fn connected_peers(&self) -> Vec<PeerId> {
        self.connected.iter().copied().collect()
    }

    pub fn peer_count(&self) -> usize {
        self.connected.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn connect_disconnect() {
        let mut tracker = PeerTracker::new();
        let peer = PeerId::random();

        assert!(!tracker.is_connected(&peer));
        tracker.on_connected(peer, addr("/ip4/127.0.0.1/udp/4001/quic-v1"));
        assert!(tracker.is_connected(&peer));
        assert_eq!(tracker.peer_count(), 1);

        tracker.on_disconnected(&peer);
        assert!(!tracker.is_connected(&peer));
        // Addresses survive a disconnect for the next dial.
        assert_eq!(tracker.addresses_of(&peer).len(), 1);
    }

    #[test]
    fn addresses_dedupe() {
        let mut tracker = PeerTracker::new();
        let peer = PeerId::random();
        tracker.add_address(peer, addr("/ip4/10.0.0.1/tcp/4001"));
        tracker.add_address(peer, addr("/ip4/10.0.0.1/tcp/4001"));
        tracker.add_address(peer, addr("/ip4/10.0.0.2/tcp/4001"));
        assert_eq!(tracker.addresses_of(&peer).len(), 2);
    }
}
