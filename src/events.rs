use libp2p::{Multiaddr, PeerId};

/// A peer found under the rendezvous key, yielded by a discovery query.
/// Consumed once to attempt a connection; not retained afterwards.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub peer_id: PeerId,
    /// Addresses learned for this peer so far; may be empty when only the
    /// identifier is known yet.
    pub addresses: Vec<Multiaddr>,
}

#[derive(Debug, Clone)]
pub enum NodeEvent {
    Started {
        peer_id: PeerId,
        listen_addrs: Vec<Multiaddr>,
    },
    NewListenAddr {
        address: Multiaddr,
    },
    PeerConnected {
        peer_id: PeerId,
        address: Multiaddr,
    },
    PeerDisconnected {
        peer_id: PeerId,
    },
}
