use libp2p::{Multiaddr, PeerId};
use tokio::sync::{mpsc, oneshot};

use crate::error::NodeError;
use crate::events::DiscoveredPeer;

#[derive(Debug)]
pub enum Command {
    /// Seed the routing table with the bootstrap peers and dial them. An
    /// individual dial failure is logged, not returned.
    ConnectBootstrap {
        peers: Vec<Multiaddr>,
        respond_to: oneshot::Sender<Result<(), NodeError>>,
    },

    /// Run one routing-table refresh; resolves when the query finishes.
    Refresh {
        respond_to: oneshot::Sender<Result<(), NodeError>>,
    },

    /// Advertise this node under the rendezvous key.
    Advertise {
        key: String,
        respond_to: oneshot::Sender<Result<(), NodeError>>,
    },

    /// Start a provider search for the rendezvous key. The receiver yields
    /// peers lazily and closes when the query finishes; re-invoke to
    /// restart.
    Discover {
        key: String,
        respond_to: oneshot::Sender<mpsc::Receiver<DiscoveredPeer>>,
    },

    ListenAddrs {
        respond_to: oneshot::Sender<Vec<Multiaddr>>,
    },

    ConnectedPeers {
        respond_to: oneshot::Sender<Vec<PeerId>>,
    },

    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}
