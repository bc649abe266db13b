//! Startup orchestration: resolve identity, bind listeners, contact the
//! bootstrap peers, refresh the directory until it is queryable, advertise
//! the rendezvous key, then discover and connect peers indefinitely.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use tokio_util::compat::FuturesAsyncReadCompatExt;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::console::{LineInput, LineOutput};
use crate::directory::refresh_until_ready;
use crate::error::NodeError;
use crate::events::{DiscoveredPeer, NodeEvent};
use crate::identity::{self, LocalIdentity};
use crate::node::Node;
use crate::session::SessionManager;

const LISTEN_TIMEOUT: Duration = Duration::from_secs(5);
const REFRESH_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const REFRESH_MAX_ATTEMPTS: u32 = 5;
const REFRESH_BACKOFF: Duration = Duration::from_secs(10);
const DISCOVER_RESTART_DELAY: Duration = Duration::from_secs(10);

/// Startup phases, in order. Transitions are strictly sequential; a failure
/// in any phase except the internally retried refresh is fatal to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AddressesResolved,
    Listening,
    BootstrapConnected,
    DirectoryJoined,
    Refreshed,
    Advertised,
    Discovering,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::AddressesResolved => "addresses-resolved",
            Phase::Listening => "listening",
            Phase::BootstrapConnected => "bootstrap-connected",
            Phase::DirectoryJoined => "directory-joined",
            Phase::Refreshed => "refreshed",
            Phase::Advertised => "advertised",
            Phase::Discovering => "discovering",
        };
        f.write_str(name)
    }
}

/// Dry-run view of the effective configuration, without touching the
/// network.
#[derive(Debug)]
pub struct PreflightReport {
    pub listen_addresses: Vec<Multiaddr>,
    /// Derived from the key file; `None` means the node id will be random.
    pub peer_id: Option<PeerId>,
    /// Bootstrap peers after self-exclusion.
    pub bootstrap_peers: Vec<Multiaddr>,
}

pub struct BootstrapController {
    config: NodeConfig,
    input: Arc<dyn LineInput>,
    output: Arc<dyn LineOutput>,
}

impl BootstrapController {
    pub fn new(config: NodeConfig, input: Arc<dyn LineInput>, output: Arc<dyn LineOutput>) -> Self {
        Self { config, input, output }
    }

    /// Report the effective listen set, node id and bootstrap peers. With an
    /// ephemeral identity the node addresses cannot be known up front, so no
    /// self-exclusion is applied.
    pub fn preflight(config: &NodeConfig) -> Result<PreflightReport, NodeError> {
        let listen_addresses = config.listen_addresses()?;
        let peer_id = match &config.key_file {
            Some(path) => Some(identity::peer_id_for(path)?),
            None => None,
        };
        let ours: Vec<String> = match peer_id {
            Some(id) => listen_addresses
                .iter()
                .map(|addr| format!("{addr}/p2p/{id}"))
                .collect(),
            None => Vec::new(),
        };
        let bootstrap_peers = config.bootstrap_peers(&ours)?;
        Ok(PreflightReport { listen_addresses, peer_id, bootstrap_peers })
    }

    /// Run the node until a fatal error. The discovery loop never exits on
    /// its own; process termination is an external concern.
    pub async fn run(self) -> Result<(), NodeError> {
        let identity = LocalIdentity::resolve(self.config.key_file.as_deref())?;
        self.config.listen_addresses()?;
        info!(phase = %Phase::AddressesResolved, peer_id = %identity.peer_id, "resolved identity and listen set");

        let (node, mut events) = Node::start(&self.config, &identity).await?;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log_event(event);
            }
        });

        let bound = node.handle().await_listen_addrs(LISTEN_TIMEOUT).await?;
        let ours: Vec<String> = bound
            .iter()
            .map(|addr| format!("{addr}/p2p/{}", node.local_peer_id()))
            .collect();
        for addr in &ours {
            info!(%addr, "node address");
        }
        info!(phase = %Phase::Listening, "listeners bound");

        let bootstrap = self.config.bootstrap_peers(&ours)?;
        let handle = node.handle();
        handle.connect_bootstrap(bootstrap).await?;
        info!(phase = %Phase::BootstrapConnected, "bootstrap peers contacted");
        info!(phase = %Phase::DirectoryJoined, "directory joined");

        refresh_until_ready(
            &handle,
            REFRESH_ATTEMPT_TIMEOUT,
            REFRESH_MAX_ATTEMPTS,
            REFRESH_BACKOFF,
        )
        .await?;
        info!(phase = %Phase::Refreshed, "routing table ready");

        handle.advertise(&self.config.rendezvous).await?;
        info!(phase = %Phase::Advertised, rendezvous = %self.config.rendezvous, "announced ourselves");

        let protocol = StreamProtocol::try_from_owned(self.config.protocol_id.clone())
            .map_err(|e| {
                NodeError::Config(format!("invalid protocol id {}: {e}", self.config.protocol_id))
            })?;
        let sessions = SessionManager::new(self.input.clone(), self.output.clone());

        // Inbound connections: peers that discovered us open streams against
        // our listener; they get the same session treatment as outbound.
        let mut incoming = node.incoming_streams(protocol.clone())?;
        let inbound_sessions = sessions.clone();
        tokio::spawn(async move {
            while let Some((peer, stream)) = incoming.next().await {
                info!(%peer, "got a new inbound stream");
                inbound_sessions.spawn(peer, stream.compat()).await;
            }
        });

        info!(phase = %Phase::Discovering, "searching for other peers");
        let local_peer_id = node.local_peer_id();
        let control = node.control();
        loop {
            let mut found = handle.discover(&self.config.rendezvous).await?;
            consume_discoveries(&mut found, local_peer_id, &sessions, |peer| {
                let mut control = control.clone();
                let protocol = protocol.clone();
                let sessions = sessions.clone();
                async move {
                    let stream = control
                        .open_stream(peer.peer_id, protocol)
                        .await
                        .map_err(|e| NodeError::Connection(e.to_string()))?;
                    info!(peer_id = %peer.peer_id, "connected to peer");
                    sessions.spawn(peer.peer_id, stream.compat()).await;
                    Ok(())
                }
            })
            .await;
            // The provider search finished; start a fresh one after a pause.
            tokio::time::sleep(DISCOVER_RESTART_DELAY).await;
        }
    }
}

/// Drain one discovery stream, attempting a session for every eligible peer.
/// The local node and peers with a live session are filtered here; a failed
/// connection attempt is logged and skipped, never fatal to discovery.
async fn consume_discoveries<F, Fut>(
    found: &mut tokio::sync::mpsc::Receiver<DiscoveredPeer>,
    local_peer_id: PeerId,
    sessions: &SessionManager,
    mut connect: F,
) where
    F: FnMut(DiscoveredPeer) -> Fut,
    Fut: std::future::Future<Output = Result<(), NodeError>>,
{
    while let Some(peer) = found.recv().await {
        if peer.peer_id == local_peer_id {
            continue;
        }
        if sessions.contains(&peer.peer_id).await {
            continue;
        }
        debug!(peer_id = %peer.peer_id, addresses = ?peer.addresses, "connecting to discovered peer");
        let peer_id = peer.peer_id;
        if let Err(e) = connect(peer).await {
            warn!(%peer_id, error = %e, "connection failed, skipping peer");
        }
    }
}

fn log_event(event: NodeEvent) {
    match event {
        NodeEvent::Started { peer_id, .. } => info!(%peer_id, "host created"),
        NodeEvent::NewListenAddr { address } => debug!(%address, "new listen address"),
        NodeEvent::PeerConnected { peer_id, address } => {
            info!(%peer_id, %address, "peer connected")
        }
        NodeEvent::PeerDisconnected { peer_id } => info!(%peer_id, "peer disconnected"),
    }
}
