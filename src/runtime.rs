use std::collections::{HashMap, HashSet};

use futures::StreamExt;
use libp2p::core::ConnectedPoint;
use libp2p::kad::{self, GetProvidersOk, ProgressStep, QueryId, QueryResult, RecordKey};
use libp2p::swarm::SwarmEvent;
use libp2p::{identify, Multiaddr, PeerId, Swarm};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::behaviour::{ChatBehaviour, ChatBehaviourEvent};
use crate::command::Command;
use crate::error::NodeError;
use crate::events::{DiscoveredPeer, NodeEvent};

struct PeerState {
    addresses: Vec<Multiaddr>,
}

/// One in-flight provider search: the channel its peers are fed into, plus
/// the set already yielded so a peer is reported once per query.
struct Discovery {
    tx: mpsc::Sender<DiscoveredPeer>,
    seen: HashSet<PeerId>,
}

pub struct Runtime {
    swarm: Swarm<ChatBehaviour>,
    command_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<NodeEvent>,

    // State
    peers: HashMap<PeerId, PeerState>,
    pending_refresh: HashMap<QueryId, oneshot::Sender<Result<(), NodeError>>>,
    pending_advertise: HashMap<QueryId, oneshot::Sender<Result<(), NodeError>>>,
    discoveries: HashMap<QueryId, Discovery>,
}

impl Runtime {
    pub fn new(
        swarm: Swarm<ChatBehaviour>,
        command_rx: mpsc::Receiver<Command>,
        event_tx: mpsc::Sender<NodeEvent>,
    ) -> Self {
        Self {
            swarm,
            command_rx,
            event_tx,
            peers: HashMap::new(),
            pending_refresh: HashMap::new(),
            pending_advertise: HashMap::new(),
            discoveries: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        let local_peer_id = *self.swarm.local_peer_id();
        let listen_addrs: Vec<Multiaddr> = self.swarm.listeners().cloned().collect();

        let _ = self
            .event_tx
            .send(NodeEvent::Started { peer_id: local_peer_id, listen_addrs })
            .await;

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(c).await,
                        None => {
                            info!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::ConnectBootstrap { peers, respond_to } => {
                for addr in peers {
                    if let Some(peer_id) = extract_peer_id(&addr) {
                        self.swarm.behaviour_mut().kad.add_address(&peer_id, addr.clone());
                    }
                    if let Err(e) = self.swarm.dial(addr.clone()) {
                        warn!(%addr, error = %e, "failed to dial bootstrap peer");
                    }
                }
                let _ = respond_to.send(Ok(()));
            }
            Command::Refresh { respond_to } => {
                match self.swarm.behaviour_mut().kad.bootstrap() {
                    Ok(id) => {
                        self.pending_refresh.insert(id, respond_to);
                    }
                    Err(e) => {
                        let _ = respond_to.send(Err(NodeError::DirectoryTransient(e.to_string())));
                    }
                }
            }
            Command::Advertise { key, respond_to } => {
                match self.swarm.behaviour_mut().kad.start_providing(RecordKey::new(&key)) {
                    Ok(id) => {
                        self.pending_advertise.insert(id, respond_to);
                    }
                    Err(e) => {
                        let _ = respond_to
                            .send(Err(NodeError::Bootstrap(format!("advertise failed: {e}"))));
                    }
                }
            }
            Command::Discover { key, respond_to } => {
                let id = self.swarm.behaviour_mut().kad.get_providers(RecordKey::new(&key));
                let (tx, rx) = mpsc::channel(64);
                self.discoveries.insert(id, Discovery { tx, seen: HashSet::new() });
                let _ = respond_to.send(rx);
            }
            Command::ListenAddrs { respond_to } => {
                let _ = respond_to.send(self.swarm.listeners().cloned().collect());
            }
            Command::ConnectedPeers { respond_to } => {
                let _ = respond_to.send(self.peers.keys().copied().collect());
            }
            Command::Shutdown { respond_to } => {
                let _ = respond_to.send(());
                // Allow the select! loop to exit
                self.command_rx.close();
            }
        }
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<ChatBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, "listening");
                let _ = self.event_tx.send(NodeEvent::NewListenAddr { address }).await;
            }
            SwarmEvent::Behaviour(ChatBehaviourEvent::Kad(kad::Event::OutboundQueryProgressed {
                id,
                result,
                step,
                ..
            })) => {
                self.handle_query_progress(id, result, step).await;
            }
            SwarmEvent::Behaviour(ChatBehaviourEvent::Kad(kad::Event::RoutingUpdated {
                peer,
                ..
            })) => {
                debug!(%peer, "directory peer added");
            }
            SwarmEvent::Behaviour(ChatBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                // Feed learned addresses back into Kademlia.
                for addr in &info.listen_addrs {
                    self.swarm.behaviour_mut().kad.add_address(&peer_id, addr.clone());
                }
                self.peers
                    .entry(peer_id)
                    .or_insert_with(|| PeerState { addresses: Vec::new() })
                    .addresses = info.listen_addrs;
            }
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                let address = match endpoint {
                    ConnectedPoint::Dialer { address, .. } => address,
                    ConnectedPoint::Listener { send_back_addr, .. } => send_back_addr,
                };
                self.peers
                    .entry(peer_id)
                    .or_insert_with(|| PeerState { addresses: Vec::new() })
                    .addresses
                    .push(address.clone());
                let _ = self
                    .event_tx
                    .send(NodeEvent::PeerConnected { peer_id, address })
                    .await;
            }
            SwarmEvent::ConnectionClosed { peer_id, num_established, .. } => {
                if num_established == 0 {
                    self.peers.remove(&peer_id);
                    let _ = self.event_tx.send(NodeEvent::PeerDisconnected { peer_id }).await;
                }
            }
            _ => {}
        }
    }

    async fn handle_query_progress(&mut self, id: QueryId, result: QueryResult, step: ProgressStep) {
        match result {
            QueryResult::Bootstrap(res) => match res {
                Ok(kad::BootstrapOk { peer, num_remaining }) => {
                    debug!(%peer, num_remaining, "routing table refresh progressed");
                    if step.last {
                        if let Some(tx) = self.pending_refresh.remove(&id) {
                            let _ = tx.send(Ok(()));
                        }
                    }
                }
                Err(e) => {
                    if let Some(tx) = self.pending_refresh.remove(&id) {
                        let _ = tx.send(Err(NodeError::DirectoryTransient(e.to_string())));
                    }
                }
            },
            QueryResult::StartProviding(res) => {
                if let Some(tx) = self.pending_advertise.remove(&id) {
                    let _ = tx.send(match res {
                        Ok(kad::AddProviderOk { .. }) => Ok(()),
                        Err(e) => Err(NodeError::Bootstrap(format!("advertise failed: {e}"))),
                    });
                }
            }
            QueryResult::GetProviders(res) => {
                match res {
                    Ok(GetProvidersOk::FoundProviders { providers, .. }) => {
                        let (fresh, tx) = match self.discoveries.get_mut(&id) {
                            Some(d) => {
                                let fresh: Vec<PeerId> = providers
                                    .into_iter()
                                    .filter(|p| d.seen.insert(*p))
                                    .collect();
                                (fresh, d.tx.clone())
                            }
                            None => return,
                        };
                        for peer_id in fresh {
                            let addresses = self
                                .peers
                                .get(&peer_id)
                                .map(|s| s.addresses.clone())
                                .unwrap_or_default();
                            debug!(%peer_id, "peer found under rendezvous key");
                            if tx.send(DiscoveredPeer { peer_id, addresses }).await.is_err() {
                                // Consumer stopped iterating.
                                self.discoveries.remove(&id);
                                return;
                            }
                        }
                    }
                    Ok(GetProvidersOk::FinishedWithNoAdditionalRecord { .. }) => {}
                    Err(e) => debug!(error = %e, "provider search failed"),
                }
                if step.last {
                    // Dropping the sender closes the discovery stream.
                    self.discoveries.remove(&id);
                }
            }
            _ => {}
        }
    }
}

fn extract_peer_id(ma: &Multiaddr) -> Option<PeerId> {
    use libp2p::core::multiaddr::Protocol;
    ma.iter().find_map(|p| match p {
        Protocol::P2p(id) => Some(id),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_peer_id_from_full_address() {
        let ma: Multiaddr =
            "/ip4/10.0.0.1/tcp/6666/p2p/12D3KooWDpJ7As7BWAwRMfu1VU2WCqNjvq387JEYKDBj4kx6nXTN"
                .parse()
                .unwrap();
        assert!(extract_peer_id(&ma).is_some());
    }

    #[test]
    fn extract_peer_id_absent_without_p2p_component() {
        let ma: Multiaddr = "/ip4/10.0.0.1/tcp/6666".parse().unwrap();
        assert_eq!(extract_peer_id(&ma), None);
    }
}
