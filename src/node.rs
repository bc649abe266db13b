use std::time::Duration;

use libp2p::{noise, tcp, yamux, Multiaddr, PeerId, StreamProtocol, SwarmBuilder};
use libp2p_stream as stream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::warn;

use crate::behaviour::ChatBehaviour;
use crate::command::Command;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::events::{DiscoveredPeer, NodeEvent};
use crate::identity::LocalIdentity;
use crate::runtime::Runtime;

/// A joined overlay node: the swarm runs in a background task, commands go
/// through the handle, raw protocol streams through the control.
pub struct Node {
    handle: NodeHandle,
    control: stream::Control,
    local_peer_id: PeerId,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// Cloneable handle for driving the node's directory operations.
#[derive(Clone)]
pub struct NodeHandle {
    command_tx: mpsc::Sender<Command>,
}

impl Node {
    /// Join the overlay: build the transport stack, bind the resolved listen
    /// addresses (at least one bind must succeed) and spawn the runtime.
    pub async fn start(
        config: &NodeConfig,
        identity: &LocalIdentity,
    ) -> Result<(Node, mpsc::Receiver<NodeEvent>), NodeError> {
        let mut swarm = SwarmBuilder::with_existing_identity(identity.keypair.clone())
            .with_tokio()
            .with_tcp(
                tcp::Config::default(),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NodeError::Bootstrap(e.to_string()))?
            .with_dns()
            .map_err(|e| NodeError::Bootstrap(e.to_string()))?
            .with_behaviour(|key| ChatBehaviour::new(key, &config.protocol_id))
            .map_err(|e| NodeError::Bootstrap(e.to_string()))?
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
            .build();

        let mut bound = 0usize;
        for addr in config.listen_addresses()? {
            match swarm.listen_on(addr.clone()) {
                Ok(_) => bound += 1,
                Err(e) => warn!(%addr, error = %e, "failed to listen"),
            }
        }
        if bound == 0 {
            return Err(NodeError::Bootstrap(
                "could not bind any configured listen address".to_string(),
            ));
        }

        let control = swarm.behaviour().stream.new_control();
        let local_peer_id = *swarm.local_peer_id();

        let (command_tx, command_rx) = mpsc::channel(100);
        let (event_tx, event_rx) = mpsc::channel(100);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let runtime = Runtime::new(swarm, command_rx, event_tx);
        tokio::spawn(async move {
            tokio::select! {
                _ = runtime.run() => {},
                _ = shutdown_rx => {}
            }
        });

        let node = Node {
            handle: NodeHandle { command_tx },
            control,
            local_peer_id,
            shutdown_tx: Some(shutdown_tx),
        };

        Ok((node, event_rx))
    }

    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    pub fn control(&self) -> stream::Control {
        self.control.clone()
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    /// Register this node as an acceptor for the chat protocol. Inbound
    /// streams from peers that dial us arrive on the returned sequence.
    pub fn incoming_streams(
        &self,
        protocol: StreamProtocol,
    ) -> Result<stream::IncomingStreams, NodeError> {
        self.control
            .clone()
            .accept(protocol)
            .map_err(|e| NodeError::Bootstrap(e.to_string()))
    }

    /// Stop the node: drain the command channel so the runtime exits its
    /// loop, then abort the swarm task if it is still running.
    pub async fn shutdown(mut self) -> Result<(), NodeError> {
        let result = self.handle.shutdown().await;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        result
    }
}

impl NodeHandle {
    pub async fn connect_bootstrap(&self, peers: Vec<Multiaddr>) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::ConnectBootstrap { peers, respond_to: tx })
            .await
            .map_err(|_| NodeError::ChannelClosed)?;
        rx.await.map_err(|_| NodeError::ChannelClosed)?
    }

    pub async fn refresh(&self) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Refresh { respond_to: tx })
            .await
            .map_err(|_| NodeError::ChannelClosed)?;
        rx.await.map_err(|_| NodeError::ChannelClosed)?
    }

    pub async fn advertise(&self, key: &str) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Advertise { key: key.to_string(), respond_to: tx })
            .await
            .map_err(|_| NodeError::ChannelClosed)?;
        rx.await.map_err(|_| NodeError::ChannelClosed)?
    }

    pub async fn discover(&self, key: &str) -> Result<mpsc::Receiver<DiscoveredPeer>, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Discover { key: key.to_string(), respond_to: tx })
            .await
            .map_err(|_| NodeError::ChannelClosed)?;
        rx.await.map_err(|_| NodeError::ChannelClosed)
    }

    pub async fn listen_addrs(&self) -> Result<Vec<Multiaddr>, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::ListenAddrs { respond_to: tx })
            .await
            .map_err(|_| NodeError::ChannelClosed)?;
        rx.await.map_err(|_| NodeError::ChannelClosed)
    }

    /// Listener binds complete asynchronously; poll until at least one
    /// address is bound or the deadline passes.
    pub async fn await_listen_addrs(&self, timeout: Duration) -> Result<Vec<Multiaddr>, NodeError> {
        let deadline = Instant::now() + timeout;
        loop {
            let addrs = self.listen_addrs().await?;
            if !addrs.is_empty() {
                return Ok(addrs);
            }
            if Instant::now() >= deadline {
                return Err(NodeError::Bootstrap(
                    "timed out waiting for listen addresses".to_string(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn connected_peers(&self) -> Result<Vec<PeerId>, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::ConnectedPeers { respond_to: tx })
            .await
            .map_err(|_| NodeError::ChannelClosed)?;
        rx.await.map_err(|_| NodeError::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(Command::Shutdown { respond_to: tx })
            .await
            .map_err(|_| NodeError::ChannelClosed)?;
        rx.await.map_err(|_| NodeError::ChannelClosed)
    }
}
