use std::path::{Path, PathBuf};

use libp2p::Multiaddr;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::NodeError;

/// Node configuration, loaded once per run from a JSON document and owned by
/// the bootstrap controller for the duration of that run.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// TCP port to listen on (0 for a kernel-assigned port).
    pub port: u16,

    /// Shared rendezvous key under which peers advertise and search for each
    /// other.
    #[serde(rename = "rendezvous_string")]
    pub rendezvous: String,

    /// Well-known peer multiaddrs used to join the overlay.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Local interfaces to listen on; empty means all interfaces.
    #[serde(default)]
    pub listen_ips: Vec<String>,

    /// Protocol identifier for chat streams, e.g. "/chat/1.0.0".
    pub protocol_id: String,

    /// Optional path to a persisted identity key file.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| NodeError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Resolve the local listen address set. Defaults to the wildcard
    /// interface when no interfaces are configured; any malformed interface
    /// fails the whole resolution. The result is never empty.
    pub fn listen_addresses(&self) -> Result<Vec<Multiaddr>, NodeError> {
        let mut ips = self.listen_ips.clone();
        if ips.is_empty() {
            info!("no listen interfaces configured, defaulting to 0.0.0.0");
            ips.push("0.0.0.0".to_string());
        }
        ips.iter()
            .map(|ip| {
                format!("/ip4/{ip}/tcp/{}", self.port)
                    .parse::<Multiaddr>()
                    .map_err(|e| NodeError::Config(format!("invalid listen interface {ip}: {e}")))
            })
            .collect()
    }

    /// Parse the configured bootstrap peers, dropping any address textually
    /// equal to one of `exclude` (our own addresses). Parsing is strict: one
    /// malformed entry fails the whole list. Empty strings are skipped.
    ///
    /// The exclusion is plain string equality; a different spelling of the
    /// same address is not excluded.
    pub fn bootstrap_peers(&self, exclude: &[String]) -> Result<Vec<Multiaddr>, NodeError> {
        let mut peers = Vec::with_capacity(self.bootstrap_peers.len());
        for raw in &self.bootstrap_peers {
            if raw.is_empty() {
                continue;
            }
            let addr: Multiaddr = raw
                .parse()
                .map_err(|e| NodeError::Bootstrap(format!("invalid bootstrap address {raw}: {e}")))?;
            if exclude.iter().any(|own| *own == addr.to_string()) {
                debug!(%addr, "excluding own address from bootstrap set");
                continue;
            }
            info!(%addr, "adding bootstrap peer");
            peers.push(addr);
        }
        Ok(peers)
    }
}
