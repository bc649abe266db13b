//! Peer-to-peer rendezvous chat node. Joins a Kademlia overlay, advertises
//! itself under a shared rendezvous key, discovers peers advertising the
//! same key and exchanges newline-delimited messages with them over raw
//! protocol streams.

pub mod behaviour;
pub mod bootstrap;
pub mod codec;
mod command;
pub mod config;
pub mod console;
pub mod directory;
pub mod error;
pub mod events;
pub mod identity;
pub mod node;
mod runtime;
pub mod session;

pub use bootstrap::{BootstrapController, Phase, PreflightReport};
pub use config::NodeConfig;
pub use directory::{refresh_until_ready, Directory};
pub use error::NodeError;
pub use events::{DiscoveredPeer, NodeEvent};
pub use identity::LocalIdentity;
pub use node::{Node, NodeHandle};
pub use session::{SessionHandle, SessionManager};
