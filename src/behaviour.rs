use std::time::Duration;

use libp2p::{
    identify,
    identity::Keypair,
    kad,
    swarm::NetworkBehaviour,
    PeerId,
};
use libp2p_stream as stream;

#[derive(NetworkBehaviour)]
pub struct ChatBehaviour {
    pub kad: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub stream: stream::Behaviour,
}

impl ChatBehaviour {
    pub fn new(local_key: &Keypair, protocol_id: &str) -> Self {
        let local_peer_id = PeerId::from(local_key.public());

        // Kademlia in server mode: every node carries its own copy of the
        // directory, so the bootstrap node can go down without inhibiting
        // future discovery.
        let store = kad::store::MemoryStore::new(local_peer_id);
        let mut kad_config = kad::Config::new(kad::PROTOCOL_NAME);
        kad_config.set_query_timeout(Duration::from_secs(60));
        let mut kad = kad::Behaviour::with_config(local_peer_id, store, kad_config);
        kad.set_mode(Some(kad::Mode::Server));

        // Identify feeds learned listen addresses back into Kademlia. It
        // announces the same protocol id the chat streams run on.
        let identify = identify::Behaviour::new(
            identify::Config::new(protocol_id.to_string(), local_key.public())
                .with_agent_version(format!("chatnode/{}", env!("CARGO_PKG_VERSION"))),
        );

        let stream = stream::Behaviour::new();

        Self { kad, identify, stream }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_a_configured_protocol_id() {
        let key = Keypair::generate_ed25519();
        let _behaviour = ChatBehaviour::new(&key, "/chat-test/1.0.0");
    }
}
