use std::fs;
use std::path::Path;

use libp2p::identity::Keypair;
use libp2p::PeerId;
use tracing::info;

use crate::error::NodeError;

/// Key kinds the node can generate. RSA keys can still be loaded from an
/// existing file but are not generated here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Ed25519,
    Secp256k1,
    Ecdsa,
}

/// The node's signing keypair and its derived stable peer identifier.
/// Resolved once at startup and never regenerated mid-run.
pub struct LocalIdentity {
    pub keypair: Keypair,
    pub peer_id: PeerId,
    /// True when the keypair was loaded from a key file; false for an
    /// ephemeral identity generated for this run only.
    pub persistent: bool,
}

impl LocalIdentity {
    pub fn resolve(key_file: Option<&Path>) -> Result<Self, NodeError> {
        match key_file {
            Some(path) => {
                let keypair = load_keypair(path)?;
                let peer_id = PeerId::from(keypair.public());
                info!(%peer_id, key_file = %path.display(), "loaded persistent identity");
                Ok(Self { keypair, peer_id, persistent: true })
            }
            None => {
                let keypair = Keypair::generate_ed25519();
                let peer_id = PeerId::from(keypair.public());
                info!(%peer_id, "no key file configured, using ephemeral identity");
                Ok(Self { keypair, peer_id, persistent: false })
            }
        }
    }
}

pub fn generate(kind: KeyKind) -> Keypair {
    match kind {
        KeyKind::Ed25519 => Keypair::generate_ed25519(),
        KeyKind::Secp256k1 => Keypair::generate_secp256k1(),
        KeyKind::Ecdsa => Keypair::generate_ecdsa(),
    }
}

/// Load a keypair persisted as a base58-encoded protobuf blob.
pub fn load_keypair(path: &Path) -> Result<Keypair, NodeError> {
    let encoded = fs::read_to_string(path)
        .map_err(|e| NodeError::Config(format!("cannot read key file {}: {e}", path.display())))?;
    let bytes = bs58::decode(encoded.trim())
        .into_vec()
        .map_err(|e| NodeError::Config(format!("key file {} is not base58: {e}", path.display())))?;
    Keypair::from_protobuf_encoding(&bytes)
        .map_err(|e| NodeError::Config(format!("key file {} is not a valid key: {e}", path.display())))
}

/// Persist a keypair as a base58-encoded protobuf blob, readable only by the
/// owner on unix.
pub fn save_keypair(path: &Path, keypair: &Keypair) -> Result<(), NodeError> {
    let bytes = keypair
        .to_protobuf_encoding()
        .map_err(|e| NodeError::Config(format!("cannot encode keypair: {e}")))?;
    let encoded = bs58::encode(bytes).into_string();
    fs::write(path, encoded)
        .map_err(|e| NodeError::Config(format!("cannot write key file {}: {e}", path.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| NodeError::Config(format!("cannot set key file mode: {e}")))?;
    }
    Ok(())
}

/// Peer id derived from a persisted key file, without joining the network.
pub fn peer_id_for(path: &Path) -> Result<PeerId, NodeError> {
    let keypair = load_keypair(path)?;
    Ok(PeerId::from(keypair.public()))
}
