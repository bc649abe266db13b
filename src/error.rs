use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// Malformed or insufficient configuration. Fatal: the run aborts before
    /// any network activity.
    #[error("configuration error: {0}")]
    Config(String),

    /// The node could not join the overlay. Fatal for the current run.
    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    /// A routing-table refresh attempt failed. Retried with backoff; only
    /// surfaced as `Bootstrap` once the retry ceiling is exhausted.
    #[error("directory not ready: {0}")]
    DirectoryTransient(String),

    /// A discovered peer could not be connected to. The peer is skipped and
    /// discovery continues.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A read or write on an active session failed. Terminates only the
    /// affected session activity.
    #[error("session i/o error: {0}")]
    SessionIo(#[from] std::io::Error),

    #[error("internal channel closed")]
    ChannelClosed,
}

impl NodeError {
    /// Whether this error should terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, NodeError::Config(_) | NodeError::Bootstrap(_))
    }
}
