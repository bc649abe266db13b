//! Peer directory operations, behind a trait so the retry logic can be
//! exercised against stubs. The real directory is the node's Kademlia
//! instance, reached through the `NodeHandle`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::error::NodeError;
use crate::events::DiscoveredPeer;
use crate::node::NodeHandle;

#[async_trait]
pub trait Directory: Send + Sync {
    /// One routing-table refresh attempt.
    async fn refresh(&self) -> Result<(), NodeError>;

    /// Advertise this node under the rendezvous key.
    async fn advertise(&self, key: &str) -> Result<(), NodeError>;

    /// Start a provider search for the rendezvous key. The returned channel
    /// closes when the underlying query finishes; re-invoke to restart.
    async fn discover(&self, key: &str) -> Result<mpsc::Receiver<DiscoveredPeer>, NodeError>;
}

#[async_trait]
impl Directory for NodeHandle {
    async fn refresh(&self) -> Result<(), NodeError> {
        NodeHandle::refresh(self).await
    }

    async fn advertise(&self, key: &str) -> Result<(), NodeError> {
        NodeHandle::advertise(self, key).await
    }

    async fn discover(&self, key: &str) -> Result<mpsc::Receiver<DiscoveredPeer>, NodeError> {
        NodeHandle::discover(self, key).await
    }
}

/// Retry the directory refresh until it succeeds. A freshly bootstrapped
/// node's table may not be immediately queryable, so each failed or
/// timed-out attempt is retried after a fixed backoff, up to `max_attempts`.
/// Exhausting the ceiling surfaces the last failure as a bootstrap error.
pub async fn refresh_until_ready(
    directory: &dyn Directory,
    attempt_timeout: Duration,
    max_attempts: u32,
    backoff: Duration,
) -> Result<(), NodeError> {
    let mut last_error = String::new();
    for attempt in 1..=max_attempts {
        match tokio::time::timeout(attempt_timeout, directory.refresh()).await {
            Ok(Ok(())) => {
                info!(attempt, "routing table refreshed");
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!(attempt, error = %e, "routing table refresh failed");
                last_error = e.to_string();
            }
            Err(_) => {
                warn!(attempt, "routing table refresh timed out");
                last_error = "refresh attempt timed out".to_string();
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(backoff).await;
        }
    }
    Err(NodeError::Bootstrap(format!(
        "routing table refresh failed after {max_attempts} attempts: {last_error}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` refresh attempts, then succeeds.
    struct FlakyDirectory {
        failures: u32,
        attempts: AtomicU32,
    }

    impl FlakyDirectory {
        fn new(failures: u32) -> Self {
            Self { failures, attempts: AtomicU32::new(0) }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Directory for FlakyDirectory {
        async fn refresh(&self) -> Result<(), NodeError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                Err(NodeError::DirectoryTransient("not converged".to_string()))
            } else {
                Ok(())
            }
        }

        async fn advertise(&self, _key: &str) -> Result<(), NodeError> {
            Ok(())
        }

        async fn discover(&self, _key: &str) -> Result<mpsc::Receiver<DiscoveredPeer>, NodeError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    /// Never completes a refresh.
    struct StalledDirectory;

    #[async_trait]
    impl Directory for StalledDirectory {
        async fn refresh(&self) -> Result<(), NodeError> {
            futures::future::pending().await
        }

        async fn advertise(&self, _key: &str) -> Result<(), NodeError> {
            Ok(())
        }

        async fn discover(&self, _key: &str) -> Result<mpsc::Receiver<DiscoveredPeer>, NodeError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn succeeds_after_exactly_n_attempts() {
        let dir = FlakyDirectory::new(2);
        refresh_until_ready(&dir, Duration::from_secs(1), 5, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(dir.attempts(), 3);
    }

    #[tokio::test]
    async fn first_attempt_success_stops_immediately() {
        let dir = FlakyDirectory::new(0);
        refresh_until_ready(&dir, Duration::from_secs(1), 5, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(dir.attempts(), 1);
    }

    #[tokio::test]
    async fn exhausted_ceiling_is_a_bootstrap_error() {
        let dir = FlakyDirectory::new(u32::MAX);
        let err = refresh_until_ready(&dir, Duration::from_secs(1), 4, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(dir.attempts(), 4);
        assert!(matches!(err, NodeError::Bootstrap(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_attempt_counts_against_the_ceiling() {
        let err = refresh_until_ready(
            &StalledDirectory,
            Duration::from_millis(100),
            3,
            Duration::from_millis(10),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, NodeError::Bootstrap(_)));
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_separates_attempts() {
        let start = tokio::time::Instant::now();
        let dir = FlakyDirectory::new(2);
        refresh_until_ready(&dir, Duration::from_secs(1), 5, Duration::from_secs(10))
            .await
            .unwrap();
        // Two failures, so two backoff sleeps.
        assert!(start.elapsed() >= Duration::from_secs(20));
    }
}
