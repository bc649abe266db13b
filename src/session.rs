//! Stream sessions: one live bidirectional channel per peer, with a reader
//! and a writer running concurrently against the same stream. The manager
//! keeps a supervised registry so session failures are observable and the
//! active count is queryable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use libp2p::PeerId;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use crate::codec::{encode_line, Lines};
use crate::console::{LineInput, LineOutput};

/// Handle to a live session; resolves once both halves have terminated and
/// the registry entry has been removed.
#[derive(Clone)]
pub struct SessionHandle {
    peer: PeerId,
    id: u64,
    closed: watch::Receiver<bool>,
}

impl SessionHandle {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub async fn closed(&self) {
        let mut rx = self.closed.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    input: Arc<dyn LineInput>,
    output: Arc<dyn LineOutput>,
    sessions: Arc<RwLock<HashMap<PeerId, SessionHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new(input: Arc<dyn LineInput>, output: Arc<dyn LineOutput>) -> Self {
        Self {
            input,
            output,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn active(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn contains(&self, peer: &PeerId) -> bool {
        self.sessions.read().await.contains_key(peer)
    }

    /// Start a session on `stream`: exactly one reader and one writer, never
    /// restarted. Inbound and outbound streams are handled identically.
    /// Either half terminating leaves the other running; a supervisor
    /// removes the registry entry once both are done.
    pub async fn spawn<S>(&self, peer: PeerId, stream: S) -> SessionHandle
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (closed_tx, closed_rx) = watch::channel(false);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = SessionHandle { peer, id, closed: closed_rx };

        self.sessions.write().await.insert(peer, handle.clone());

        let reader = tokio::spawn(read_loop(peer, read_half, self.output.clone()));
        let writer = tokio::spawn(write_loop(peer, write_half, self.input.clone()));

        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            let _ = reader.await;
            let _ = writer.await;
            // An inbound and an outbound stream for the same peer can race
            // into the registry; a supervisor only unregisters its own
            // session, never a replacement.
            let mut sessions = sessions.write().await;
            if sessions.get(&peer).map(|h| h.id) == Some(id) {
                sessions.remove(&peer);
            }
            drop(sessions);
            let _ = closed_tx.send(true);
            debug!(%peer, "session ended");
        });

        handle
    }
}

/// Deliver each non-empty inbound line to the console. Ends on read error or
/// end of stream; the writer observes the closed stream on its own next
/// write.
async fn read_loop<R>(peer: PeerId, read_half: R, output: Arc<dyn LineOutput>)
where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = Lines::new(BufReader::new(read_half));
    loop {
        match lines.next().await {
            Ok(Some(line)) => output.deliver(&peer, &line).await,
            Ok(None) => {
                debug!(%peer, "stream closed by peer");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "session read failed");
                break;
            }
        }
    }
}

/// Send each operator line as one delimited, immediately flushed frame. Ends
/// on write error or when the input is closed.
async fn write_loop<W>(peer: PeerId, mut write_half: W, input: Arc<dyn LineInput>)
where
    W: AsyncWrite + Send + Unpin,
{
    while let Some(line) = input.next_line().await {
        let frame = encode_line(&line);
        if let Err(e) = write_half.write_all(&frame).await {
            warn!(%peer, error = %e, "session write failed");
            break;
        }
        if let Err(e) = write_half.flush().await {
            warn!(%peer, error = %e, "session flush failed");
            break;
        }
    }
    debug!(%peer, "writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::{ChannelInput, ChannelOutput};
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    fn manager(
        input_capacity: usize,
    ) -> (SessionManager, mpsc::Sender<String>, mpsc::Receiver<(PeerId, String)>) {
        let (in_tx, in_rx) = mpsc::channel(input_capacity);
        let (out_tx, out_rx) = mpsc::channel(64);
        let manager = SessionManager::new(
            Arc::new(ChannelInput::new(in_rx)),
            Arc::new(ChannelOutput(out_tx)),
        );
        (manager, in_tx, out_rx)
    }

    #[tokio::test]
    async fn reader_delivers_inbound_lines() {
        let (manager, _in_tx, mut out_rx) = manager(8);
        let (local, mut remote) = tokio::io::duplex(256);
        let peer = PeerId::random();
        manager.spawn(peer, local).await;

        remote.write_all(b"hello\nworld\n").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), (peer, "hello".to_string()));
        assert_eq!(out_rx.recv().await.unwrap(), (peer, "world".to_string()));
    }

    #[tokio::test]
    async fn writer_frames_and_flushes_each_line() {
        let (manager, in_tx, _out_rx) = manager(8);
        let (local, mut remote) = tokio::io::duplex(256);
        manager.spawn(PeerId::random(), local).await;

        in_tx.send("one".to_string()).await.unwrap();
        in_tx.send("two".to_string()).await.unwrap();

        let mut buf = [0u8; 8];
        remote.read_exact(&mut buf[..4]).await.unwrap();
        assert_eq!(&buf[..4], b"one\n");
        remote.read_exact(&mut buf[..4]).await.unwrap();
        assert_eq!(&buf[..4], b"two\n");
    }

    #[tokio::test]
    async fn empty_inbound_lines_are_suppressed() {
        let (manager, _in_tx, mut out_rx) = manager(8);
        let (local, mut remote) = tokio::io::duplex(256);
        let peer = PeerId::random();
        manager.spawn(peer, local).await;

        remote.write_all(b"a\n\nb\n").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap().1, "a");
        assert_eq!(out_rx.recv().await.unwrap().1, "b");
    }

    #[tokio::test]
    async fn sessions_fail_independently() {
        let (manager_a, _in_tx_a, _out_rx_a) = manager(8);
        let (manager_b, in_tx_b, mut out_rx_b) = manager(8);

        let (local_a, remote_a) = tokio::io::duplex(256);
        let (local_b, mut remote_b) = tokio::io::duplex(256);
        let peer_a = PeerId::random();
        let peer_b = PeerId::random();
        manager_a.spawn(peer_a, local_a).await;
        manager_b.spawn(peer_b, local_b).await;

        // Kill session A's stream: its reader sees end-of-stream.
        drop(remote_a);

        // Session B keeps receiving and sending.
        remote_b.write_all(b"still alive\n").await.unwrap();
        assert_eq!(out_rx_b.recv().await.unwrap(), (peer_b, "still alive".to_string()));

        in_tx_b.send("outbound still works".to_string()).await.unwrap();
        let mut buf = vec![0u8; "outbound still works\n".len()];
        remote_b.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"outbound still works\n");
    }

    #[tokio::test]
    async fn supervisor_removes_session_when_both_halves_end() {
        let (in_tx, in_rx) = mpsc::channel::<String>(8);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let manager = SessionManager::new(
            Arc::new(ChannelInput::new(in_rx)),
            Arc::new(ChannelOutput(out_tx)),
        );

        let (local, remote) = tokio::io::duplex(256);
        let peer = PeerId::random();
        let handle = manager.spawn(peer, local).await;
        assert!(manager.contains(&peer).await);

        // End the reader (peer closes) and the writer (input closes).
        drop(remote);
        drop(in_tx);

        timeout(Duration::from_secs(5), handle.closed())
            .await
            .expect("session did not close");
        assert!(!manager.contains(&peer).await);
        assert_eq!(manager.active().await, 0);
    }

    #[tokio::test]
    async fn replacement_session_survives_the_first_supervisor() {
        let (in_tx, in_rx) = mpsc::channel::<String>(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let manager = SessionManager::new(
            Arc::new(ChannelInput::new(in_rx)),
            Arc::new(ChannelOutput(out_tx)),
        );
        // Close the input up front so both writers stop immediately and
        // session lifetime is driven by the readers alone.
        drop(in_tx);

        let (local_one, remote_one) = tokio::io::duplex(256);
        let (local_two, mut remote_two) = tokio::io::duplex(256);
        let peer = PeerId::random();
        let first = manager.spawn(peer, local_one).await;
        let second = manager.spawn(peer, local_two).await;

        // End only the first session; its supervisor must not unregister
        // the replacement.
        drop(remote_one);
        timeout(Duration::from_secs(5), first.closed())
            .await
            .expect("first session did not end");

        assert!(manager.contains(&peer).await);
        remote_two.write_all(b"still here\n").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), (peer, "still here".to_string()));

        drop(remote_two);
        timeout(Duration::from_secs(5), second.closed())
            .await
            .expect("second session did not end");
        assert!(!manager.contains(&peer).await);
        assert_eq!(manager.active().await, 0);
    }

    #[tokio::test]
    async fn reader_end_does_not_stop_the_writer() {
        let (manager, in_tx, _out_rx) = manager(8);
        let (local, mut remote) = tokio::io::duplex(256);
        manager.spawn(PeerId::random(), local).await;

        // Close only the remote write side: reader sees EOF, writer's
        // direction stays usable on a duplex pipe.
        remote.shutdown().await.unwrap();

        in_tx.send("after eof".to_string()).await.unwrap();
        let mut buf = vec![0u8; "after eof\n".len()];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"after eof\n");
    }
}
