//! Console collaborators for the chat sessions. Sessions never touch stdin
//! or stdout directly; they go through these seams so tests can substitute
//! channel-backed fakes.

use std::io::Write;

use async_trait::async_trait;
use libp2p::PeerId;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Source of operator input, one line at a time. `None` means the input is
/// closed for good.
#[async_trait]
pub trait LineInput: Send + Sync {
    async fn next_line(&self) -> Option<String>;
}

/// Sink for lines received from peers.
#[async_trait]
pub trait LineOutput: Send + Sync {
    async fn deliver(&self, from: &PeerId, line: &str);
}

/// Shared stdin reader. Session writers take turns on the lock, so each line
/// the operator types goes to exactly one session.
pub struct StdinInput {
    lines: Mutex<tokio::io::Lines<BufReader<Stdin>>>,
}

impl StdinInput {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinInput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LineInput for StdinInput {
    async fn next_line(&self) -> Option<String> {
        let mut lines = self.lines.lock().await;
        print!("> ");
        let _ = std::io::stdout().flush();
        lines.next_line().await.ok().flatten()
    }
}

/// Prints received lines in green, then re-issues the prompt.
pub struct StdoutOutput;

#[async_trait]
impl LineOutput for StdoutOutput {
    async fn deliver(&self, _from: &PeerId, line: &str) {
        // Green console colour: \x1b[32m, reset: \x1b[0m
        print!("\x1b[32m{line}\x1b[0m\n> ");
        let _ = std::io::stdout().flush();
    }
}
