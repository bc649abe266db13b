//! Newline-delimited line protocol. One `\n` terminates each message; there
//! is no escaping, so a payload containing an embedded newline is delivered
//! as two messages.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::NodeError;

/// Frame one outbound message: the text plus the single delimiter byte.
pub fn encode_line(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len() + 1);
    bytes.extend_from_slice(text.as_bytes());
    bytes.push(b'\n');
    bytes
}

/// Lazy decoder over a buffered byte stream. Yields delimiter-stripped
/// lines; empty lines (a delimiter immediately following a delimiter) are
/// suppressed without breaking subsequent decoding.
pub struct Lines<R> {
    reader: R,
    buf: String,
}

impl<R: AsyncBufRead + Unpin> Lines<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: String::new() }
    }

    /// Next non-empty line, or `None` at end of stream.
    pub async fn next(&mut self) -> Result<Option<String>, NodeError> {
        loop {
            self.buf.clear();
            let n = self.reader.read_line(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            let line = self.buf.trim_end_matches('\n');
            if line.is_empty() {
                continue;
            }
            return Ok(Some(line.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn collect(bytes: &[u8]) -> Vec<String> {
        let mut lines = Lines::new(BufReader::new(bytes));
        let mut out = Vec::new();
        while let Some(line) = lines.next().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[test]
    fn encode_appends_single_delimiter() {
        assert_eq!(encode_line("hello"), b"hello\n");
        assert_eq!(encode_line(""), b"\n");
    }

    #[tokio::test]
    async fn encode_decode_round_trip() {
        let bytes = encode_line("hello");
        assert_eq!(collect(&bytes).await, vec!["hello"]);
    }

    #[tokio::test]
    async fn empty_lines_are_suppressed() {
        assert_eq!(collect(b"a\n\nb\n").await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_stream_yields_nothing() {
        assert!(collect(b"").await.is_empty());
        assert!(collect(b"\n\n\n").await.is_empty());
    }

    #[tokio::test]
    async fn embedded_newline_is_two_messages() {
        let bytes = encode_line("one\ntwo");
        assert_eq!(collect(&bytes).await, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_delivered() {
        assert_eq!(collect(b"a\nb").await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn decoder_is_lazy() {
        let mut lines = Lines::new(BufReader::new(&b"a\nb\n"[..]));
        assert_eq!(lines.next().await.unwrap().as_deref(), Some("a"));
        assert_eq!(lines.next().await.unwrap().as_deref(), Some("b"));
        assert_eq!(lines.next().await.unwrap(), None);
    }
}
