//! Null-delimited JSON framing for the terminal feed.
//!
//! Each frame is one JSON object terminated by a single NUL byte over a
//! TCP connection to the trading terminal. Malformed frames are logged
//! and skipped; only transport errors tear the connection down.

use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::io::AsyncBufReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::events::FeedMessage;

/// Errors from the feed transport.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Frame delimiter: a single NUL byte.
const DELIMITER: u8 = 0;

/// Encode one message into a delimited frame.
pub fn encode(message: &FeedMessage) -> Result<Vec<u8>, FeedError> {
    let mut frame = serde_json::to_vec(message)?;
    frame.push(DELIMITER);
    Ok(frame)
}

/// Decode one frame (delimiter already stripped).
pub fn decode(frame: &[u8]) -> Result<FeedMessage, serde_json::Error> {
    serde_json::from_slice(frame)
}

/// A live connection to the trading terminal.
pub struct FeedConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    buf: Vec<u8>,
}

impl FeedConnection {
    /// Connect to the terminal.
    pub async fn connect(host: &str, port: u16) -> Result<Self, FeedError> {
        let stream = TcpStream::connect((host, port)).await?;
        debug!(host, port, "Feed connected");
        Ok(Self::from_stream(stream))
    }

    /// Wrap an established stream (used by tests and replay tooling).
    pub fn from_stream(stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            buf: Vec::with_capacity(4096),
        }
    }

    /// Send one message.
    pub async fn send(&mut self, message: &FeedMessage) -> Result<(), FeedError> {
        let frame = encode(message)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Read the next well-formed message.
    ///
    /// Returns `Ok(None)` on a clean EOF. Frames that fail to decode are
    /// logged and skipped rather than failing the session.
    pub async fn next_message(&mut self) -> Result<Option<FeedMessage>, FeedError> {
        loop {
            self.buf.clear();
            let n = self.reader.read_until(DELIMITER, &mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }

            let frame = match self.buf.last() {
                Some(&DELIMITER) => &self.buf[..self.buf.len() - 1],
                _ => &self.buf[..],
            };
            if frame.is_empty() {
                continue;
            }

            match decode(frame) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    warn!(error = %e, len = frame.len(), "Dropping undecodable feed frame");
                }
            }
        }
    }
}
