//! # transport
//!
//! Duplex byte link to the host (UART on hardware; a TCP serial bridge or
//! stdio when running on a host). The link is split into a reader used by the
//! command task and a writer used by the telemetry task.
//!
//! Neither half ever blocks indefinitely: reads return whatever arrived
//! before the timeout (possibly nothing), writes fail with
//! [`TransportError::WriteTimeout`].

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{timeout, timeout_at, Instant};

use crate::error::TransportError;

// ── Reader ────────────────────────────────────────────────────────────────────

pub struct LineReader<R> {
    inner: BufReader<R>,
    partial: Vec<u8>,
    timeout: Duration,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self {
            inner: BufReader::new(inner),
            partial: Vec::new(),
            timeout,
        }
    }

    /// Read bytes up to and including `delimiter`, stopping early at
    /// `max_len` bytes or when the read timeout expires.
    ///
    /// Returns an empty vector when nothing arrived in time, and
    /// [`TransportError::Closed`] once the peer has hung up and every buffered
    /// byte has been handed out.
    pub async fn read_until(&mut self, delimiter: u8, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + self.timeout;
        while self.partial.len() < max_len {
            // fill_buf is cancel safe: bytes only leave the BufReader through
            // consume() below, after they are copied into `partial`
            let available = match timeout_at(deadline, self.inner.fill_buf()).await {
                Err(_elapsed) => break,
                Ok(result) => result?,
            };
            if available.is_empty() {
                if self.partial.is_empty() {
                    return Err(TransportError::Closed);
                }
                break;
            }

            let room = max_len - self.partial.len();
            let window = &available[..available.len().min(room)];
            match window.iter().position(|b| *b == delimiter) {
                Some(i) => {
                    self.partial.extend_from_slice(&window[..=i]);
                    self.inner.consume(i + 1);
                    break;
                }
                None => {
                    let n = window.len();
                    self.partial.extend_from_slice(window);
                    self.inner.consume(n);
                }
            }
        }
        Ok(std::mem::take(&mut self.partial))
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

pub struct FrameWriter<W> {
    inner: W,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    /// Write and flush one whole frame.
    pub async fn write_frame(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let inner = &mut self.inner;
        let write = async {
            inner.write_all(bytes).await?;
            inner.flush().await
        };
        match timeout(self.timeout, write).await {
            Err(_elapsed) => Err(TransportError::WriteTimeout(self.timeout)),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(())) => Ok(bytes.len()),
        }
    }
}
