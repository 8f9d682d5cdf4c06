//! Telemetry frames read off a node link.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;
use uwb_types::{TelemetryFrame, TelemetryScanner};

pub struct FrameStream<R> {
    inner: R,
    scanner: TelemetryScanner,
    buf: Box<[u8]>,
    dropped: u64,
}

impl<R: AsyncRead + Unpin> FrameStream<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scanner: TelemetryScanner::new(),
            buf: vec![0u8; 1024].into_boxed_slice(),
            dropped: 0,
        }
    }

    /// Next whole frame, or `None` once the node closes the link.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<TelemetryFrame>> {
        loop {
            if let Some(frame) = self.scanner.next_frame() {
                return Ok(Some(frame));
            }
            if self.scanner.dropped() > self.dropped {
                self.dropped = self.scanner.dropped();
                warn!("{} corrupt frames skipped so far", self.dropped);
            }
            let n = self.inner.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.scanner.push(&self.buf[..n]);
        }
    }
}
