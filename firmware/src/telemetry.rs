use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use uwb_types::{Position, TelemetryFrame};

use crate::error::TransportError;
use crate::state::{PeerSnapshot, PeerStateTable};
use crate::transport::FrameWriter;

/// Pack a snapshot into a telemetry frame, slots in index order.
pub fn encode_snapshot(snapshot: &PeerSnapshot) -> TelemetryFrame {
    let mut frame = TelemetryFrame::new();
    for (i, slot) in snapshot.slots.iter().enumerate() {
        frame.raw_distance[i] = slot.raw_distance;
        frame.calibrated_distance[i] = slot.calibrated_distance;
        frame.rx_power[i] = slot.rx_power;
        frame.liveness[i] = u8::from(slot.active);
    }
    // no position solver on the node
    frame.position = Position::default();
    frame
}

/// Periodic telemetry sender.
pub struct TelemetryEncoder<W> {
    writer: FrameWriter<W>,
    table: Arc<PeerStateTable>,
    period: Duration,
}

impl<W: AsyncWrite + Unpin> TelemetryEncoder<W> {
    pub fn new(writer: FrameWriter<W>, table: Arc<PeerStateTable>, period: Duration) -> Self {
        Self { writer, table, period }
    }

    /// Snapshot, encode and write one frame.
    pub async fn send_once(&mut self) -> Result<usize, TransportError> {
        let frame = encode_snapshot(&self.table.read_snapshot()).encode();
        trace!("telemetry → {}", hex::encode(frame));
        self.writer.write_frame(&frame).await
    }

    /// Send a frame every period until the link closes.
    ///
    /// Fire times are `start + k * period`; a cycle delayed by a slow write
    /// is skipped rather than pushing every later cycle back.
    pub async fn run(mut self) -> Result<(), TransportError> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("📤 Telemetry every {:?}", self.period);

        let mut sent: u64 = 0;
        loop {
            ticker.tick().await;
            match self.send_once().await {
                Ok(_) => {
                    sent += 1;
                    if sent % 600 == 0 {
                        debug!("telemetry: {sent} frames sent");
                    }
                }
                Err(TransportError::Closed) => return Err(TransportError::Closed),
                Err(e) => warn!("telemetry: {e}"),
            }
        }
    }
}
