//! # ranging
//!
//! Bridge from ranging-engine events into the peer table.
//!
//! The engine calls [`RangingEventAdapter::on_event`] from its own context,
//! at any point relative to the telemetry and command tasks. The adapter only
//! takes the calibration and table locks through their public APIs, one at a
//! time, and never awaits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;
use uwb_types::{PeerRef, RangingEvent, RangingHandler};

use crate::calibration::CalibrationStore;
use crate::peers::PeerIndex;
use crate::state::PeerStateTable;

pub struct RangingEventAdapter {
    table: Arc<PeerStateTable>,
    calibration: Arc<CalibrationStore>,
    rejected: AtomicU64,
}

impl RangingEventAdapter {
    pub fn new(table: Arc<PeerStateTable>, calibration: Arc<CalibrationStore>) -> Self {
        Self {
            table,
            calibration,
            rejected: AtomicU64::new(0),
        }
    }

    /// Measurements dropped because the engine reported a non-finite value.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn on_measurement(&self, peer: PeerRef, distance: f32, power: f32) {
        if !distance.is_finite() || !power.is_finite() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            debug!("ranging: dropped non-finite sample from {}", peer.short_address);
            return;
        }
        let index = PeerIndex::for_peer(peer);
        let calibrated = self.calibration.apply(index, distance);
        self.table.record_measurement(index, distance, calibrated, power);
        debug!(
            "from: {}, distance: {:.3}, caldistance: {:.3}, power: {:.1}",
            peer.short_address, distance, calibrated, power
        );
    }

    fn on_liveness(&self, peer: Option<PeerRef>, active: bool) {
        let Some(peer) = peer else { return };
        let index = PeerIndex::for_peer(peer);
        self.table.set_active(index, active);
        debug!(
            "ranging: peer {} (slot {index}) {}",
            peer.short_address,
            if active { "added" } else { "inactive" }
        );
    }
}

impl RangingHandler for RangingEventAdapter {
    fn on_event(&self, event: RangingEvent) {
        match event {
            RangingEvent::Measurement { peer, distance, power } => {
                self.on_measurement(peer, distance, power)
            }
            RangingEvent::PeerJoined(peer) => self.on_liveness(peer, true),
            RangingEvent::PeerInactive(peer) => self.on_liveness(peer, false),
        }
    }
}
