//! engine.rs: simulated ranging engine
//!
//! Stands in for the DW1000 ranging driver. Every cycle the node ranges each
//! configured peer, and the engine reports through a [`RangingHandler`]:
//!   - `PeerJoined` the first time a peer answers (or answers again after
//!     going quiet)
//!   - `Measurement` for every answered ranging exchange
//!   - `PeerInactive` once a live peer has been silent for
//!     `inactive_after_cycles`

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uwb_types::{EngineInit, PeerRef, RangingEvent, RangingHandler};

use crate::physics::{sample_link, RadioConfig, Vec3};

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimPeer {
    pub short_address: u16,
    pub position: Vec3,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Position of this node's antenna
    pub position: Vec3,
    pub peers: Vec<SimPeer>,
    /// Ranging cycles per second
    pub rate_hz: f64,
    pub inactive_after_cycles: u32,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
    pub radio: RadioConfig,
}

impl Default for SimConfig {
    /// Tag in the middle of a 5 m × 3 m room with four ceiling anchors.
    fn default() -> Self {
        let anchor = |addr, x, y| SimPeer { short_address: addr, position: Vec3::new(x, y, 2.5) };
        Self {
            position: Vec3::new(2.5, 1.5, 1.0),
            peers: vec![
                anchor(0, 0.0, 0.0),
                anchor(1, 5.0, 0.0),
                anchor(2, 5.0, 3.0),
                anchor(3, 0.0, 3.0),
            ],
            rate_hz: 10.0,
            inactive_after_cycles: 10,
            seed: None,
            radio: RadioConfig::default(),
        }
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

struct PeerTrack {
    peer: SimPeer,
    last_heard: u64,
    live: bool,
}

pub struct SimulatedEngine {
    init: EngineInit,
    position: Vec3,
    radio: RadioConfig,
    period: Duration,
    inactive_after: u64,
    rng: StdRng,
    tracks: Vec<PeerTrack>,
    cycle: u64,
}

impl SimulatedEngine {
    pub fn new(init: EngineInit, cfg: SimConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let rate = if cfg.rate_hz > 0.0 { cfg.rate_hz } else { 10.0 };
        // a node never ranges against itself
        let tracks = cfg
            .peers
            .into_iter()
            .filter(|p| p.short_address != init.short_address)
            .map(|peer| PeerTrack { peer, last_heard: 0, live: false })
            .collect();

        Self {
            init,
            position: cfg.position,
            radio: cfg.radio,
            period: Duration::from_secs_f64(1.0 / rate),
            inactive_after: u64::from(cfg.inactive_after_cycles.max(1)),
            rng,
            tracks,
            cycle: 0,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.tracks.len()
    }

    /// Run one ranging cycle against every peer. Returns the number of
    /// measurements reported.
    pub fn step(&mut self, handler: &dyn RangingHandler) -> usize {
        let mut reported = 0;
        for track in self.tracks.iter_mut() {
            let peer = PeerRef::new(track.peer.short_address);
            match sample_link(&self.position, &track.peer.position, &self.radio, &mut self.rng) {
                Some(sample) => {
                    if !track.live {
                        track.live = true;
                        handler.on_event(RangingEvent::PeerJoined(Some(peer)));
                    }
                    track.last_heard = self.cycle;
                    handler.on_event(RangingEvent::Measurement {
                        peer,
                        distance: sample.range_m,
                        power: sample.rx_power_dbm,
                    });
                    reported += 1;
                }
                None => {
                    if track.live && self.cycle - track.last_heard >= self.inactive_after {
                        track.live = false;
                        debug!("sim: peer {} went quiet", peer.short_address);
                        handler.on_event(RangingEvent::PeerInactive(Some(peer)));
                    }
                }
            }
        }
        self.cycle += 1;
        reported
    }

    /// Drive the engine on its own task until the runtime shuts down.
    pub fn spawn(mut self, handler: Arc<dyn RangingHandler>) -> JoinHandle<()> {
        info!(
            "📡 Simulated ranging engine: {} addr={} id={} | {} kbps, {} MHz PRF, preamble {} | \
             pins rst={} cs={} irq={} sck={} miso={} mosi={}",
            self.init.role,
            self.init.short_address,
            self.init.device_id,
            self.init.radio.data_rate_kbps,
            self.init.radio.pulse_freq_mhz,
            self.init.radio.preamble_len,
            self.init.pins.reset,
            self.init.pins.chip_select,
            self.init.pins.irq,
            self.init.pins.spi_sck,
            self.init.pins.spi_miso,
            self.init.pins.spi_mosi,
        );
        info!("📡 Ranging {} peers every {:?}", self.tracks.len(), self.period);

        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.step(handler.as_ref());
            }
        })
    }
}
