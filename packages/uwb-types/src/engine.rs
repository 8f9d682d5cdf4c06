//! Interface between the node core and the UWB ranging engine.
//!
//! The engine (DW1000 driver on hardware, `uwb-simulator` on a host) owns the
//! radio and reports what it sees through [`RangingHandler`]. The core never
//! calls into the engine after start-up.

use serde::{Deserialize, Serialize};

use crate::NodeRole;

/// Identity of a remote node as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRef {
    pub short_address: u16,
}

impl PeerRef {
    pub fn new(short_address: u16) -> Self {
        Self { short_address }
    }
}

/// Everything the engine can tell the core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangingEvent {
    /// New two-way ranging result
    Measurement { peer: PeerRef, distance: f32, power: f32 },
    /// Peer started answering. `None` when the driver lost track of the device.
    PeerJoined(Option<PeerRef>),
    /// Peer timed out
    PeerInactive(Option<PeerRef>),
}

/// Receiver for engine events.
///
/// Called from the engine's own context, possibly while other tasks are in the
/// middle of their work. Implementations must return quickly and must not wait
/// on anything but short critical sections.
pub trait RangingHandler: Send + Sync {
    fn on_event(&self, event: RangingEvent);
}

impl<F> RangingHandler for F
where
    F: Fn(RangingEvent) + Send + Sync,
{
    fn on_event(&self, event: RangingEvent) {
        self(event)
    }
}

// ── Engine start-up parameters ───────────────────────────────────────────────

/// Board wiring handed to the radio driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnginePins {
    pub reset: u8,
    pub chip_select: u8,
    pub irq: u8,
    pub spi_sck: u8,
    pub spi_miso: u8,
    pub spi_mosi: u8,
}

impl Default for EnginePins {
    /// ESP32-C3 / ESP32-S3 carrier board
    fn default() -> Self {
        Self {
            reset: 8,
            chip_select: 7,
            irq: 6,
            spi_sck: 2,
            spi_miso: 10,
            spi_mosi: 3,
        }
    }
}

/// Radio PHY settings. Defaults: 6.8 Mbps, 16 MHz PRF, 64-symbol preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioMode {
    pub data_rate_kbps: u32,
    pub pulse_freq_mhz: u8,
    pub preamble_len: u16,
}

impl Default for RadioMode {
    fn default() -> Self {
        Self {
            data_rate_kbps: 6800,
            pulse_freq_mhz: 16,
            preamble_len: 64,
        }
    }
}

pub const DEFAULT_DEVICE_ID: &str = "5B:D5:A9:9A:E2:9C";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInit {
    pub role: NodeRole,
    pub short_address: u16,
    /// EUI string the driver derives its long address from
    pub device_id: String,
    pub radio: RadioMode,
    pub pins: EnginePins,
}

impl EngineInit {
    pub fn new(role: NodeRole, short_address: u16) -> Self {
        Self {
            role,
            short_address,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            radio: RadioMode::default(),
            pins: EnginePins::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closures_are_handlers() {
        let seen = Mutex::new(Vec::new());
        let handler = |ev: RangingEvent| seen.lock().unwrap().push(ev);
        handler.on_event(RangingEvent::PeerJoined(Some(PeerRef::new(3))));
        handler.on_event(RangingEvent::PeerInactive(None));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                RangingEvent::PeerJoined(Some(PeerRef::new(3))),
                RangingEvent::PeerInactive(None)
            ]
        );
    }

    #[test]
    fn default_init_uses_board_wiring() {
        let init = EngineInit::new(NodeRole::Tag, 5);
        assert_eq!(init.device_id, DEFAULT_DEVICE_ID);
        assert_eq!(init.pins.irq, 6);
        assert_eq!(init.radio.data_rate_kbps, 6800);
    }
}
