use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::peers::{PeerIndex, PEER_SLOTS};

// ─── Peer Slot ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PeerSlot {
    /// Last reported uncalibrated distance, meters
    pub raw_distance: f32,
    /// `scale * raw_distance + offset` at the time of the measurement
    pub calibrated_distance: f32,
    /// Last reported received power, dBm
    pub rx_power: f32,
    pub active: bool,
}

/// Point-in-time copy of the whole table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeerSnapshot {
    pub slots: [PeerSlot; PEER_SLOTS],
    /// Number of mutations applied to the table when the copy was taken
    pub generation: u64,
}

impl PeerSnapshot {
    pub fn slot(&self, index: PeerIndex) -> &PeerSlot {
        &self.slots[index.get()]
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }
}

// ─── Peer State Table ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Table {
    slots: [PeerSlot; PEER_SLOTS],
    generation: u64,
}

/// Per-peer measurement and liveness state shared by the ranging engine
/// callback and the link tasks.
///
/// One mutex covers the whole table, so every snapshot is a consistent copy
/// and no reader ever sees a partially written slot. Critical sections are a
/// handful of stores; nothing awaits or allocates while the lock is held.
#[derive(Default)]
pub struct PeerStateTable {
    inner: Mutex<Table>,
}

impl PeerStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        // no code path panics while holding the lock; a poisoned table is
        // still a valid table
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate(&self, index: PeerIndex, f: impl FnOnce(&mut PeerSlot)) {
        let mut table = self.lock();
        f(&mut table.slots[index.get()]);
        table.generation += 1;
    }

    pub fn update_distance(&self, index: PeerIndex, value: f32) {
        self.mutate(index, |s| s.raw_distance = value);
    }

    pub fn update_calibrated_distance(&self, index: PeerIndex, value: f32) {
        self.mutate(index, |s| s.calibrated_distance = value);
    }

    pub fn update_power(&self, index: PeerIndex, value: f32) {
        self.mutate(index, |s| s.rx_power = value);
    }

    pub fn set_active(&self, index: PeerIndex, active: bool) {
        self.mutate(index, |s| s.active = active);
    }

    /// Store a full measurement (raw, then calibrated, then power) under a
    /// single lock acquisition.
    pub fn record_measurement(&self, index: PeerIndex, raw: f32, calibrated: f32, power: f32) {
        self.mutate(index, |s| {
            s.raw_distance = raw;
            s.calibrated_distance = calibrated;
            s.rx_power = power;
        });
    }

    pub fn read_snapshot(&self) -> PeerSnapshot {
        let table = self.lock();
        PeerSnapshot {
            slots: table.slots,
            generation: table.generation,
        }
    }
}
