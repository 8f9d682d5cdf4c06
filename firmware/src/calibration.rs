//! # calibration
//!
//! Per-peer linear distance correction `calibrated = scale * raw + offset`,
//! persisted in the node's EEPROM.
//!
//! ## Record layout (offset 0)
//! | bytes  | content                                    |
//! |--------|--------------------------------------------|
//! | 0..32  | `scale[8]`, f32 little-endian              |
//! | 32..64 | `offset[8]`, f32 little-endian             |
//! | 64..68 | first 4 bytes of SHA-256 over bytes 0..64  |
//!
//! A blank store, a checksum mismatch or a non-finite value all load as the
//! all-zero parameter set: calibrated distances read 0 until the host sends a
//! calibration. That is the accepted cold-start state, not an error.
//!
//! ## Update ordering
//! `update_kb` writes and commits the new record before the live parameters
//! change. A failed commit leaves both the durable record and the live
//! parameters as they were.

use std::sync::{Mutex, MutexGuard, PoisonError};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::peers::{PeerIndex, PEER_SLOTS};
use crate::storage::NvStore;

pub const CALIBRATION_OFFSET: usize = 0;
const BODY_LEN: usize = PEER_SLOTS * 4 * 2;
const CHECKSUM_LEN: usize = 4;
pub const CALIBRATION_RECORD_LEN: usize = BODY_LEN + CHECKSUM_LEN;
const COMMIT_ATTEMPTS: u32 = 3;

// ── Parameters ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationParams {
    pub scale: [f32; PEER_SLOTS],
    pub offset: [f32; PEER_SLOTS],
}

impl CalibrationParams {
    pub fn apply(&self, index: PeerIndex, raw: f32) -> f32 {
        self.scale[index.get()] * raw + self.offset[index.get()]
    }

    pub fn with_pair(mut self, index: PeerIndex, scale: f32, offset: f32) -> Self {
        self.scale[index.get()] = scale;
        self.offset[index.get()] = offset;
        self
    }

    pub fn encode_record(&self) -> [u8; CALIBRATION_RECORD_LEN] {
        let mut record = [0u8; CALIBRATION_RECORD_LEN];
        let values = self.scale.iter().chain(self.offset.iter());
        for (chunk, v) in record[..BODY_LEN].chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        let checksum = body_checksum(&record[..BODY_LEN]);
        record[BODY_LEN..].copy_from_slice(&checksum);
        record
    }

    pub fn decode_record(record: &[u8; CALIBRATION_RECORD_LEN]) -> Result<Self, RecordError> {
        if record.iter().all(|b| *b == 0xFF) || record.iter().all(|b| *b == 0x00) {
            return Err(RecordError::Blank);
        }
        let (body, stored) = record.split_at(BODY_LEN);
        let computed = body_checksum(body);
        if stored != computed.as_slice() {
            return Err(RecordError::Checksum {
                stored: hex::encode(stored),
                computed: hex::encode(computed),
            });
        }

        let mut params = Self::default();
        let mut floats = body
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        for slot in params.scale.iter_mut().chain(params.offset.iter_mut()) {
            // chunks_exact over BODY_LEN yields exactly 2 * PEER_SLOTS floats
            *slot = floats.next().unwrap_or_default();
        }
        if params.scale.iter().chain(params.offset.iter()).any(|v| !v.is_finite()) {
            return Err(RecordError::NonFinite);
        }
        Ok(params)
    }
}

fn body_checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(body);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("store is blank")]
    Blank,
    #[error("checksum mismatch (stored {stored}, computed {computed})")]
    Checksum { stored: String, computed: String },
    #[error("record holds non-finite values")]
    NonFinite,
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// Owner of the calibration record and of the live parameter set.
///
/// Two locks: `store` serializes every load/save against the backing storage
/// (so a reader never sees a half-written record), `live` guards the in-RAM
/// copy the ranging callback reads. The callback only ever takes `live`, which
/// is never held across storage I/O.
pub struct CalibrationStore {
    store: Mutex<Box<dyn NvStore>>,
    live: Mutex<CalibrationParams>,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CalibrationStore {
    /// Wrap `store` and load the persisted parameters as the live set.
    pub fn open(store: Box<dyn NvStore>) -> Self {
        let this = Self {
            store: Mutex::new(store),
            live: Mutex::new(CalibrationParams::default()),
        };
        let params = this.load();
        *lock(&this.live) = params;
        this
    }

    /// Read the persisted record. Never fails: anything unreadable loads as
    /// the zero default.
    pub fn load(&self) -> CalibrationParams {
        let store = lock(&self.store);
        let mut record = [0u8; CALIBRATION_RECORD_LEN];
        if let Err(e) = store.read(CALIBRATION_OFFSET, &mut record) {
            warn!("Calibration: read failed ({e}), using zero parameters");
            return CalibrationParams::default();
        }
        match CalibrationParams::decode_record(&record) {
            Ok(params) => params,
            Err(RecordError::Blank) => {
                info!("Calibration: store is blank, using zero parameters");
                CalibrationParams::default()
            }
            Err(e) => {
                warn!("Calibration: {e}, using zero parameters");
                CalibrationParams::default()
            }
        }
    }

    /// Write and commit `params`. Does not touch the live set.
    pub fn save(&self, params: &CalibrationParams) -> Result<(), StorageError> {
        let mut store = lock(&self.store);
        Self::persist(&mut **store, params)
    }

    fn persist(store: &mut dyn NvStore, params: &CalibrationParams) -> Result<(), StorageError> {
        store.write(CALIBRATION_OFFSET, &params.encode_record())?;

        let mut attempt = 1;
        loop {
            match store.commit() {
                Ok(()) => return Ok(()),
                Err(e) if attempt < COMMIT_ATTEMPTS => {
                    warn!("Calibration: commit attempt {attempt} failed: {e}");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(StorageError::CommitFailed {
                        attempts: attempt,
                        last: Box::new(e),
                    })
                }
            }
        }
    }

    /// Copy of the live parameters.
    pub fn params(&self) -> CalibrationParams {
        *lock(&self.live)
    }

    /// Calibrate `raw` with the live parameters of `index`.
    pub fn apply(&self, index: PeerIndex, raw: f32) -> f32 {
        lock(&self.live).apply(index, raw)
    }

    /// Set one peer's pair: persist first, then make it live.
    pub fn update_kb(
        &self,
        index: PeerIndex,
        scale: f32,
        offset: f32,
    ) -> Result<CalibrationParams, StorageError> {
        let mut store = lock(&self.store);
        let next = self.params().with_pair(index, scale, offset);
        if let Err(e) = Self::persist(&mut **store, &next) {
            // the working image may hold the unsaved record; put the last
            // committed one back so a later successful commit cannot leak it
            let current = self.params();
            if let Err(restore) = store.write(CALIBRATION_OFFSET, &current.encode_record()) {
                warn!("Calibration: could not restore working record: {restore}");
            }
            return Err(e);
        }
        *lock(&self.live) = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, EEPROM_SIZE};

    fn idx(i: usize) -> PeerIndex {
        PeerIndex::new(i).unwrap()
    }

    fn sample_params() -> CalibrationParams {
        let mut p = CalibrationParams::default();
        for i in 0..PEER_SLOTS {
            p.scale[i] = 1.0 + i as f32 * 0.01;
            p.offset[i] = -0.05 * i as f32;
        }
        p
    }

    #[test]
    fn blank_store_loads_zero_defaults() {
        let cal = CalibrationStore::open(Box::new(MemoryStore::new(EEPROM_SIZE)));
        assert_eq!(cal.params(), CalibrationParams::default());
        assert_eq!(cal.apply(idx(4), 12.5), 0.0);

        let zeroed = CalibrationStore::open(Box::new(MemoryStore::from_bytes(vec![0; EEPROM_SIZE])));
        assert_eq!(zeroed.load(), CalibrationParams::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let mem = MemoryStore::new(EEPROM_SIZE);
        let cal = CalibrationStore::open(Box::new(mem.clone()));
        let params = sample_params();
        cal.save(&params).unwrap();
        assert_eq!(cal.load(), params);

        // survives a power cycle
        let rebooted = CalibrationStore::open(Box::new(mem.power_cycle()));
        assert_eq!(rebooted.params(), params);
    }

    #[test]
    fn save_leaves_live_parameters_alone() {
        let cal = CalibrationStore::open(Box::new(MemoryStore::new(EEPROM_SIZE)));
        cal.save(&sample_params()).unwrap();
        assert_eq!(cal.params(), CalibrationParams::default());
    }

    #[test]
    fn corrupted_record_loads_defaults() {
        let mem = MemoryStore::new(EEPROM_SIZE);
        let cal = CalibrationStore::open(Box::new(mem.clone()));
        cal.save(&sample_params()).unwrap();

        let mut bytes = mem.durable_bytes();
        bytes[5] ^= 0x40;
        let corrupted = CalibrationStore::open(Box::new(MemoryStore::from_bytes(bytes)));
        assert_eq!(corrupted.params(), CalibrationParams::default());
    }

    #[test]
    fn checksum_mismatch_is_reported() {
        let mut record = sample_params().encode_record();
        record[CALIBRATION_RECORD_LEN - 1] ^= 0xFF;
        assert!(matches!(
            CalibrationParams::decode_record(&record),
            Err(RecordError::Checksum { .. })
        ));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut p = sample_params();
        p.scale[2] = f32::NAN;
        assert_eq!(CalibrationParams::decode_record(&p.encode_record()), Err(RecordError::NonFinite));
    }

    #[test]
    fn update_kb_persists_before_applying() {
        let mem = MemoryStore::new(EEPROM_SIZE);
        let cal = CalibrationStore::open(Box::new(mem.clone()));

        cal.update_kb(idx(2), 1.10, 0.20).unwrap();
        assert_eq!(mem.commits(), 1);
        assert!((cal.apply(idx(2), 1.0) - 1.30).abs() < 1e-6);

        let rebooted = CalibrationStore::open(Box::new(mem.power_cycle()));
        assert_eq!(rebooted.params().scale[2], 1.10);
        assert_eq!(rebooted.params().offset[2], 0.20);
    }

    #[test]
    fn transient_commit_failure_is_retried() {
        let mem = MemoryStore::new(EEPROM_SIZE);
        let cal = CalibrationStore::open(Box::new(mem.clone()));
        mem.fail_next_commits(COMMIT_ATTEMPTS - 1);

        cal.update_kb(idx(0), 2.0, 0.5).unwrap();
        assert_eq!(cal.params().scale[0], 2.0);
    }

    #[test]
    fn failed_commit_keeps_previous_calibration() {
        let mem = MemoryStore::new(EEPROM_SIZE);
        let cal = CalibrationStore::open(Box::new(mem.clone()));
        cal.update_kb(idx(1), 1.5, 0.1).unwrap();
        let before = cal.params();

        mem.fail_next_commits(COMMIT_ATTEMPTS);
        let err = cal.update_kb(idx(1), 9.0, 9.0).unwrap_err();
        assert!(matches!(err, StorageError::CommitFailed { attempts: COMMIT_ATTEMPTS, .. }));
        assert_eq!(cal.params(), before);
        assert_eq!(cal.load(), before);

        // the next successful update must not resurrect the rejected pair
        cal.update_kb(idx(3), 1.0, 0.0).unwrap();
        let rebooted = CalibrationStore::open(Box::new(mem.power_cycle()));
        assert_eq!(rebooted.params().scale[1], 1.5);
    }
}
