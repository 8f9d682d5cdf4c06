//! Engine callbacks, telemetry snapshots and calibration updates racing each
//! other must never produce a torn slot or a torn calibration pair.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use uwb_node::calibration::CalibrationStore;
use uwb_node::peers::{PeerIndex, PEER_SLOTS};
use uwb_node::ranging::RangingEventAdapter;
use uwb_node::state::PeerStateTable;
use uwb_node::storage::{MemoryStore, EEPROM_SIZE};
use uwb_node::telemetry::encode_snapshot;
use uwb_types::{PeerRef, RangingEvent, RangingHandler, TELEMETRY_FRAME_SIZE};

const WRITERS: u64 = 4;
const EVENTS_PER_WRITER: usize = 5_000;

fn calibrated_store() -> Arc<CalibrationStore> {
    let cal = Arc::new(CalibrationStore::open(Box::new(MemoryStore::new(EEPROM_SIZE))));
    for i in PeerIndex::all() {
        cal.update_kb(i, 2.0, 1.0).unwrap();
    }
    cal
}

#[test]
fn snapshots_never_see_half_written_measurements() {
    let table = Arc::new(PeerStateTable::new());
    let adapter = Arc::new(RangingEventAdapter::new(table.clone(), calibrated_store()));
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..WRITERS)
        .map(|seed| {
            let adapter = adapter.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..EVENTS_PER_WRITER {
                    let peer = PeerRef::new(rng.gen_range(0..32));
                    let event = match rng.gen_range(0..10) {
                        0 => RangingEvent::PeerJoined(Some(peer)),
                        1 => RangingEvent::PeerInactive(Some(peer)),
                        _ => RangingEvent::Measurement {
                            peer,
                            distance: rng.gen_range(0.1f32..30.0),
                            power: rng.gen_range(-100.0f32..-60.0),
                        },
                    };
                    adapter.on_event(event);
                }
            })
        })
        .collect();

    let reader = {
        let table = table.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut last_generation = 0;
            let mut reads = 0u64;
            while !done.load(Ordering::Acquire) {
                let snap = table.read_snapshot();
                assert!(snap.generation >= last_generation);
                last_generation = snap.generation;
                for slot in &snap.slots {
                    if slot.raw_distance != 0.0 {
                        assert_eq!(slot.calibrated_distance, 2.0 * slot.raw_distance + 1.0);
                        assert!(slot.rx_power < -59.0);
                    }
                }
                assert_eq!(encode_snapshot(&snap).encode().len(), TELEMETRY_FRAME_SIZE);
                reads += 1;
            }
            reads
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    done.store(true, Ordering::Release);
    assert!(reader.join().unwrap() > 0);
    assert!(table.read_snapshot().generation > 0);
}

#[test]
fn calibration_pairs_are_never_mixed() {
    let cal = Arc::new(CalibrationStore::open(Box::new(MemoryStore::new(EEPROM_SIZE))));
    let done = Arc::new(AtomicBool::new(false));

    let updaters: Vec<_> = (0..2u64)
        .map(|seed| {
            let cal = cal.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + seed);
                for _ in 0..500 {
                    let i = PeerIndex::new(rng.gen_range(0..PEER_SLOTS)).unwrap();
                    let scale = rng.gen_range(0.5f32..1.5);
                    cal.update_kb(i, scale, scale * 10.0).unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let cal = cal.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let params = cal.params();
                for i in 0..PEER_SLOTS {
                    assert_eq!(params.offset[i], params.scale[i] * 10.0);
                }
            }
        })
    };

    for u in updaters {
        u.join().unwrap();
    }
    done.store(true, Ordering::Release);
    reader.join().unwrap();
}
