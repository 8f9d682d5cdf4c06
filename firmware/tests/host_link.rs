//! End-to-end behaviour of a node over an in-memory host link.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use uwb_node::calibration::CalibrationStore;
use uwb_node::config::{NodeConfig, Timing};
use uwb_node::error::TransportError;
use uwb_node::peers::PeerIndex;
use uwb_node::storage::{MemoryStore, EEPROM_SIZE};
use uwb_node::NodeContext;
use uwb_types::{
    Command, NodeRole, PeerRef, Position, RangingEvent, RangingHandler, TelemetryFrame,
    TELEMETRY_FRAME_SIZE,
};

const DEADLINE: Duration = Duration::from_secs(5);

fn timing() -> Timing {
    Timing {
        telemetry_period: Duration::from_millis(10),
        command_period: Duration::from_millis(10),
        read_timeout: Duration::from_millis(20),
        write_timeout: Duration::from_millis(200),
    }
}

fn node(store: MemoryStore) -> Arc<NodeContext> {
    let cfg = NodeConfig::new(NodeRole::Tag, 7).unwrap();
    Arc::new(NodeContext::new(cfg, timing(), Box::new(store)))
}

struct Host {
    rx: ReadHalf<DuplexStream>,
    tx: tokio::io::WriteHalf<DuplexStream>,
    link: JoinHandle<Result<(), TransportError>>,
}

fn connect(ctx: &Arc<NodeContext>) -> Host {
    let (host, node) = duplex(16 * 1024);
    let (node_rx, node_tx) = split(node);
    let ctx = ctx.clone();
    let link = tokio::spawn(async move { ctx.run_link(node_rx, node_tx).await });
    let (rx, tx) = split(host);
    Host { rx, tx, link }
}

impl Host {
    async fn send(&mut self, command: Command) {
        self.tx.write_all(&command.encode()).await.unwrap();
    }

    async fn frame(&mut self) -> TelemetryFrame {
        let mut buf = [0u8; TELEMETRY_FRAME_SIZE];
        self.rx.read_exact(&mut buf).await.unwrap();
        TelemetryFrame::decode(&buf).expect("every frame on the link is well formed")
    }

    /// Read frames until one satisfies `pred`.
    async fn frame_where(&mut self, pred: impl Fn(&TelemetryFrame) -> bool) -> TelemetryFrame {
        timeout(DEADLINE, async {
            loop {
                let frame = self.frame().await;
                if pred(&frame) {
                    return frame;
                }
            }
        })
        .await
        .expect("expected frame never arrived")
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    timeout(DEADLINE, async {
        while !cond() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

fn idx(i: usize) -> PeerIndex {
    PeerIndex::new(i).unwrap()
}

#[tokio::test]
async fn calibration_command_changes_reported_distance() {
    let ctx = node(MemoryStore::new(EEPROM_SIZE));
    let adapter = ctx.adapter();
    let mut host = connect(&ctx);

    host.send(Command::SetCalibration { index: 3, scale: 1.02, offset: -0.05 }).await;
    wait_for(|| ctx.calibration().params().scale[3] == 1.02).await;

    adapter.on_event(RangingEvent::PeerJoined(Some(PeerRef::new(19))));
    adapter.on_event(RangingEvent::Measurement {
        peer: PeerRef::new(19),
        distance: 2.50,
        power: -80.0,
    });

    let frame = host.frame_where(|f| f.raw_distance[3] == 2.50).await;
    assert!((frame.calibrated_distance[3] - 2.50).abs() < 1e-5);
    assert_eq!(frame.rx_power[3], -80.0);
    assert!(frame.is_active(3));
    assert_eq!(frame.position, Position::default());
}

#[tokio::test]
async fn idle_node_reports_zeros() {
    let ctx = node(MemoryStore::new(EEPROM_SIZE));
    let mut host = connect(&ctx);

    let frame = host.frame().await;
    assert_eq!(frame.raw_distance, [0.0; 8]);
    assert_eq!(frame.calibrated_distance, [0.0; 8]);
    assert_eq!(frame.liveness, [0; 8]);
}

#[tokio::test]
async fn inactive_peer_clears_its_liveness_byte() {
    let ctx = node(MemoryStore::new(EEPROM_SIZE));
    let adapter = ctx.adapter();
    let mut host = connect(&ctx);

    adapter.on_event(RangingEvent::PeerJoined(Some(PeerRef::new(2))));
    host.frame_where(|f| f.is_active(2)).await;

    adapter.on_event(RangingEvent::PeerInactive(Some(PeerRef::new(2))));
    let frame = host.frame_where(|f| !f.is_active(2)).await;
    assert_eq!(frame.liveness, [0; 8]);
}

#[tokio::test]
async fn rejected_commands_leave_calibration_untouched() {
    let store = MemoryStore::new(EEPROM_SIZE);
    let ctx = node(store.clone());
    let mut host = connect(&ctx);

    host.send(Command::SetCalibration { index: 8, scale: 9.0, offset: 9.0 }).await;
    host.send(Command::SetPosition { index: 1, position: Position::new(1.0, 2.0, 3.0) }).await;
    host.send(Command::Unknown { code: 0x7E, index: 0 }).await;
    // garbage followed by a valid frame still gets through
    host.tx.write_all(b"\xFF\x00junk\n").await.unwrap();
    host.send(Command::SetCalibration { index: 0, scale: 1.5, offset: 0.0 }).await;

    wait_for(|| ctx.calibration().params().scale[0] == 1.5).await;
    let params = ctx.calibration().params();
    for i in 1..8 {
        assert_eq!(params.scale[i], 0.0);
        assert_eq!(params.offset[i], 0.0);
    }
    assert_eq!(store.commits(), 1);
}

#[tokio::test]
async fn calibration_survives_power_cycle() {
    let store = MemoryStore::new(EEPROM_SIZE);
    let ctx = node(store.clone());
    let mut host = connect(&ctx);

    host.send(Command::SetCalibration { index: 2, scale: 1.10, offset: 0.20 }).await;
    wait_for(|| ctx.calibration().params().scale[2] == 1.10).await;

    let rebooted = CalibrationStore::open(Box::new(store.power_cycle()));
    assert!((rebooted.apply(idx(2), 1.0) - 1.30).abs() < 1e-6);
    assert_eq!(rebooted.params(), ctx.calibration().params());
}

#[tokio::test]
async fn failed_commit_keeps_previous_calibration() {
    let store = MemoryStore::new(EEPROM_SIZE);
    let ctx = node(store.clone());
    ctx.calibration().update_kb(idx(4), 1.0, 0.1).unwrap();
    let before = ctx.calibration().params();

    store.fail_next_commits(3);
    let mut host = connect(&ctx);
    host.send(Command::SetCalibration { index: 4, scale: 2.0, offset: 0.0 }).await;

    // the command is consumed within a few cycles
    sleep(Duration::from_millis(100)).await;
    assert_eq!(ctx.calibration().params(), before);

    let rebooted = CalibrationStore::open(Box::new(store.power_cycle()));
    assert_eq!(rebooted.params(), before);
}

#[tokio::test]
async fn host_hangup_ends_the_link() {
    let ctx = node(MemoryStore::new(EEPROM_SIZE));
    let mut host = connect(&ctx);
    host.frame().await;

    let Host { rx, tx, link } = host;
    drop(rx);
    drop(tx);
    let result = timeout(DEADLINE, link).await.unwrap().unwrap();
    assert!(matches!(result, Err(TransportError::Closed)));
}
