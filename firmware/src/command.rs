//! # command
//!
//! Inbound command channel. Each cycle the decoder reads one
//! newline-terminated record from the link, reassembles complete
//! [`CommandFrame`]s and dispatches them.
//!
//! A float in the payload may itself contain `0x0A`, which ends the line
//! early. [`CommandAssembler`] therefore joins fragments until a whole frame
//! (header, 24 bytes, sentinel) is present, resynchronises on the next
//! `FF AA` after garbage, and discards a fragment that is still incomplete
//! after a quiet cycle.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uwb_types::{Command, CommandFrame, FrameError, COMMAND_FRAME_SIZE, FRAME_DELIMITER, FRAME_HEADER};

use crate::calibration::CalibrationStore;
use crate::error::TransportError;
use crate::peers::PeerIndex;
use crate::transport::LineReader;

/// Longest record read from the link in one cycle.
pub const MAX_RECORD_LEN: usize = 64;

// ── Assembler ─────────────────────────────────────────────────────────────────

/// One unit of output from the assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum Assembled {
    Frame(CommandFrame),
    Malformed(FrameError),
}

#[derive(Debug, Default)]
pub struct CommandAssembler {
    buf: Vec<u8>,
}

impl CommandAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Append a record and return every frame it completed.
    pub fn push(&mut self, record: &[u8]) -> Vec<Assembled> {
        self.buf.extend_from_slice(record);
        let mut out = Vec::new();
        loop {
            match self.buf.windows(2).position(|w| w == FRAME_HEADER) {
                Some(0) => {}
                Some(start) => {
                    debug!("command: skipped {start} bytes before header");
                    self.buf.drain(..start);
                }
                None => {
                    // a trailing 0xFF may be the first half of a header
                    let keep = usize::from(self.buf.last() == Some(&FRAME_HEADER[0]));
                    let skip = self.buf.len() - keep;
                    if skip > 0 {
                        debug!("command: discarded {skip} bytes without header");
                    }
                    self.buf.drain(..skip);
                    return out;
                }
            }
            if self.buf.len() < COMMAND_FRAME_SIZE {
                return out;
            }
            match CommandFrame::decode(&self.buf[..COMMAND_FRAME_SIZE]) {
                Ok(frame) => {
                    self.buf.drain(..COMMAND_FRAME_SIZE);
                    out.push(Assembled::Frame(frame));
                }
                Err(e) => {
                    // drop this header and look for the next one
                    self.buf.drain(..FRAME_HEADER.len());
                    out.push(Assembled::Malformed(e));
                }
            }
        }
    }

    /// Throw away an incomplete fragment. Returns the number of bytes dropped.
    pub fn expire(&mut self) -> usize {
        let n = self.buf.len();
        self.buf.clear();
        n
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    CalibrationUpdated { index: PeerIndex, scale: f32, offset: f32 },
    /// Position commands are accepted but have no effect on the node
    PositionIgnored { index: u8 },
    UnknownCommand { code: u8 },
    /// Frame failed length/header/sentinel validation
    Malformed(FrameError),
    IndexOutOfRange { index: u8 },
    /// Non-finite calibration values
    InvalidPayload { index: u8 },
    StorageFailed { index: PeerIndex },
}

pub struct CommandDecoder<R> {
    reader: LineReader<R>,
    calibration: Arc<CalibrationStore>,
    assembler: CommandAssembler,
    period: Duration,
}

impl<R: AsyncRead + Unpin> CommandDecoder<R> {
    pub fn new(reader: LineReader<R>, calibration: Arc<CalibrationStore>, period: Duration) -> Self {
        Self {
            reader,
            calibration,
            assembler: CommandAssembler::new(),
            period,
        }
    }

    /// Apply one decoded command.
    pub fn dispatch(&self, command: Command) -> CommandOutcome {
        match command {
            Command::SetCalibration { index, scale, offset } => {
                let Some(slot) = PeerIndex::new(usize::from(index)) else {
                    warn!("command: calibration for slot {index} rejected (out of range)");
                    return CommandOutcome::IndexOutOfRange { index };
                };
                if !scale.is_finite() || !offset.is_finite() {
                    warn!("command: calibration for slot {index} rejected (non-finite)");
                    return CommandOutcome::InvalidPayload { index };
                }
                match self.calibration.update_kb(slot, scale, offset) {
                    Ok(_) => {
                        info!("Parameter updated! anchor {slot}: k = {scale:.4}, b = {offset:.4}");
                        CommandOutcome::CalibrationUpdated { index: slot, scale, offset }
                    }
                    Err(e) => {
                        warn!("command: calibration for slot {slot} not saved: {e}");
                        CommandOutcome::StorageFailed { index: slot }
                    }
                }
            }
            Command::SetPosition { index, position } => {
                info!(
                    "command: position for anchor {index} ({:.2}, {:.2}, {:.2}) accepted, not applied",
                    position.x, position.y, position.z
                );
                CommandOutcome::PositionIgnored { index }
            }
            Command::Unknown { code, .. } => {
                debug!("command: ignoring unknown code 0x{code:02X}");
                CommandOutcome::UnknownCommand { code }
            }
        }
    }

    /// Run one read/dispatch cycle.
    pub async fn poll_once(&mut self) -> Result<Vec<CommandOutcome>, TransportError> {
        let record = self.reader.read_until(FRAME_DELIMITER, MAX_RECORD_LEN).await?;
        if record.is_empty() {
            let dropped = self.assembler.expire();
            if dropped > 0 {
                debug!("command: dropped {dropped}-byte incomplete frame");
            }
            return Ok(Vec::new());
        }

        let outcomes = self
            .assembler
            .push(&record)
            .into_iter()
            .map(|item| match item {
                Assembled::Frame(frame) => self.dispatch(Command::from_frame(&frame)),
                Assembled::Malformed(e) => {
                    warn!("command: dropped malformed frame: {e}");
                    CommandOutcome::Malformed(e)
                }
            })
            .collect();
        Ok(outcomes)
    }

    /// Poll the link every period. Returns once the host has closed its
    /// sending side; read errors only cost the current cycle.
    pub async fn run(mut self) -> Result<(), TransportError> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("📥 Command channel polling every {:?}", self.period);

        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(_) => {}
                Err(TransportError::Closed) => {
                    info!("command: host input closed");
                    return Ok(());
                }
                Err(e) => warn!("command: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, EEPROM_SIZE};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};
    use uwb_types::Position;

    fn decoder() -> (CommandDecoder<DuplexStream>, DuplexStream, Arc<CalibrationStore>, MemoryStore) {
        let (host, node) = duplex(1024);
        let mem = MemoryStore::new(EEPROM_SIZE);
        let cal = Arc::new(CalibrationStore::open(Box::new(mem.clone())));
        let reader = LineReader::new(node, Duration::from_millis(30));
        (CommandDecoder::new(reader, cal.clone(), Duration::from_millis(10)), host, cal, mem)
    }

    fn calibration(index: u8, scale: f32, offset: f32) -> [u8; COMMAND_FRAME_SIZE] {
        Command::SetCalibration { index, scale, offset }.encode()
    }

    #[test]
    fn assembler_passes_whole_frames() {
        let mut asm = CommandAssembler::new();
        let out = asm.push(&calibration(1, 1.0, 0.0));
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Assembled::Frame(_)));
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn assembler_joins_a_frame_split_by_a_newline_byte() {
        // 0x0A inside the scale float ends the first line early
        let scale = f32::from_le_bytes([0x0A, 0x00, 0x80, 0x3F]);
        let bytes = calibration(0, scale, 0.0);
        let cut = bytes.iter().position(|b| *b == b'\n').unwrap() + 1;
        assert!(cut < COMMAND_FRAME_SIZE);

        let mut asm = CommandAssembler::new();
        assert!(asm.push(&bytes[..cut]).is_empty());
        let out = asm.push(&bytes[cut..]);
        assert_eq!(out, vec![Assembled::Frame(CommandFrame::decode(&bytes).unwrap())]);
    }

    #[test]
    fn assembler_resyncs_after_garbage() {
        let mut record = b"hello".to_vec();
        record.extend_from_slice(&calibration(4, 1.0, 0.1));
        let mut asm = CommandAssembler::new();
        let out = asm.push(&record);
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Assembled::Frame(f) if f.target == 4));
    }

    #[test]
    fn assembler_reports_bad_sentinel() {
        let mut bytes = calibration(1, 1.0, 0.0);
        bytes[18] = 0x11;
        let mut asm = CommandAssembler::new();
        let out = asm.push(&bytes);
        assert!(matches!(out.as_slice(), [Assembled::Malformed(FrameError::Tail(_))]));
    }

    #[test]
    fn expire_drops_stale_fragment() {
        let mut asm = CommandAssembler::new();
        asm.push(&calibration(1, 1.0, 0.0)[..10]);
        assert_eq!(asm.expire(), 10);
        assert_eq!(asm.pending(), 0);
    }

    #[tokio::test]
    async fn set_calibration_updates_and_persists() {
        let (mut dec, mut host, cal, mem) = decoder();
        host.write_all(&calibration(2, 1.10, 0.20)).await.unwrap();

        let outcomes = dec.poll_once().await.unwrap();
        assert_eq!(
            outcomes,
            vec![CommandOutcome::CalibrationUpdated {
                index: PeerIndex::new(2).unwrap(),
                scale: 1.10,
                offset: 0.20
            }]
        );
        assert!((cal.apply(PeerIndex::new(2).unwrap(), 1.0) - 1.30).abs() < 1e-6);
        assert_eq!(mem.commits(), 1);
    }

    #[tokio::test]
    async fn out_of_range_index_is_rejected() {
        let (mut dec, mut host, cal, mem) = decoder();
        host.write_all(&calibration(8, 5.0, 5.0)).await.unwrap();

        let outcomes = dec.poll_once().await.unwrap();
        assert_eq!(outcomes, vec![CommandOutcome::IndexOutOfRange { index: 8 }]);
        assert_eq!(cal.params(), Default::default());
        assert_eq!(mem.commits(), 0);
    }

    #[tokio::test]
    async fn position_and_unknown_commands_are_inert() {
        let (mut dec, mut host, cal, _) = decoder();
        let position = Command::SetPosition { index: 1, position: Position::new(1.0, 2.0, 0.0) };
        host.write_all(&position.encode()).await.unwrap();
        assert_eq!(dec.poll_once().await.unwrap(), vec![CommandOutcome::PositionIgnored { index: 1 }]);

        host.write_all(&CommandFrame::new(0x09, 0, [0.0; 3]).encode()).await.unwrap();
        assert_eq!(dec.poll_once().await.unwrap(), vec![CommandOutcome::UnknownCommand { code: 0x09 }]);
        assert_eq!(cal.params(), Default::default());
    }

    #[tokio::test]
    async fn short_record_is_dropped_after_quiet_cycle() {
        let (mut dec, mut host, cal, _) = decoder();
        host.write_all(&[0xFF, 0xAA, 0x01, 0x02, b'\n']).await.unwrap();
        assert!(dec.poll_once().await.unwrap().is_empty());
        // nothing more arrives: the fragment is discarded
        assert!(dec.poll_once().await.unwrap().is_empty());
        assert_eq!(dec.assembler.pending(), 0);

        // the next complete frame is still accepted
        host.write_all(&calibration(0, 2.0, 0.0)).await.unwrap();
        assert_eq!(dec.poll_once().await.unwrap().len(), 1);
        assert_eq!(cal.params().scale[0], 2.0);
    }

    #[tokio::test]
    async fn non_finite_calibration_is_rejected() {
        let (mut dec, mut host, cal, _) = decoder();
        host.write_all(&calibration(3, f32::NAN, 0.0)).await.unwrap();
        assert_eq!(dec.poll_once().await.unwrap(), vec![CommandOutcome::InvalidPayload { index: 3 }]);
        assert_eq!(cal.params().scale[3], 0.0);
    }

    #[tokio::test]
    async fn storage_failure_is_reported_and_not_applied() {
        let (mut dec, mut host, cal, mem) = decoder();
        mem.fail_next_commits(10);
        host.write_all(&calibration(5, 1.2, 0.0)).await.unwrap();
        assert_eq!(
            dec.poll_once().await.unwrap(),
            vec![CommandOutcome::StorageFailed { index: PeerIndex::new(5).unwrap() }]
        );
        assert_eq!(cal.params().scale[5], 0.0);
    }

    #[tokio::test]
    async fn run_returns_quietly_when_host_input_ends() {
        let (dec, mut host, cal, _) = decoder();
        host.write_all(&calibration(6, 1.25, 0.0)).await.unwrap();
        drop(host);

        let result = tokio::time::timeout(Duration::from_secs(5), dec.run()).await.unwrap();
        assert!(result.is_ok());
        assert_eq!(cal.params().scale[6], 1.25);
    }
}
