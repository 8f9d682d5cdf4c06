//! # uwb-types
//!
//! Wire frames exchanged between a UWB ranging node and whatever sits on the
//! other end of its serial link.
//!
//! These types are used by:
//! - `firmware`: emitting TelemetryFrames and decoding CommandFrames
//! - `packages/uwb-console`: decoding telemetry and producing commands
//! - `packages/uwb-simulator`: reporting ranging events through [`engine`]
//!
//! ## Wire conventions
//!
//! - Every multi-byte numeric field is a little-endian IEEE-754 `f32`.
//! - Every frame starts with the header `FF AA` and ends with the 8-byte
//!   sentinel `00 00 80 7F 00 00 00 0A` (an `+inf` float, three zero bytes and
//!   a newline), which lets line-oriented readers split the stream.
//! - The `#[repr(C)]` structs below mirror the on-wire layout exactly; their
//!   sizes are pinned by compile-time assertions. Encoding and decoding are
//!   done field by field so the byte order never depends on the host.

pub mod engine;

pub use engine::{
    EngineInit, EnginePins, PeerRef, RadioMode, RangingEvent, RangingHandler, DEFAULT_DEVICE_ID,
};

use bytemuck::{Pod, Zeroable};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Number of peer slots carried by every frame.
pub const MAX_ANCHOR_NUM: usize = 8;

/// Width of the liveness array in a TelemetryFrame (one byte per slot).
pub const LIVENESS_WIDTH: usize = 8;

pub const FRAME_HEADER: [u8; 2] = [0xFF, 0xAA];

/// Command tag that marks a TelemetryFrame.
pub const TELEMETRY_COMMAND: [u8; 2] = [0x01, 0x01];

pub const FRAME_TAIL: [u8; 8] = [0x00, 0x00, 0x80, 0x7F, 0x00, 0x00, 0x00, b'\n'];

/// Line delimiter used by the command channel (last byte of `FRAME_TAIL`).
pub const FRAME_DELIMITER: u8 = b'\n';

pub const COMMAND_SET_CALIBRATION: u8 = 0x01;
pub const COMMAND_SET_POSITION: u8 = 0x02;

pub const TELEMETRY_FRAME_SIZE: usize = std::mem::size_of::<TelemetryFrame>();
pub const COMMAND_FRAME_SIZE: usize = std::mem::size_of::<CommandFrame>();

const _: () = assert!(TELEMETRY_FRAME_SIZE == 128);
const _: () = assert!(COMMAND_FRAME_SIZE == 24);
const _: () = assert!(LIVENESS_WIDTH >= MAX_ANCHOR_NUM);

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame length {actual} does not match expected {expected}")]
    Length { expected: usize, actual: usize },
    #[error("bad frame header {0:02X?}")]
    Header([u8; 2]),
    #[error("unexpected telemetry command tag {0:02X?}")]
    CommandTag([u8; 2]),
    #[error("bad frame sentinel {0:02X?}")]
    Tail([u8; 8]),
}

// ── Node Role ─────────────────────────────────────────────────────────────────

/// Role selected by the mode strap pin at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum NodeRole {
    /// Mobile node, ranges against anchors
    Tag = 0,
    /// Fixed reference point
    Anchor = 1,
}

impl NodeRole {
    /// Mode pin is pulled up: high selects tag, low (jumpered) selects anchor.
    pub fn from_mode_pin(high: bool) -> Self {
        if high {
            Self::Tag
        } else {
            Self::Anchor
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tag => f.write_str("tag"),
            Self::Anchor => f.write_str("anchor"),
        }
    }
}

// ── Position ──────────────────────────────────────────────────────────────────

/// Anchor/tag position in meters. Carried in telemetry, currently always zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

// ── Telemetry Frame (node → host) ─────────────────────────────────────────────

/// Periodic report of every peer slot. 128 bytes on wire.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct TelemetryFrame {
    pub header: [u8; 2],
    pub command: [u8; 2],
    /// Uncalibrated distance per slot, meters
    pub raw_distance: [f32; MAX_ANCHOR_NUM],
    /// `scale * raw + offset` per slot, meters
    pub calibrated_distance: [f32; MAX_ANCHOR_NUM],
    /// Received signal power per slot, dBm
    pub rx_power: [f32; MAX_ANCHOR_NUM],
    pub position: Position,
    /// 1 = peer live, 0 = inactive
    pub liveness: [u8; LIVENESS_WIDTH],
    pub tail: [u8; 8],
}

impl Default for TelemetryFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryFrame {
    /// Frame with constant fields filled in and every measurement zeroed.
    pub fn new() -> Self {
        Self {
            header: FRAME_HEADER,
            command: TELEMETRY_COMMAND,
            tail: FRAME_TAIL,
            ..Zeroable::zeroed()
        }
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.liveness.get(slot).is_some_and(|b| *b != 0)
    }

    pub fn encode(&self) -> [u8; TELEMETRY_FRAME_SIZE] {
        let mut out = [0u8; TELEMETRY_FRAME_SIZE];
        let mut buf = &mut out[..];
        buf.put_slice(&self.header);
        buf.put_slice(&self.command);
        for v in self.raw_distance {
            buf.put_f32_le(v);
        }
        for v in self.calibrated_distance {
            buf.put_f32_le(v);
        }
        for v in self.rx_power {
            buf.put_f32_le(v);
        }
        put_position(&mut buf, &self.position);
        buf.put_slice(&self.liveness);
        buf.put_slice(&self.tail);
        out
    }

    /// Decode one frame. The slice must be exactly one frame long and carry the
    /// telemetry header, command tag and sentinel.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        check_length(bytes, TELEMETRY_FRAME_SIZE)?;
        let mut buf = bytes;

        let header = take_array::<2>(&mut buf);
        if header != FRAME_HEADER {
            return Err(FrameError::Header(header));
        }
        let command = take_array::<2>(&mut buf);
        if command != TELEMETRY_COMMAND {
            return Err(FrameError::CommandTag(command));
        }

        let mut frame = Self::new();
        for v in frame.raw_distance.iter_mut() {
            *v = buf.get_f32_le();
        }
        for v in frame.calibrated_distance.iter_mut() {
            *v = buf.get_f32_le();
        }
        for v in frame.rx_power.iter_mut() {
            *v = buf.get_f32_le();
        }
        frame.position = get_position(&mut buf);
        frame.liveness = take_array::<LIVENESS_WIDTH>(&mut buf);

        let tail = take_array::<8>(&mut buf);
        if tail != FRAME_TAIL {
            return Err(FrameError::Tail(tail));
        }
        Ok(frame)
    }
}

// ── Command Frame (host → node) ───────────────────────────────────────────────

/// Inbound request. 24 bytes on wire, newline-terminated by its sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct CommandFrame {
    pub header: [u8; 2],
    /// `COMMAND_SET_CALIBRATION` or `COMMAND_SET_POSITION`
    pub command: u8,
    /// Target peer slot
    pub target: u8,
    pub data: [f32; 3],
    pub tail: [u8; 8],
}

impl CommandFrame {
    pub fn new(command: u8, target: u8, data: [f32; 3]) -> Self {
        Self {
            header: FRAME_HEADER,
            command,
            target,
            data,
            tail: FRAME_TAIL,
        }
    }

    pub fn encode(&self) -> [u8; COMMAND_FRAME_SIZE] {
        let mut out = [0u8; COMMAND_FRAME_SIZE];
        let mut buf = &mut out[..];
        buf.put_slice(&self.header);
        buf.put_u8(self.command);
        buf.put_u8(self.target);
        for v in self.data {
            buf.put_f32_le(v);
        }
        buf.put_slice(&self.tail);
        out
    }

    /// Decode one frame, validating length, header and sentinel before any
    /// payload field is read.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        check_length(bytes, COMMAND_FRAME_SIZE)?;
        let header: [u8; 2] = [bytes[0], bytes[1]];
        if header != FRAME_HEADER {
            return Err(FrameError::Header(header));
        }
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&bytes[COMMAND_FRAME_SIZE - 8..]);
        if tail != FRAME_TAIL {
            return Err(FrameError::Tail(tail));
        }

        let mut buf = &bytes[2..COMMAND_FRAME_SIZE - 8];
        let command = buf.get_u8();
        let target = buf.get_u8();
        let data = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
        Ok(Self::new(command, target, data))
    }
}

/// Decoded command. Target indices are carried as received; range checks
/// against the peer table belong to the receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetCalibration { index: u8, scale: f32, offset: f32 },
    SetPosition { index: u8, position: Position },
    Unknown { code: u8, index: u8 },
}

impl Command {
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        CommandFrame::decode(bytes).map(|f| Self::from_frame(&f))
    }

    pub fn from_frame(frame: &CommandFrame) -> Self {
        let [a, b, c] = frame.data;
        match frame.command {
            COMMAND_SET_CALIBRATION => Self::SetCalibration {
                index: frame.target,
                scale: a,
                offset: b,
            },
            COMMAND_SET_POSITION => Self::SetPosition {
                index: frame.target,
                position: Position::new(a, b, c),
            },
            code => Self::Unknown {
                code,
                index: frame.target,
            },
        }
    }

    pub fn to_frame(&self) -> CommandFrame {
        match *self {
            Self::SetCalibration { index, scale, offset } => {
                CommandFrame::new(COMMAND_SET_CALIBRATION, index, [scale, offset, 0.0])
            }
            Self::SetPosition { index, position } => CommandFrame::new(
                COMMAND_SET_POSITION,
                index,
                [position.x, position.y, position.z],
            ),
            Self::Unknown { code, index } => CommandFrame::new(code, index, [0.0; 3]),
        }
    }

    pub fn encode(&self) -> [u8; COMMAND_FRAME_SIZE] {
        self.to_frame().encode()
    }
}

// ── Telemetry Scanner ─────────────────────────────────────────────────────────

/// Locates TelemetryFrames in an unaligned byte stream.
///
/// Frames are found by the header followed by the telemetry command tag; a
/// candidate whose sentinel does not match is skipped and counted.
#[derive(Debug, Default)]
pub struct TelemetryScanner {
    buf: BytesMut,
    dropped: u64,
}

impl TelemetryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of candidate frames discarded for a bad sentinel.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn next_frame(&mut self) -> Option<TelemetryFrame> {
        const MARKER: [u8; 4] = [
            FRAME_HEADER[0],
            FRAME_HEADER[1],
            TELEMETRY_COMMAND[0],
            TELEMETRY_COMMAND[1],
        ];
        loop {
            match self.buf.windows(MARKER.len()).position(|w| w == MARKER) {
                Some(start) => self.buf.advance(start),
                None => {
                    // keep a possible partial marker at the end
                    let keep = self.buf.len().min(MARKER.len() - 1);
                    let skip = self.buf.len() - keep;
                    self.buf.advance(skip);
                    return None;
                }
            }
            if self.buf.len() < TELEMETRY_FRAME_SIZE {
                return None;
            }
            match TelemetryFrame::decode(&self.buf[..TELEMETRY_FRAME_SIZE]) {
                Ok(frame) => {
                    self.buf.advance(TELEMETRY_FRAME_SIZE);
                    return Some(frame);
                }
                Err(_) => {
                    self.dropped += 1;
                    self.buf.advance(1);
                }
            }
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn check_length(bytes: &[u8], expected: usize) -> Result<(), FrameError> {
    if bytes.len() != expected {
        return Err(FrameError::Length {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn take_array<const L: usize>(buf: &mut &[u8]) -> [u8; L] {
    let mut out = [0u8; L];
    buf.copy_to_slice(&mut out);
    out
}

fn put_position(buf: &mut impl BufMut, p: &Position) {
    buf.put_f32_le(p.x);
    buf.put_f32_le(p.y);
    buf.put_f32_le(p.z);
}

fn get_position(buf: &mut impl Buf) -> Position {
    Position::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le())
}
