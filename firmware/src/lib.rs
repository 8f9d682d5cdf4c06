//! # uwb-node
//!
//! Core of a UWB ranging node: peer state shared between the ranging engine
//! and the host link, persistent per-anchor calibration, the periodic
//! 128-byte telemetry frame and the 24-byte command channel.

pub mod calibration;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod peers;
pub mod ranging;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use context::NodeContext;
pub use error::NodeError;
