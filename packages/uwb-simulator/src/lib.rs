//! # uwb-simulator
//!
//! Hardware-free ranging engine for the UWB node core. It produces the same
//! [`uwb_types::RangingEvent`] stream the DW1000 driver would: peers joining,
//! noisy two-way-ranging results with received power, and peers timing out.

pub mod engine;
pub mod physics;

pub use engine::{SimConfig, SimPeer, SimulatedEngine};
pub use physics::{RadioConfig, Vec3};
