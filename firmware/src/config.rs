//! # config
//!
//! Boot configuration. On hardware the role and short address come from four
//! strap pins; on a host the same values are read from a TOML file, with
//! optional explicit overrides and environment overrides for the link and
//! storage locations.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;
use uwb_simulator::SimConfig;
use uwb_types::{EngineInit, EnginePins, NodeRole, RadioMode, DEFAULT_DEVICE_ID};

use crate::calibration::{CALIBRATION_OFFSET, CALIBRATION_RECORD_LEN};
use crate::error::ConfigError;
use crate::storage::EEPROM_SIZE;

/// Largest short address the three index straps can express.
pub const MAX_SHORT_ADDRESS: u16 = 7;

// ── Straps ────────────────────────────────────────────────────────────────────

/// Levels read from the strap pins at boot. All pins are pulled up, so an
/// unjumpered board reads every pin high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StrapPins {
    pub mode: bool,
    /// Most significant bit first
    pub index: [bool; 3],
}

impl Default for StrapPins {
    fn default() -> Self {
        Self {
            mode: true,
            index: [true; 3],
        }
    }
}

impl StrapPins {
    pub fn role(&self) -> NodeRole {
        NodeRole::from_mode_pin(self.mode)
    }

    pub fn short_address(&self) -> u16 {
        let [i0, i1, i2] = self.index.map(u16::from);
        4 * i0 + 2 * i1 + i2
    }
}

/// Role and address of this node. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    pub role: NodeRole,
    pub short_address: u16,
}

impl NodeConfig {
    pub fn new(role: NodeRole, short_address: u16) -> Result<Self, ConfigError> {
        if short_address > MAX_SHORT_ADDRESS {
            return Err(ConfigError::ShortAddress(short_address));
        }
        Ok(Self { role, short_address })
    }

    pub fn from_straps(straps: StrapPins) -> Self {
        Self {
            role: straps.role(),
            short_address: straps.short_address(),
        }
    }
}

// ── File Sections ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub straps: StrapPins,
    /// Overrides the mode strap
    pub role: Option<NodeRole>,
    /// Overrides the index straps
    pub short_address: Option<u16>,
    pub device_id: String,
    pub pins: EnginePins,
    pub radio: RadioMode,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            straps: StrapPins::default(),
            role: None,
            short_address: None,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            pins: EnginePins::default(),
            radio: RadioMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    /// TCP address the serial bridge listens on
    pub listen: SocketAddr,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 7800)),
            read_timeout_ms: 100,
            write_timeout_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// File backing the emulated EEPROM
    pub eeprom: PathBuf,
    pub size: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            eeprom: PathBuf::from("uwb-eeprom.bin"),
            size: EEPROM_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub telemetry_period_ms: u64,
    pub command_period_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            telemetry_period_ms: 100,
            command_period_ms: 100,
        }
    }
}

/// Task periods and link timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub telemetry_period: Duration,
    pub command_period: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

// ── File Config ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub node: NodeSection,
    pub transport: TransportSection,
    pub storage: StorageSection,
    pub timing: TimingSection,
    pub simulator: SimConfig,
}

impl FileConfig {
    pub fn from_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text, &path.display().to_string())
    }

    /// Load `path` if it exists, otherwise fall back to the built-in defaults.
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No {} found, using default configuration", path.display());
            return Ok(Self::default());
        }
        let cfg = Self::load(path)?;
        info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Apply `UWB_LISTEN` and `UWB_EEPROM` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(listen) = lookup("UWB_LISTEN") {
            self.transport.listen = listen.parse().map_err(|e| ConfigError::Invalid {
                field: "UWB_LISTEN",
                reason: format!("{listen:?}: {e}"),
            })?;
        }
        if let Some(eeprom) = lookup("UWB_EEPROM") {
            self.storage.eeprom = PathBuf::from(eeprom);
        }
        Ok(())
    }

    /// Resolve role and address: explicit values win over straps.
    pub fn node_config(&self) -> Result<NodeConfig, ConfigError> {
        let straps = NodeConfig::from_straps(self.node.straps);
        NodeConfig::new(
            self.node.role.unwrap_or(straps.role),
            self.node.short_address.unwrap_or(straps.short_address),
        )
    }

    pub fn engine_init(&self, node: &NodeConfig) -> EngineInit {
        EngineInit {
            role: node.role,
            short_address: node.short_address,
            device_id: self.node.device_id.clone(),
            radio: self.node.radio,
            pins: self.node.pins,
        }
    }

    pub fn timing(&self) -> Timing {
        Timing {
            telemetry_period: Duration::from_millis(self.timing.telemetry_period_ms),
            command_period: Duration::from_millis(self.timing.command_period_ms),
            read_timeout: Duration::from_millis(self.transport.read_timeout_ms),
            write_timeout: Duration::from_millis(self.transport.write_timeout_ms),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("timing.telemetry_period_ms", self.timing.telemetry_period_ms),
            ("timing.command_period_ms", self.timing.command_period_ms),
            ("transport.read_timeout_ms", self.transport.read_timeout_ms),
            ("transport.write_timeout_ms", self.transport.write_timeout_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        let needed = CALIBRATION_OFFSET + CALIBRATION_RECORD_LEN;
        if self.storage.size < needed {
            return Err(ConfigError::Invalid {
                field: "storage.size",
                reason: format!("{} bytes cannot hold the {needed}-byte calibration record", self.storage.size),
            });
        }
        if self.node.device_id.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "node.device_id",
                reason: "must not be empty".into(),
            });
        }
        self.node_config().map(|_| ())
    }
}
