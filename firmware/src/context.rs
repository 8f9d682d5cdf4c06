//! Shared node state and the per-link task pair.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::calibration::CalibrationStore;
use crate::command::CommandDecoder;
use crate::config::{FileConfig, NodeConfig, Timing};
use crate::error::{NodeError, TransportError};
use crate::peers::PeerIndex;
use crate::ranging::RangingEventAdapter;
use crate::state::PeerStateTable;
use crate::storage::{FileStore, NvStore};
use crate::telemetry::TelemetryEncoder;
use crate::transport::{FrameWriter, LineReader};

/// Everything the node tasks share. Created once at boot.
pub struct NodeContext {
    pub node: NodeConfig,
    pub timing: Timing,
    table: Arc<PeerStateTable>,
    calibration: Arc<CalibrationStore>,
}

impl NodeContext {
    pub fn new(node: NodeConfig, timing: Timing, store: Box<dyn NvStore>) -> Self {
        Self {
            node,
            timing,
            table: Arc::new(PeerStateTable::new()),
            calibration: Arc::new(CalibrationStore::open(store)),
        }
    }

    /// Validate `cfg` and open the file-backed EEPROM it names.
    pub fn open(cfg: &FileConfig) -> Result<Self, NodeError> {
        cfg.validate()?;
        let node = cfg.node_config()?;
        let store = FileStore::open(&cfg.storage.eeprom, cfg.storage.size)?;
        Ok(Self::new(node, cfg.timing(), Box::new(store)))
    }

    pub fn table(&self) -> &Arc<PeerStateTable> {
        &self.table
    }

    pub fn calibration(&self) -> &Arc<CalibrationStore> {
        &self.calibration
    }

    /// Handler to give the ranging engine.
    pub fn adapter(&self) -> Arc<RangingEventAdapter> {
        Arc::new(RangingEventAdapter::new(self.table.clone(), self.calibration.clone()))
    }

    pub fn log_calibration(&self) {
        let params = self.calibration.params();
        info!("Calibration table:");
        for i in PeerIndex::all() {
            info!(
                "  anchor {i}: k = {:.4}, b = {:.4}",
                params.scale[i.get()],
                params.offset[i.get()]
            );
        }
    }

    /// Run telemetry and command handling over one host link.
    ///
    /// The link lasts as long as telemetry can be written. A host that stops
    /// sending (EOF on the inbound half) keeps receiving frames.
    pub async fn run_link<R, W>(&self, reader: R, writer: W) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let telemetry = TelemetryEncoder::new(
            FrameWriter::new(writer, self.timing.write_timeout),
            self.table.clone(),
            self.timing.telemetry_period,
        );
        let commands = CommandDecoder::new(
            LineReader::new(reader, self.timing.read_timeout),
            self.calibration.clone(),
            self.timing.command_period,
        );

        let telemetry = telemetry.run();
        let commands = commands.run();
        tokio::pin!(telemetry, commands);

        let mut listening = true;
        let result = loop {
            tokio::select! {
                r = &mut telemetry => break r,
                r = &mut commands, if listening => {
                    listening = false;
                    if let Err(e) = r {
                        warn!("Command channel stopped: {e}");
                    }
                }
            }
        };
        match &result {
            Err(TransportError::Closed) => info!("Host link closed"),
            Err(e) => warn!("Host link failed: {e}"),
            Ok(()) => {}
        }
        result
    }
}
