//! Reference-distance capture for calibration.
//!
//! With an anchor placed at a known distance, collect the node's raw
//! distance for that slot over a number of frames, summarise it, and append
//! the `measured,true` rows that `fit` consumes.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tokio::io::AsyncRead;

use crate::link::FrameStream;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub actual: f64,
    pub samples: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
}

impl Summary {
    pub fn of(actual: f64, measured: &[f64]) -> Option<Self> {
        if measured.is_empty() {
            return None;
        }
        let n = measured.len() as f64;
        let mean = measured.iter().sum::<f64>() / n;
        let var = measured.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            actual,
            samples: measured.len(),
            mean,
            std_dev: var.sqrt(),
        })
    }
}

/// Raw distances reported for `index`, one per frame, skipping frames in
/// which the slot has no measurement yet. Stops early if the link closes.
pub async fn collect<R: AsyncRead + Unpin>(
    stream: &mut FrameStream<R>,
    index: usize,
    count: usize,
    mut progress: impl FnMut(usize, f64),
) -> std::io::Result<Vec<f64>> {
    let mut measured = Vec::with_capacity(count);
    while measured.len() < count {
        let Some(frame) = stream.next_frame().await? else {
            break;
        };
        let raw = frame.raw_distance[index];
        if raw == 0.0 || !raw.is_finite() {
            continue;
        }
        measured.push(f64::from(raw));
        progress(measured.len(), f64::from(raw));
    }
    Ok(measured)
}

/// Append `measured,true` rows, writing the header when the file is new.
pub fn append_rows(path: &Path, actual: f64, measured: &[f64]) -> std::io::Result<()> {
    let fresh = !path.exists() || std::fs::metadata(path)?.len() == 0;
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    if fresh {
        writeln!(f, "measured,true")?;
    }
    for m in measured {
        writeln!(f, "{m:.4},{actual:.4}")?;
    }
    Ok(())
}
