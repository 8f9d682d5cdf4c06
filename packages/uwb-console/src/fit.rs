//! Least-squares calibration fit.
//!
//! Given pairs of (measured, true) distances for one anchor, find `k` and `b`
//! minimising the squared error of `true = k * measured + b`.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FitError {
    #[error("could not read samples: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("need at least 2 samples, got {0}")]
    TooFewSamples(usize),
    #[error("measured distances are all equal; the scale is undetermined")]
    Degenerate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub measured: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Fit {
    pub scale: f32,
    pub offset: f32,
    /// Root-mean-square residual of the fitted line, meters
    pub rms_residual: f64,
    pub samples: usize,
}

/// Parse `measured,true` lines. Blank lines, `#` comments and a non-numeric
/// header line are skipped.
pub fn parse_samples(text: &str) -> Result<Vec<Sample>, FitError> {
    let mut samples = Vec::new();
    for (n, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let (Some(a), Some(b), None) = (fields.next(), fields.next(), fields.next()) else {
            return Err(FitError::Parse {
                line: n + 1,
                reason: format!("expected 2 fields in {line:?}"),
            });
        };
        match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(measured), Ok(actual)) if measured.is_finite() && actual.is_finite() => {
                samples.push(Sample { measured, actual })
            }
            // header
            (Err(_), Err(_)) if samples.is_empty() => continue,
            _ => {
                return Err(FitError::Parse {
                    line: n + 1,
                    reason: format!("not a pair of finite numbers: {line:?}"),
                })
            }
        }
    }
    Ok(samples)
}

pub fn load_samples(path: &Path) -> Result<Vec<Sample>, FitError> {
    parse_samples(&std::fs::read_to_string(path)?)
}

pub fn fit(samples: &[Sample]) -> Result<Fit, FitError> {
    if samples.len() < 2 {
        return Err(FitError::TooFewSamples(samples.len()));
    }
    let n = samples.len() as f64;
    let mean_x = samples.iter().map(|s| s.measured).sum::<f64>() / n;
    let mean_y = samples.iter().map(|s| s.actual).sum::<f64>() / n;

    // centred sums keep the fit stable for large, tightly clustered distances
    let (sxx, sxy) = samples.iter().fold((0.0, 0.0), |(sxx, sxy), s| {
        let dx = s.measured - mean_x;
        (sxx + dx * dx, sxy + dx * (s.actual - mean_y))
    });
    if sxx <= f64::EPSILON * n {
        return Err(FitError::Degenerate);
    }
    let k = sxy / sxx;
    let b = mean_y - k * mean_x;

    let sse: f64 = samples
        .iter()
        .map(|s| (s.actual - (k * s.measured + b)).powi(2))
        .sum();

    Ok(Fit {
        scale: k as f32,
        offset: b as f32,
        rms_residual: (sse / n).sqrt(),
        samples: samples.len(),
    })
}
