//! # uwb-console
//!
//! Host-side tool for a UWB node link: watch telemetry, send commands, and
//! fit per-anchor calibration from reference measurements.

mod capture;
mod fit;
mod link;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, warn};

use uwb_types::{Command, Position, TelemetryFrame, MAX_ANCHOR_NUM};

use capture::Summary;
use link::FrameStream;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "uwb-console", about = "Monitor and configure a UWB node")]
struct Args {
    /// Node host link address
    #[arg(short, long, default_value = "127.0.0.1:7800")]
    node: String,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print telemetry frames as they arrive
    Monitor {
        /// Aligned table instead of JSON lines
        #[arg(long)]
        table: bool,
        /// Stop after this many frames
        #[arg(long)]
        count: Option<u64>,
    },
    /// Collect raw distances for one slot with the anchor at a known
    /// distance, and append `measured,true` rows to a CSV for `fit`
    Capture {
        #[arg(long)]
        index: u8,
        /// Reference distance, meters
        #[arg(long)]
        actual: f64,
        #[arg(long, default_value = "20")]
        count: usize,
        #[arg(long, default_value = "calibration.csv")]
        out: PathBuf,
    },
    /// Live raw and calibrated distance of one slot
    Verify {
        #[arg(long)]
        index: u8,
        /// Apply this scale locally instead of showing the node's value
        #[arg(long, requires = "offset")]
        scale: Option<f32>,
        #[arg(long, requires = "scale")]
        offset: Option<f32>,
    },
    /// Set the calibration pair of one anchor slot
    SetCalibration {
        #[arg(long)]
        index: u8,
        #[arg(long)]
        scale: f32,
        #[arg(long)]
        offset: f32,
    },
    /// Send an anchor position (accepted by the node but not applied)
    SetPosition {
        #[arg(long)]
        index: u8,
        #[arg(long)]
        x: f32,
        #[arg(long)]
        y: f32,
        #[arg(long, default_value = "0.0")]
        z: f32,
    },
    /// Least-squares fit of `true = k * measured + b` from a CSV of
    /// `measured,true` pairs
    Fit {
        #[arg(long)]
        samples: PathBuf,
        /// Send the result to this anchor slot
        #[arg(long)]
        index: Option<u8>,
    },
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the monitor output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uwb_console=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.cmd {
        Cmd::Monitor { table, count } => monitor(&args.node, table, count).await,
        Cmd::Capture { index, actual, count, out } => {
            check_index(index)?;
            capture(&args.node, usize::from(index), actual, count, &out).await
        }
        Cmd::Verify { index, scale, offset } => {
            check_index(index)?;
            let local = scale.zip(offset);
            verify(&args.node, usize::from(index), local).await
        }
        Cmd::SetCalibration { index, scale, offset } => {
            check_index(index)?;
            send(&args.node, Command::SetCalibration { index, scale, offset }).await
        }
        Cmd::SetPosition { index, x, y, z } => {
            check_index(index)?;
            let position = Position::new(x, y, z);
            send(&args.node, Command::SetPosition { index, position }).await
        }
        Cmd::Fit { samples, index } => {
            let data = fit::load_samples(&samples)
                .with_context(|| format!("failed to load {}", samples.display()))?;
            let result = fit::fit(&data)?;
            println!("{}", serde_json::to_string(&result)?);
            info!(
                "fit over {} samples: k = {:.4}, b = {:.4}, rms {:.4} m",
                result.samples, result.scale, result.offset, result.rms_residual
            );
            if let Some(index) = index {
                check_index(index)?;
                send(
                    &args.node,
                    Command::SetCalibration { index, scale: result.scale, offset: result.offset },
                )
                .await?;
            }
            Ok(())
        }
    }
}

fn check_index(index: u8) -> Result<()> {
    if usize::from(index) >= MAX_ANCHOR_NUM {
        bail!("index {index} out of range (0..{MAX_ANCHOR_NUM})");
    }
    Ok(())
}

async fn connect(addr: &str) -> Result<TcpStream> {
    TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to node at {addr}"))
}

async fn send(addr: &str, command: Command) -> Result<()> {
    let mut stream = connect(addr).await?;
    stream.write_all(&command.encode()).await?;
    stream.flush().await?;
    // give the node a command cycle to read it before hanging up
    tokio::time::sleep(Duration::from_millis(250)).await;
    info!("sent {command:?}");
    Ok(())
}

async fn monitor(addr: &str, table: bool, count: Option<u64>) -> Result<()> {
    let mut frames = FrameStream::new(connect(addr).await?);
    info!("📡 Monitoring {addr}");
    if table {
        println!("{}", table_header());
    }

    let mut seen = 0u64;
    while let Some(frame) = frames.next_frame().await? {
        if table {
            println!("{}", table_row(&frame));
        } else {
            println!("{}", frame_json(&frame));
        }
        seen += 1;
        if count.is_some_and(|c| seen >= c) {
            return Ok(());
        }
    }
    info!("node closed the link after {seen} frames");
    Ok(())
}

async fn capture(addr: &str, index: usize, actual: f64, count: usize, out: &Path) -> Result<()> {
    let mut frames = FrameStream::new(connect(addr).await?);
    info!("📏 Capturing {count} samples for anchor {index} at {actual:.3} m");

    let measured = capture::collect(&mut frames, index, count, |n, raw| {
        info!("sample {n}/{count}: {raw:.3} m");
    })
    .await?;
    if measured.len() < count {
        warn!("link closed after {} of {count} samples", measured.len());
    }
    let Some(summary) = Summary::of(actual, &measured) else {
        bail!("no samples received for anchor {index}");
    };

    capture::append_rows(out, actual, &measured)
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("{}", serde_json::to_string(&summary)?);
    info!(
        "anchor {index} at {actual:.3} m: mean {:.3} m, std {:.3} m, {} rows appended to {}",
        summary.mean,
        summary.std_dev,
        summary.samples,
        out.display()
    );
    Ok(())
}

async fn verify(addr: &str, index: usize, local: Option<(f32, f32)>) -> Result<()> {
    let mut frames = FrameStream::new(connect(addr).await?);
    match local {
        Some((k, b)) => info!("🔎 Verifying anchor {index} with k = {k:.4}, b = {b:.4}"),
        None => info!("🔎 Verifying anchor {index} with the node's calibration"),
    }
    while let Some(frame) = frames.next_frame().await? {
        if let Some(line) = verify_line(&frame, index, local) {
            println!("{line}");
        }
    }
    Ok(())
}

fn verify_line(frame: &TelemetryFrame, index: usize, local: Option<(f32, f32)>) -> Option<String> {
    let raw = frame.raw_distance[index];
    if raw == 0.0 {
        return None;
    }
    let calibrated = match local {
        Some((k, b)) => k * raw + b,
        None => frame.calibrated_distance[index],
    };
    Some(format!("raw {raw:.3} m -> calibrated {calibrated:.3} m"))
}

fn frame_json(frame: &TelemetryFrame) -> serde_json::Value {
    let active: Vec<usize> = (0..MAX_ANCHOR_NUM).filter(|&i| frame.is_active(i)).collect();
    json!({
        "raw": frame.raw_distance,
        "calibrated": frame.calibrated_distance,
        "rx_power": frame.rx_power,
        "active": active,
        "position": frame.position,
    })
}

fn table_header() -> String {
    (0..MAX_ANCHOR_NUM).map(|i| format!("{:>16}", format!("anchor {i}"))).collect()
}

fn table_row(frame: &TelemetryFrame) -> String {
    (0..MAX_ANCHOR_NUM)
        .map(|i| {
            let mark = if frame.is_active(i) { '*' } else { ' ' };
            format!("{:>7.3} {:>7.1}{mark}", frame.calibrated_distance[i], frame.rx_power[i])
        })
        .collect()
}
