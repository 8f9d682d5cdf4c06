//! UWB Node, host build
//!
//! Runs the node core against the simulated ranging engine and exposes the
//! host link either as a TCP serial bridge or on stdin/stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use uwb_node::config::FileConfig;
use uwb_node::error::TransportError;
use uwb_node::NodeContext;
use uwb_simulator::SimulatedEngine;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "uwb-node", about = "UWB ranging node core")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "uwb-node.toml")]
    config: PathBuf,
    /// TCP address for the host link (overrides config and UWB_LISTEN)
    #[arg(long)]
    listen: Option<String>,
    /// Use stdin/stdout as the host link instead of TCP
    #[arg(long)]
    stdio: bool,
    /// EEPROM image file (overrides config and UWB_EEPROM)
    #[arg(long)]
    eeprom: Option<PathBuf>,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // stdout may carry the host link, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uwb_node=info,uwb_simulator=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut cfg = FileConfig::load_or_default(&args.config)?;
    cfg.apply_env()?;
    if let Some(listen) = &args.listen {
        cfg.transport.listen = listen
            .parse()
            .with_context(|| format!("invalid --listen address {listen:?}"))?;
    }
    if let Some(eeprom) = args.eeprom {
        cfg.storage.eeprom = eeprom;
    }

    let ctx = Arc::new(
        NodeContext::open(&cfg)
            .with_context(|| format!("failed to start node with {}", cfg.storage.eeprom.display()))?,
    );
    info!(
        "🛰  UWB node starting: {} short address {}",
        ctx.node.role, ctx.node.short_address
    );
    ctx.log_calibration();

    let engine = SimulatedEngine::new(cfg.engine_init(&ctx.node), cfg.simulator.clone());
    let _engine = engine.spawn(ctx.adapter());

    if args.stdio {
        info!("🔌 Host link on stdin/stdout");
        tokio::select! {
            r = ctx.run_link(tokio::io::stdin(), tokio::io::stdout()) => match r {
                Err(TransportError::Closed) | Ok(()) => {}
                Err(e) => return Err(e).context("host link failed"),
            },
            _ = tokio::signal::ctrl_c() => info!("Shutting down"),
        }
        return Ok(());
    }

    let listener = TcpListener::bind(cfg.transport.listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.transport.listen))?;
    info!("🚀 Host link listening on {}", cfg.transport.listen);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Host connected from {peer}");
                    let ctx = ctx.clone();
                    tokio::spawn(async move {
                        let (rx, tx) = stream.into_split();
                        let _ = ctx.run_link(rx, tx).await;
                    });
                }
                Err(e) => warn!("accept failed: {e}"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
