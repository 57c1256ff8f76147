// src/main.rs
//! HarFlow Capture maintenance tool
//!
//! Re-runs HAR reconstruction offline for existing session directories,
//! e.g. after a crash left a session without `recording.har`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use harflow_capture::observability::{init_metrics, init_tracing};
use harflow_capture::recording::har::{self, HAR_FILE};
use harflow_capture::recording::metadata::{SessionMetadata, EVENT_LOG_FILE, METADATA_FILE};
use harflow_capture::utils::config::EngineConfig;
use harflow_capture::BuildInfo;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Rebuild HAR documents from session event logs
#[derive(Parser, Debug)]
#[command(name = "harflow-capture")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults, then this file, then HARFLOW__* env vars)
    #[arg(short, long, env = "HARFLOW_CONFIG", default_value = "harflow")]
    config: String,

    /// Rebuild even when a non-empty HAR export already exists
    #[arg(long)]
    force: bool,

    /// Session directories to process
    #[arg(required = true)]
    sessions: Vec<PathBuf>,
}

fn har_present(session_dir: &Path) -> bool {
    std::fs::metadata(session_dir.join(HAR_FILE))
        .map(|m| m.len() > 0)
        .unwrap_or(false)
}

/// Rebuild one session's HAR; returns whether a rebuild happened
fn process(session_dir: &Path, force: bool) -> Result<bool> {
    if !session_dir.join(EVENT_LOG_FILE).exists() {
        bail!("{} has no {}", session_dir.display(), EVENT_LOG_FILE);
    }

    if har_present(session_dir) && !force {
        info!("{}: HAR export present, skipping", session_dir.display());
        return Ok(false);
    }

    let stats = har::rebuild(session_dir, EVENT_LOG_FILE)
        .with_context(|| format!("rebuilding HAR in {}", session_dir.display()))?;
    info!(
        "{}: rebuilt HAR from {} requests and {} responses ({} lines skipped)",
        session_dir.display(),
        stats.requests,
        stats.responses,
        stats.skipped_lines
    );

    if session_dir.join(METADATA_FILE).exists() {
        let mut metadata = SessionMetadata::read(session_dir)?;
        metadata.har_reconstructed = true;
        metadata.write(session_dir)?;
    } else {
        warn!("{}: no {}, leaving it absent", session_dir.display(), METADATA_FILE);
    }

    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = EngineConfig::load_from(&args.config).context("loading configuration")?;
    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    let build = BuildInfo::current();
    info!("HarFlow Capture v{} ({})", build.version, build.git_hash);

    let mut failures = 0usize;
    for session_dir in &args.sessions {
        match process(session_dir, args.force) {
            Ok(true) => println!("rebuilt {}", session_dir.join(HAR_FILE).display()),
            Ok(false) => println!("kept {}", session_dir.join(HAR_FILE).display()),
            Err(e) => {
                error!("{:#}", e);
                eprintln!("error: {:#}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} sessions failed", failures, args.sessions.len());
    }
    Ok(())
}
