//! # filecast
//!
//! Broadcast server binary: loads settings, sets up logging and metrics,
//! and runs the service until SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use filecast_logging::{LoggingConfig, init_logging};
use filecast_server::BroadcastService;
use filecast_server::metrics::install_recorder;
use filecast_settings::{FilecastSettings, load_dotenv, load_settings_from_path, settings_path};
use tracing::{info, warn};

/// Broadcasts files dropped into a directory to every connected WebSocket client.
#[derive(Parser, Debug)]
#[command(name = "filecast", version, about)]
struct Cli {
    /// Settings file (defaults to `~/.filecast/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on (`host:port`, or `:port` for all interfaces).
    #[arg(long)]
    listen: Option<String>,

    /// Directory to watch for new files.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Log filter directive (overridden by `RUST_LOG`).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs on stdout.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply(&self, settings: &mut FilecastSettings) {
        if let Some(listen) = &self.listen {
            settings.server.listen_addr.clone_from(listen);
        }
        if let Some(dir) = &self.dir {
            settings.broadcast.message_dir = dir.display().to_string();
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn logging_config(settings: &FilecastSettings) -> LoggingConfig {
    let log = &settings.logging;
    LoggingConfig {
        level: log.level.clone(),
        json: log.json,
        log_dir: (!log.log_dir.trim().is_empty()).then(|| PathBuf::from(&log.log_dir)),
        name: log.name.clone(),
        file_pattern: log.file_pattern.clone(),
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for ctrl-c")?;
            Ok("SIGINT")
        }
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok("ctrl-c")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let _ = load_dotenv();
    let path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    let logging = init_logging(&logging_config(&settings));
    info!(
        settings = %path.display(),
        log_file = ?logging.log_file(),
        "filecast starting"
    );

    let config = settings.to_broadcast_config();
    let mut service = BroadcastService::new(config);
    match install_recorder() {
        Ok(handle) => service = service.with_metrics(handle),
        Err(e) => warn!(error = %e, "metrics recorder unavailable, /metrics disabled"),
    }

    let coordinator = service.coordinator();
    let _signals = tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(signal) => warn!(signal, "shutdown signal received"),
            Err(e) => warn!(error = %e, "signal handling failed, stopping"),
        }
        coordinator.shutdown();
    });

    service.run().await.context("Broadcast service failed")?;
    info!("filecast exited");
    Ok(())
}
