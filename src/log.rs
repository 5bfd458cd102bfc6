//! Logging setup: a `tracing` subscriber writing to stderr and an optional
//! append-only file, plus `scalar` metric events for training telemetry.

use std::fs::OpenOptions;
use std::sync::Mutex;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,        // used when RUST_LOG is unset
    pub file: Option<String>, // appended to; None = stderr only
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".into(), file: Some("autopilot.log".into()) }
    }
}

// Wall-clock timestamps with milliseconds.
struct ChronoTimer;

impl FormatTime for ChronoTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

fn build(cfg: &LogConfig) -> std::io::Result<impl tracing::Subscriber + Send + Sync + 'static> {
    let writer = match &cfg.file {
        Some(path) => {
            let file = Mutex::new(OpenOptions::new().create(true).append(true).open(path)?);
            BoxMakeWriter::new(std::io::stderr.and(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoTimer)
        .with_ansi(false)
        .with_writer(writer)
        .finish())
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(cfg: &LogConfig) -> std::io::Result<()> {
    let subscriber = build(cfg)?;
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

/// Metric line: target `scalar`, fields step/name/value. Easy to grep.
pub fn scalar(step: u64, name: &str, value: f32) {
    tracing::info!(target: "scalar", step, name, value);
}
