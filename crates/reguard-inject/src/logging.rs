//! File logging for the injected library.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local};
use tracing_subscriber::EnvFilter;

pub const LOG_FILE_NAME: &str = "reguard_log.txt";

const DEFAULT_FILTER: &str = "reguard=info";

pub fn header(now: DateTime<Local>) -> String {
    format!(
        "reguard {} log, started {}",
        env!("CARGO_PKG_VERSION"),
        now.format("%Y-%m-%d %H:%M:%S")
    )
}

/// Create (truncating) the log file in `dir` and write the header line.
pub fn create_log_file(dir: &Path) -> Result<(PathBuf, File)> {
    let path = dir.join(LOG_FILE_NAME);
    let mut file =
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    writeln!(file, "{}", header(Local::now()))?;
    Ok((path, file))
}

/// Route `tracing` output to the log file in `dir`. `RUST_LOG` overrides the
/// default filter.
pub fn init(dir: &Path) -> Result<PathBuf> {
    let (path, file) = create_log_file(dir)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow!("Failed to install logger: {}", e))?;

    Ok(path)
}
