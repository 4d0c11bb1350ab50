//! Log output
//!
//! The terminal belongs to the UI, so log lines go to a file in the data
//! directory instead of stderr.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Log file name inside the data directory
pub const LOG_FILE: &str = "quizrush.log";

/// Install the global subscriber writing to `<data_dir>/quizrush.log`.
///
/// Falls back to `info` when `filter` does not parse. Returns the log path.
pub fn init(data_dir: &Path, filter: &str) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(data_dir)?;
    let path = data_dir.join(LOG_FILE);
    let file: File = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;

    Ok(path)
}
