//! Log setup: `tracing` to a file under the XDG state dir, or to stderr.
//!
//! Upload reports go to stdout, so logs never do.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,fanup=debug,fanup_core=debug";
const VERBOSE_FILTER: &str = "debug";

/// Path of the log file: `~/.local/state/fanup/fanup.log`.
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fanup")?;
    Ok(xdg_dirs.get_state_home().join("fanup.log"))
}

/// `RUST_LOG` wins unless `verbose` forces debug output.
fn env_filter(verbose: bool) -> EnvFilter {
    if verbose {
        return EnvFilter::new(VERBOSE_FILTER);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Append structured logs to `~/.local/state/fanup/fanup.log`.
///
/// Returns Err when the state dir or file cannot be used, or a subscriber is
/// already installed; the caller falls back to `init_logging_stderr`.
pub fn init_logging() -> Result<PathBuf> {
    let path = log_file_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(false))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install subscriber: {}", e))?;

    tracing::info!(pid = std::process::id(), "fanup logging initialized at {}", path.display());
    Ok(path)
}

/// Log to stderr only. Used for `--verbose` and when `init_logging()` fails.
/// A second call is a no-op.
pub fn init_logging_stderr(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_writer(std::io::stderr)
        .with_thread_names(verbose)
        .try_init();
}
