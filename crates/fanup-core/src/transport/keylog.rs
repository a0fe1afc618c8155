//! Process-wide TLS key log.
//!
//! libcurl's TLS backend reads `SSLKEYLOGFILE` once, during global init, and
//! from then on appends the secrets of every connection in the process with
//! its own file handle. So a key log is installed at most once, before the
//! first easy handle exists, and every handle configured later shares it.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use super::ConfigError;

static INSTALLED: Mutex<Option<PathBuf>> = Mutex::new(None);
static CURL_READY: AtomicBool = AtomicBool::new(false);

#[derive(Debug, PartialEq, Eq)]
enum Plan {
    AlreadyInstalled,
    Install,
}

fn plan(installed: Option<&Path>, curl_ready: bool, requested: &Path) -> Result<Plan, ConfigError> {
    match installed {
        Some(current) if current == requested => Ok(Plan::AlreadyInstalled),
        Some(current) => Err(ConfigError::KeyLogConflict {
            installed: current.to_path_buf(),
            requested: requested.to_path_buf(),
        }),
        None if curl_ready => Err(ConfigError::KeyLogTooLate(requested.to_path_buf())),
        None => Ok(Plan::Install),
    }
}

/// Create (truncate) `path`, export it as `SSLKEYLOGFILE` and run libcurl's
/// global init so the TLS backend picks it up.
///
/// Call while the process is still single-threaded: the environment is
/// modified here. Installing the same path again is a no-op.
pub fn install_key_log(path: &Path) -> Result<(), ConfigError> {
    let mut installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    if plan(installed.as_deref(), CURL_READY.load(Ordering::Acquire), path)?
        == Plan::AlreadyInstalled
    {
        return Ok(());
    }
    File::create(path).map_err(|source| ConfigError::KeyLog {
        path: path.to_path_buf(),
        source,
    })?;
    std::env::set_var("SSLKEYLOGFILE", path);
    *installed = Some(path.to_path_buf());
    curl::init();
    CURL_READY.store(true, Ordering::Release);
    tracing::warn!(path = %path.display(), "TLS key logging enabled for this process");
    Ok(())
}

/// The key log installed in this process, if any.
pub fn installed_key_log() -> Option<PathBuf> {
    INSTALLED.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// libcurl global init. From here on a key log can no longer be installed.
pub(super) fn init_curl() {
    let _installed = INSTALLED.lock().unwrap_or_else(|e| e.into_inner());
    curl::init();
    CURL_READY.store(true, Ordering::Release);
}
