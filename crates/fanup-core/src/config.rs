use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::transport::HttpVersionPref;

/// Global configuration loaded from `~/.config/fanup/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanupConfig {
    /// Preferred HTTP version: "h3", "h2" (HTTP/2 over TLS) or "h1.1".
    #[serde(default)]
    pub http_version: HttpVersionPref,
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds (0 = no limit).
    pub request_timeout_secs: u64,
    /// Form field name used for the uploaded file.
    pub field_name: String,
    /// Optional `User-Agent` header value.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Extra trust anchors (PEM files) appended to the system pool.
    #[serde(default)]
    pub ca_certs: Vec<PathBuf>,
    /// Explicit system CA bundle; if missing, well-known locations are searched.
    #[serde(default)]
    pub system_ca_bundle: Option<PathBuf>,
    /// Directory for per-connection diagnostic sinks (None = disabled).
    #[serde(default)]
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for FanupConfig {
    fn default() -> Self {
        Self {
            http_version: HttpVersionPref::default(),
            connect_timeout_secs: 30,
            request_timeout_secs: 600,
            field_name: "file".to_string(),
            user_agent: None,
            ca_certs: Vec::new(),
            system_ca_bundle: None,
            diagnostics_dir: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fanup")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FanupConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FanupConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Load configuration from an explicit path (no default file is created).
pub fn load_from_path(path: &Path) -> Result<FanupConfig> {
    let data =
        fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let cfg: FanupConfig =
        toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
    Ok(cfg)
}
