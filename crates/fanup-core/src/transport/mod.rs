//! Transport configuration and the request/response boundary.
//!
//! The dispatcher only sees the `Transport` trait: "send one POST, get one
//! response". `TransportHandle` is the libcurl implementation: it owns the
//! trust configuration, the key log, per-connection diagnostic sinks and a
//! pool of easy handles whose connection caches are reused across uploads.

mod diagnostics;
mod error;
mod handle;
mod keylog;
mod trust;

pub use diagnostics::sink_path;
pub use error::{classify_curl_error, ConfigError, TransportError, TransportErrorKind};
pub use handle::TransportHandle;
pub use keylog::{install_key_log, installed_key_log};
pub use trust::{TrustPolicy, SYSTEM_BUNDLE_CANDIDATES};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::control::CancelToken;

/// One request to send. The body is borrowed; the transport streams it
/// through a cursor owned by this call.
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub url: &'a str,
    pub content_type: &'a str,
    pub body: &'a [u8],
    pub cancel: Option<&'a CancelToken>,
}

/// Response to an upload request.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u32,
    /// Raw header lines of the final response (status line first).
    pub headers: Vec<String>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Capability to exchange one request/response pair. Implementations must
/// be usable from many threads at once.
pub trait Transport: Send + Sync {
    fn send(&self, request: UploadRequest<'_>) -> Result<TransportResponse, TransportError>;
}

/// Preferred HTTP version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HttpVersionPref {
    /// HTTP/3 over QUIC; configuration fails if libcurl lacks support.
    #[serde(rename = "h3")]
    Http3,
    /// HTTP/2 over TLS, HTTP/1.1 for cleartext targets.
    #[default]
    #[serde(rename = "h2")]
    Http2,
    #[serde(rename = "h1.1")]
    Http11,
}

impl fmt::Display for HttpVersionPref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpVersionPref::Http3 => "h3",
            HttpVersionPref::Http2 => "h2",
            HttpVersionPref::Http11 => "h1.1",
        })
    }
}

impl FromStr for HttpVersionPref {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h3" | "http3" => Ok(HttpVersionPref::Http3),
            "h2" | "http2" => Ok(HttpVersionPref::Http2),
            "h1.1" | "h1" | "http1.1" => Ok(HttpVersionPref::Http11),
            other => Err(format!("unknown HTTP version {:?} (use h3, h2 or h1.1)", other)),
        }
    }
}

/// Non-trust transport settings.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub http_version: HttpVersionPref,
    pub connect_timeout: Duration,
    /// Whole-request deadline; `None` = no limit.
    pub request_timeout: Option<Duration>,
    pub user_agent: Option<String>,
    /// When set, one diagnostic sink per connection is written here.
    pub diagnostics_dir: Option<PathBuf>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            http_version: HttpVersionPref::default(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Some(Duration::from_secs(600)),
            user_agent: None,
            diagnostics_dir: None,
        }
    }
}

impl TransportOptions {
    /// Options from the loaded config file.
    pub fn from_config(cfg: &crate::config::FanupConfig) -> Self {
        Self {
            http_version: cfg.http_version,
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            request_timeout: (cfg.request_timeout_secs > 0)
                .then(|| Duration::from_secs(cfg.request_timeout_secs)),
            user_agent: cfg.user_agent.clone(),
            diagnostics_dir: cfg.diagnostics_dir.clone(),
        }
    }
}
