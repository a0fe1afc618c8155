//! Transport and configuration errors, and curl error classification.

use serde::Serialize;
use std::io;
use std::path::PathBuf;

use super::HttpVersionPref;

/// Fatal startup error: the transport cannot be configured as requested.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read system CA bundle {}", path.display())]
    SystemBundle {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("read trust anchor {}", path.display())]
    Anchor {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no PEM certificate found in {}", .0.display())]
    NoCertificates(PathBuf),
    #[error("write merged CA bundle")]
    BundleWrite(#[source] io::Error),
    #[error("open key log {}", path.display())]
    KeyLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "key log {} requested but {} is already installed for this process",
        requested.display(),
        installed.display()
    )]
    KeyLogConflict { installed: PathBuf, requested: PathBuf },
    #[error("key log {} requested after libcurl was initialized", .0.display())]
    KeyLogTooLate(PathBuf),
    #[error("prepare diagnostics directory {}", path.display())]
    Diagnostics {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("HTTP version {0} not supported by the linked libcurl")]
    HttpVersion(HttpVersionPref, #[source] curl::Error),
    /// A lazily opened diagnostic sink failed mid-run.
    #[error("open diagnostic sink {}", path.display())]
    DiagnosticSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Coarse classification of a transport failure, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Connect or overall request deadline hit.
    Timeout,
    /// Network-level failure (DNS, refused, reset, stream error).
    Connection,
    /// TLS handshake or certificate verification failure.
    Tls,
    /// Any other error.
    Other,
}

/// Per-job failure to exchange a request/response pair.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("curl request failed")]
    Curl {
        kind: TransportErrorKind,
        #[source]
        source: curl::Error,
    },
    #[error("transfer cancelled")]
    Cancelled,
    #[error("open diagnostic sink {}", path.display())]
    DiagnosticSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            TransportError::Curl { kind, .. } => *kind,
            _ => TransportErrorKind::Other,
        }
    }

    /// Split off errors that must abort the whole run rather than fail one job.
    pub fn into_fatal(self) -> Result<ConfigError, TransportError> {
        match self {
            TransportError::DiagnosticSink { path, source } => {
                Ok(ConfigError::DiagnosticSink { path, source })
            }
            other => Err(other),
        }
    }
}

impl From<curl::Error> for TransportError {
    fn from(e: curl::Error) -> Self {
        if e.is_aborted_by_callback() {
            return TransportError::Cancelled;
        }
        TransportError::Curl {
            kind: classify_curl_error(&e),
            source: e,
        }
    }
}

/// Classify a curl error for reporting.
pub fn classify_curl_error(e: &curl::Error) -> TransportErrorKind {
    if e.is_operation_timedout() {
        return TransportErrorKind::Timeout;
    }
    if e.is_ssl_connect_error()
        || e.is_peer_failed_verification()
        || e.is_ssl_certproblem()
        || e.is_ssl_cacert_badfile()
    {
        return TransportErrorKind::Tls;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_http2_error()
        || e.is_http2_stream_error()
    {
        return TransportErrorKind::Connection;
    }
    TransportErrorKind::Other
}
