//! Trust policy and CA bundle assembly.
//!
//! libcurl takes a single CA file, so extra anchors are merged with the
//! system pool into a temp PEM file owned by the transport handle.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::ConfigError;

/// Well-known system bundle locations (Debian/Ubuntu, Fedora/RHEL, Alpine/BSD).
pub const SYSTEM_BUNDLE_CANDIDATES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/etc/ssl/cert.pem",
];

const PEM_CERT_MARKER: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// Which certificate authorities are accepted and whether verification runs.
#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    /// PEM files appended to the system pool.
    pub extra_anchors: Vec<PathBuf>,
    /// System bundle override. When unset, `SSL_CERT_FILE` and then
    /// `SYSTEM_BUNDLE_CANDIDATES` are tried.
    pub system_bundle: Option<PathBuf>,
    /// Skip peer and host verification entirely. Never on by default.
    pub insecure_skip_verify: bool,
    /// TLS key log destination.
    pub key_log: Option<PathBuf>,
}

/// CA configuration handed to every easy handle.
#[derive(Debug)]
pub(super) enum CaSource {
    /// libcurl's built-in default store.
    Default,
    /// A bundle file used as is.
    Path(PathBuf),
    /// System pool plus extra anchors, written to a temp file.
    Merged(NamedTempFile),
}

impl CaSource {
    pub(super) fn path(&self) -> Option<&Path> {
        match self {
            CaSource::Default => None,
            CaSource::Path(p) => Some(p),
            CaSource::Merged(f) => Some(f.path()),
        }
    }
}

/// Build the CA source for `policy`. Unreadable or empty anchors are fatal.
pub(super) fn build_ca_source(policy: &TrustPolicy) -> Result<CaSource, ConfigError> {
    if policy.extra_anchors.is_empty() {
        return match &policy.system_bundle {
            Some(path) => {
                read_system_bundle(path)?;
                Ok(CaSource::Path(path.clone()))
            }
            None => Ok(CaSource::Default),
        };
    }

    let mut merged = Vec::new();
    match locate_system_bundle(policy.system_bundle.as_deref()) {
        Some(path) => {
            merged = read_system_bundle(&path)?;
            tracing::debug!(path = %path.display(), "loaded system CA bundle");
        }
        None => tracing::warn!("no system CA bundle found; trusting only the supplied anchors"),
    }

    for anchor in &policy.extra_anchors {
        let pem = fs::read(anchor).map_err(|source| ConfigError::Anchor {
            path: anchor.clone(),
            source,
        })?;
        if !contains(&pem, PEM_CERT_MARKER) {
            return Err(ConfigError::NoCertificates(anchor.clone()));
        }
        if !merged.is_empty() && !merged.ends_with(b"\n") {
            merged.push(b'\n');
        }
        merged.extend_from_slice(&pem);
        tracing::debug!(path = %anchor.display(), "added trust anchor");
    }

    let mut file = tempfile::Builder::new()
        .prefix("fanup-ca-")
        .suffix(".pem")
        .tempfile()
        .map_err(ConfigError::BundleWrite)?;
    file.write_all(&merged).map_err(ConfigError::BundleWrite)?;
    file.flush().map_err(ConfigError::BundleWrite)?;
    Ok(CaSource::Merged(file))
}

fn locate_system_bundle(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(env) = std::env::var_os("SSL_CERT_FILE") {
        let path = PathBuf::from(env);
        if path.is_file() {
            return Some(path);
        }
    }
    SYSTEM_BUNDLE_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

fn read_system_bundle(path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| ConfigError::SystemBundle {
        path: path.to_path_buf(),
        source,
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
