//! libcurl-backed transport handle with a pool of reusable easy handles.

use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::str;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use curl::easy::{Easy, HttpVersion, List};

use super::diagnostics::DiagnosticSinks;
use super::keylog::{init_curl, install_key_log};
use super::trust::{build_ca_source, CaSource, TrustPolicy};
use super::{
    ConfigError, HttpVersionPref, Transport, TransportError, TransportOptions, TransportResponse,
    UploadRequest,
};

/// An easy handle checked out of the pool. Its slot id doubles as the
/// connection identifier for diagnostics.
struct PooledEasy {
    conn_id: u64,
    easy: Easy,
}

/// Reusable, thread-safe transport bound to one trust policy.
///
/// Create once with `configure`, share via `Arc`, and release with `close`
/// after every upload has finished. Dropping without `close` releases the
/// same resources but discards flush errors. The key log, if any, belongs to
/// the process and outlives the handle.
pub struct TransportHandle {
    options: TransportOptions,
    http_version: HttpVersion,
    insecure: bool,
    ca: CaSource,
    key_log: Option<PathBuf>,
    diagnostics: Option<Arc<DiagnosticSinks>>,
    pool: Mutex<Vec<PooledEasy>>,
    next_conn_id: AtomicU64,
    closed: bool,
}

impl TransportHandle {
    /// Build the transport. Every failure here is fatal for the run: the
    /// trust store, key log, diagnostics directory and HTTP version are all
    /// checked before any upload starts.
    pub fn configure(
        policy: TrustPolicy,
        options: TransportOptions,
    ) -> Result<TransportHandle, ConfigError> {
        let ca = build_ca_source(&policy)?;
        // Must precede the first easy handle so the TLS backend sees it.
        if let Some(path) = &policy.key_log {
            install_key_log(path)?;
        }
        init_curl();
        let diagnostics = options
            .diagnostics_dir
            .as_deref()
            .map(DiagnosticSinks::prepare)
            .transpose()?
            .map(Arc::new);
        let http_version = resolve_http_version(options.http_version)?;

        if policy.insecure_skip_verify {
            tracing::warn!("certificate verification disabled (--insecure)");
        }
        tracing::info!(
            http_version = %options.http_version,
            ca = ?ca.path(),
            key_log = ?policy.key_log,
            diagnostics = ?options.diagnostics_dir,
            "transport configured"
        );

        Ok(TransportHandle {
            options,
            http_version,
            insecure: policy.insecure_skip_verify,
            ca,
            key_log: policy.key_log,
            diagnostics,
            pool: Mutex::new(Vec::new()),
            next_conn_id: AtomicU64::new(1),
            closed: false,
        })
    }

    /// Number of easy handles created so far (one per concurrent connection slot).
    pub fn connections_opened(&self) -> u64 {
        self.next_conn_id.load(Ordering::Relaxed) - 1
    }

    /// Flush and close the diagnostic sinks and pooled connections.
    pub fn close(mut self) -> std::io::Result<()> {
        let res = self.release();
        self.closed = true;
        res
    }

    fn release(&mut self) -> std::io::Result<()> {
        let mut first_err = None;
        if let Some(sinks) = &self.diagnostics {
            if let Err(e) = sinks.flush_all() {
                first_err.get_or_insert(e);
            }
        }
        let pooled = {
            let mut pool = self.pool.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *pool)
        };
        tracing::debug!(
            pooled = pooled.len(),
            key_log = ?self.key_log,
            opened = self.connections_opened(),
            "transport released"
        );
        drop(pooled);
        first_err.map_or(Ok(()), Err)
    }

    fn checkout(&self) -> Result<PooledEasy, TransportError> {
        if let Some(pooled) = self.pool.lock().unwrap_or_else(|e| e.into_inner()).pop() {
            return Ok(pooled);
        }
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.new_easy(conn_id)
    }

    fn checkin(&self, pooled: PooledEasy) {
        self.pool
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(pooled);
    }

    /// Create an easy handle with the handle-wide settings applied.
    fn new_easy(&self, conn_id: u64) -> Result<PooledEasy, TransportError> {
        let mut easy = Easy::new();
        easy.http_version(self.http_version)?;
        easy.connect_timeout(self.options.connect_timeout)?;
        if let Some(timeout) = self.options.request_timeout {
            easy.timeout(timeout)?;
        }
        if let Some(ua) = &self.options.user_agent {
            easy.useragent(ua)?;
        }
        if let Some(path) = self.ca.path() {
            easy.cainfo(path)?;
        }
        if self.insecure {
            easy.ssl_verify_peer(false)?;
            easy.ssl_verify_host(false)?;
        }
        if let Some(sinks) = &self.diagnostics {
            sinks.open(conn_id)?;
            let sinks = Arc::clone(sinks);
            easy.verbose(true)?;
            easy.debug_function(move |kind, data| sinks.record(conn_id, kind, data))?;
        }
        tracing::debug!(conn_id, "new connection slot");
        Ok(PooledEasy { conn_id, easy })
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.release() {
                tracing::warn!("transport release on drop: {}", e);
            }
        }
    }
}

impl Transport for TransportHandle {
    fn send(&self, request: UploadRequest<'_>) -> Result<TransportResponse, TransportError> {
        validate_target(request.url)?;
        let mut pooled = self.checkout()?;
        tracing::debug!(conn_id = pooled.conn_id, url = request.url, "sending");
        let result = perform(&mut pooled.easy, &request);
        self.checkin(pooled);
        result
    }
}

/// Only absolute http(s) URLs are accepted as targets.
pub(super) fn validate_target(target: &str) -> Result<url::Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidTarget {
        target: target.to_string(),
        reason,
    };
    let url = url::Url::parse(target).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {:?}", other))),
    }
}

fn resolve_http_version(pref: HttpVersionPref) -> Result<HttpVersion, ConfigError> {
    let wanted = match pref {
        HttpVersionPref::Http3 => HttpVersion::V3,
        HttpVersionPref::Http2 => HttpVersion::V2TLS,
        HttpVersionPref::Http11 => HttpVersion::V11,
    };
    let mut scratch = Easy::new();
    match scratch.http_version(wanted) {
        Ok(()) => Ok(wanted),
        Err(e) if pref == HttpVersionPref::Http2 => {
            tracing::warn!("HTTP/2 unavailable ({}), falling back to HTTP/1.1", e);
            Ok(HttpVersion::V11)
        }
        Err(e) => Err(ConfigError::HttpVersion(pref, e)),
    }
}

/// One POST over `easy`. The body is read through a cursor owned by this
/// call, so concurrent jobs never share a read position.
fn perform(
    easy: &mut Easy,
    request: &UploadRequest<'_>,
) -> Result<TransportResponse, TransportError> {
    easy.url(request.url)?;
    easy.post(true)?;
    easy.post_field_size(request.body.len() as u64)?;

    let mut headers = List::new();
    headers.append(&format!("Content-Type: {}", request.content_type))?;
    // Send the body right away instead of waiting for 100-continue.
    headers.append("Expect:")?;
    easy.http_headers(headers)?;
    easy.progress(request.cancel.is_some())?;

    let mut body = Cursor::new(request.body);
    let mut response_headers: Vec<String> = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer.read_function(|buf| Ok(body.read(buf).unwrap_or(0)))?;
        transfer.header_function(|data| {
            if let Ok(s) = str::from_utf8(data) {
                let line = s.trim_end();
                // Interim (1xx) and redirect responses restart the header list.
                if line.starts_with("HTTP/") {
                    response_headers.clear();
                }
                if !line.is_empty() {
                    response_headers.push(line.to_string());
                }
            }
            true
        })?;
        // Response bodies are not reported; drain them.
        transfer.write_function(|data| Ok(data.len()))?;
        if let Some(cancel) = request.cancel {
            transfer.progress_function(move |_, _, _, _| !cancel.is_cancelled())?;
        }
        transfer.perform()?;
    }

    let status = easy.response_code()?;
    Ok(TransportResponse {
        status,
        headers: response_headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_target_accepts_http_and_https() {
        assert!(validate_target("https://a.example/up").is_ok());
        assert!(validate_target("http://127.0.0.1:8080/").is_ok());
    }

    #[test]
    fn validate_target_rejects_other_schemes_and_garbage() {
        assert!(matches!(
            validate_target("ftp://a.example/up"),
            Err(TransportError::InvalidTarget { .. })
        ));
        assert!(matches!(
            validate_target("not a url"),
            Err(TransportError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn configure_with_defaults_and_close() {
        let handle =
            TransportHandle::configure(TrustPolicy::default(), TransportOptions::default())
                .unwrap();
        assert_eq!(handle.connections_opened(), 0);
        handle.close().unwrap();
    }

    #[test]
    fn configure_fails_fast_on_bad_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let policy = TrustPolicy {
            extra_anchors: vec![dir.path().join("ca.crt")],
            system_bundle: Some(dir.path().join("ca.crt")),
            ..TrustPolicy::default()
        };
        let err = TransportHandle::configure(policy, TransportOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::SystemBundle { .. }));
    }

    #[test]
    fn pooled_handles_are_reused() {
        let handle = TransportHandle::configure(
            TrustPolicy::default(),
            TransportOptions {
                http_version: HttpVersionPref::Http11,
                ..TransportOptions::default()
            },
        )
        .unwrap();
        let a = handle.checkout().unwrap();
        let b = handle.checkout().unwrap();
        assert_ne!(a.conn_id, b.conn_id);
        let a_id = a.conn_id;
        handle.checkin(a);
        let again = handle.checkout().unwrap();
        assert_eq!(again.conn_id, a_id);
        assert_eq!(handle.connections_opened(), 2);
        handle.checkin(again);
        handle.checkin(b);
        handle.close().unwrap();
    }
}
