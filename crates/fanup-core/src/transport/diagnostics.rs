//! Per-connection diagnostic sinks fed by libcurl's debug callback.
//!
//! Each pooled easy handle owns its connections, so its slot id is the
//! connection identifier. A sink is opened the first time a slot is created
//! and receives one JSON object per line.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use curl::easy::InfoType;

use super::{ConfigError, TransportError};

/// Sink file for connection `conn_id` inside `dir`: `client_<hex id>.log`.
pub fn sink_path(dir: &Path, conn_id: u64) -> PathBuf {
    dir.join(format!("client_{:016x}.log", conn_id))
}

#[derive(Debug)]
pub(super) struct DiagnosticSinks {
    dir: PathBuf,
    started: Instant,
    sinks: Mutex<HashMap<u64, BufWriter<File>>>,
}

impl DiagnosticSinks {
    /// Create the directory if needed. Fails when it cannot be used.
    pub(super) fn prepare(dir: &Path) -> Result<Self, ConfigError> {
        let err = |source| ConfigError::Diagnostics {
            path: dir.to_path_buf(),
            source,
        };
        fs::create_dir_all(dir).map_err(err)?;
        let meta = fs::metadata(dir).map_err(err)?;
        if meta.permissions().readonly() {
            return Err(err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "directory is read-only",
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            started: Instant::now(),
            sinks: Mutex::new(HashMap::new()),
        })
    }

    /// Open the sink for `conn_id` if it is not open yet.
    pub(super) fn open(&self, conn_id: u64) -> Result<(), TransportError> {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        if sinks.contains_key(&conn_id) {
            return Ok(());
        }
        let path = sink_path(&self.dir, conn_id);
        let file = File::create(&path).map_err(|source| {
            tracing::error!(path = %path.display(), error = %source, "cannot open diagnostic sink");
            TransportError::DiagnosticSink {
                path: path.clone(),
                source,
            }
        })?;
        tracing::info!(path = %path.display(), "created diagnostic sink");
        sinks.insert(conn_id, BufWriter::new(file));
        Ok(())
    }

    /// Append one libcurl debug event for `conn_id`. Body bytes are not
    /// recorded, only their length.
    pub(super) fn record(&self, conn_id: u64, kind: InfoType, data: &[u8]) {
        let (event, text) = match kind {
            InfoType::Text => ("text", Some(data)),
            InfoType::HeaderIn => ("header_in", Some(data)),
            InfoType::HeaderOut => ("header_out", Some(data)),
            InfoType::DataIn => ("data_in", None),
            InfoType::DataOut => ("data_out", None),
            InfoType::SslDataIn => ("tls_data_in", None),
            InfoType::SslDataOut => ("tls_data_out", None),
            _ => ("other", None),
        };
        let line = serde_json::json!({
            "elapsed_ms": self.started.elapsed().as_millis() as u64,
            "conn": format!("{:016x}", conn_id),
            "event": event,
            "len": data.len(),
            "text": text.map(|t| String::from_utf8_lossy(t).trim_end().to_string()),
        });
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sink) = sinks.get_mut(&conn_id) {
            let _ = writeln!(sink, "{}", line);
        }
    }

    /// Flush every open sink; returns the first error.
    pub(super) fn flush_all(&self) -> io::Result<()> {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        let mut first_err = None;
        for sink in sinks.values_mut() {
            if let Err(e) = sink.flush() {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    #[cfg(test)]
    fn open_count(&self) -> usize {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
