//! Per-target outcomes and the report returned to the caller.

use serde::Serialize;
use std::fmt;

use crate::transport::TransportErrorKind;

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The payload could not be encoded (unreadable source, duplicate name).
    Encoding { message: String },
    /// Connection, TLS, send or receive failure.
    Transport {
        class: TransportErrorKind,
        message: String,
    },
    /// The target answered with a non-2xx status.
    Status { code: u32, message: String },
    /// Cancelled before or during the transfer.
    Cancelled,
    /// The worker thread could not be started or panicked.
    Worker { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Encoding { message } => write!(f, "encoding: {}", message),
            FailureReason::Transport { message, .. } => write!(f, "transport: {}", message),
            FailureReason::Status { code, message } => {
                write!(f, "bad status {}", code)?;
                if !message.is_empty() {
                    write!(f, " ({})", message)?;
                }
                Ok(())
            }
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::Worker { message } => write!(f, "worker: {}", message),
        }
    }
}

/// Outcome of one upload job.
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub target: String,
    pub success: bool,
    /// Response status, when a response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Encoded body size, when encoding succeeded.
    pub bytes_sent: u64,
    pub elapsed_ms: u64,
}

impl UploadResult {
    pub(super) fn worker_failure(target: &str, message: impl Into<String>) -> Self {
        Self {
            target: target.to_string(),
            success: false,
            status: None,
            failure: Some(FailureReason::Worker {
                message: message.into(),
            }),
            bytes_sent: 0,
            elapsed_ms: 0,
        }
    }
}

/// All results of one dispatch, in the order the targets were given.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    pub results: Vec<UploadResult>,
}

impl UploadReport {
    pub fn new(results: Vec<UploadResult>) -> Self {
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|r| r.success)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UploadResult> {
        self.results.iter()
    }
}
