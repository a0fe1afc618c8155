//! One upload job: encode, send, validate.

use std::fmt;
use std::time::Instant;

use crate::control::CancelToken;
use crate::multipart;
use crate::payload::UploadPayload;
use crate::transport::{ConfigError, Transport, TransportError, UploadRequest};

use super::result::{FailureReason, UploadResult};

/// One target of a dispatch. The payload is shared and read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct UploadJob {
    /// Position of the target in the input list.
    pub index: usize,
    pub target: String,
}

/// Job lifecycle. `Succeeded` and `Failed` are terminal.
///
/// The transport call is blocking, so `Sending` spans the whole exchange and
/// `AwaitingResponse` covers validating the received response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum JobState {
    Pending,
    Encoding,
    Sending,
    AwaitingResponse,
    Succeeded,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct JobRun<'a> {
    job: &'a UploadJob,
    state: JobState,
    started: Instant,
    bytes_sent: u64,
}

impl<'a> JobRun<'a> {
    fn new(job: &'a UploadJob) -> Self {
        Self {
            job,
            state: JobState::Pending,
            started: Instant::now(),
            bytes_sent: 0,
        }
    }

    fn enter(&mut self, next: JobState) {
        tracing::debug!(target_url = %self.job.target, from = %self.state, to = %next, "job state");
        self.state = next;
    }

    fn finish(mut self, status: Option<u32>, failure: Option<FailureReason>) -> UploadResult {
        let success = failure.is_none();
        self.enter(if success {
            JobState::Succeeded
        } else {
            JobState::Failed
        });
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match &failure {
            None => tracing::info!(
                target_url = %self.job.target,
                status = status.unwrap_or_default(),
                bytes = self.bytes_sent,
                elapsed_ms,
                "upload succeeded"
            ),
            Some(reason) => tracing::warn!(
                target_url = %self.job.target,
                elapsed_ms,
                "upload failed: {}",
                reason
            ),
        }
        UploadResult {
            target: self.job.target.clone(),
            success,
            status,
            failure,
            bytes_sent: self.bytes_sent,
            elapsed_ms,
        }
    }
}

/// What a worker hands back: its result, plus the error that aborts the run
/// when the job hit one.
#[derive(Debug)]
pub(super) struct JobOutcome {
    pub(super) result: UploadResult,
    pub(super) fatal: Option<ConfigError>,
}

impl From<UploadResult> for JobOutcome {
    fn from(result: UploadResult) -> Self {
        Self {
            result,
            fatal: None,
        }
    }
}

/// Run one job to a terminal state. Never panics on job-level errors; every
/// failure is folded into the returned result.
///
/// A fatal error cancels `run_cancel` so sibling jobs stop early.
pub(super) fn run_job<T>(
    job: &UploadJob,
    payload: &UploadPayload,
    transport: &T,
    run_cancel: &CancelToken,
) -> JobOutcome
where
    T: Transport + ?Sized,
{
    let mut run = JobRun::new(job);
    if run_cancel.is_cancelled() {
        return run.finish(None, Some(FailureReason::Cancelled)).into();
    }

    run.enter(JobState::Encoding);
    let encoded = match multipart::encode(payload) {
        Ok(encoded) => encoded,
        Err(e) => {
            let message = error_chain(e);
            return run.finish(None, Some(FailureReason::Encoding { message })).into();
        }
    };
    run.bytes_sent = encoded.body.len() as u64;

    run.enter(JobState::Sending);
    let request = UploadRequest {
        url: &job.target,
        content_type: &encoded.content_type,
        body: &encoded.body,
        cancel: Some(run_cancel),
    };
    let response = match transport.send(request) {
        Ok(response) => response,
        Err(TransportError::Cancelled) => {
            return run.finish(None, Some(FailureReason::Cancelled)).into();
        }
        Err(e) => {
            let class = e.kind();
            return match e.into_fatal() {
                Ok(fatal) => {
                    tracing::error!(
                        target_url = %job.target,
                        error = &fatal as &(dyn std::error::Error + 'static),
                        "aborting run"
                    );
                    run_cancel.cancel();
                    let reason = FailureReason::Transport {
                        class,
                        message: fatal.to_string(),
                    };
                    JobOutcome {
                        result: run.finish(None, Some(reason)),
                        fatal: Some(fatal),
                    }
                }
                Err(e) => {
                    let reason = FailureReason::Transport {
                        class,
                        message: error_chain(e),
                    };
                    run.finish(None, Some(reason)).into()
                }
            };
        }
    };

    run.enter(JobState::AwaitingResponse);
    if response.is_success() {
        run.finish(Some(response.status), None).into()
    } else {
        let message = response.headers.first().cloned().unwrap_or_default();
        let reason = FailureReason::Status {
            code: response.status,
            message,
        };
        run.finish(Some(response.status), Some(reason)).into()
    }
}

/// `outer: inner: innermost`.
fn error_chain<E>(e: E) -> String
where
    E: std::error::Error + Send + Sync + 'static,
{
    format!("{:#}", anyhow::Error::new(e))
}
