//! Concurrent upload of one payload to many targets.
//!
//! One OS thread per target. Every job encodes its own body from the shared,
//! immutable payload and sends it through the shared transport; results come
//! back over a channel and are collected into a report in input order.

mod job;
mod result;

pub use result::{FailureReason, UploadReport, UploadResult};

use std::any::Any;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::checksum;
use crate::control::CancelToken;
use crate::payload::{PartSource, UploadPayload};
use crate::transport::{ConfigError, Transport};

use job::{JobOutcome, UploadJob};

/// Per-run dispatch settings.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Checked before each job sends and polled during transfers.
    pub cancel: Option<CancelToken>,
}

/// A job hit an error that stops the whole run, such as a diagnostic sink
/// that could not be opened. Jobs still running were cancelled; `partial`
/// holds one result per target all the same.
#[derive(Debug, thiserror::Error)]
#[error("upload run aborted")]
pub struct DispatchAborted {
    #[source]
    pub cause: ConfigError,
    pub partial: UploadReport,
}

/// Upload `payload` to every target concurrently and wait for all of them.
///
/// Returns exactly one result per target, in the order given. A failing or
/// panicking job never prevents the others from completing. Duplicate
/// targets are uploaded to once per occurrence.
///
/// A fatal error in any job cancels the rest and turns the return value into
/// `DispatchAborted`.
pub fn dispatch_all<T>(
    targets: &[String],
    payload: Arc<UploadPayload>,
    transport: Arc<T>,
    options: &DispatchOptions,
) -> Result<UploadReport, DispatchAborted>
where
    T: Transport + ?Sized + 'static,
{
    let count = targets.len();
    if count == 0 {
        return Ok(UploadReport::default());
    }
    log_payload_digest(&payload);
    tracing::info!(targets = count, parts = payload.len(), "dispatching uploads");
    let started = Instant::now();

    // Cancelled by the caller or by a fatal job error.
    let run_cancel = options
        .cancel
        .as_ref()
        .map_or_else(CancelToken::new, CancelToken::child);

    let mut results: Vec<Option<UploadResult>> = vec![None; count];
    let (tx, rx) = mpsc::channel::<(usize, JobOutcome)>();
    let mut handles = Vec::with_capacity(count);
    for (index, target) in targets.iter().enumerate() {
        let job = UploadJob {
            index,
            target: target.clone(),
        };
        let tx = tx.clone();
        let payload = Arc::clone(&payload);
        let transport = Arc::clone(&transport);
        let cancel = run_cancel.clone();
        let spawned = thread::Builder::new()
            .name(format!("fanup-job-{}", index))
            .spawn(move || {
                let outcome = job::run_job(&job, &payload, transport.as_ref(), &cancel);
                let _ = tx.send((job.index, outcome));
            });
        match spawned {
            Ok(h) => handles.push((index, h)),
            Err(e) => {
                tracing::error!(target_url = %target, "spawn upload worker: {}", e);
                results[index] = Some(UploadResult::worker_failure(
                    target,
                    format!("spawn worker thread: {}", e),
                ));
            }
        }
    }
    drop(tx);

    let mut fatal: Option<ConfigError> = None;
    let mut to_receive = handles.len();
    while to_receive > 0 {
        match rx.recv() {
            Ok((index, outcome)) => {
                results[index] = Some(outcome.result);
                if let Some(cause) = outcome.fatal {
                    fatal.get_or_insert(cause);
                }
                to_receive -= 1;
            }
            // Every sender is gone: the remaining workers panicked.
            Err(_) => break,
        }
    }

    for (index, h) in handles {
        if let Err(panic) = h.join() {
            let message = panic_message(panic.as_ref());
            tracing::error!(target_url = %targets[index], "upload worker panicked: {}", message);
            results[index].get_or_insert_with(|| {
                UploadResult::worker_failure(&targets[index], format!("panicked: {}", message))
            });
        }
    }

    let report = UploadReport::new(
        results
            .into_iter()
            .zip(targets)
            .map(|(res, target)| {
                res.unwrap_or_else(|| UploadResult::worker_failure(target, "exited without a result"))
            })
            .collect(),
    );
    tracing::info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        aborted = fatal.is_some(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "dispatch finished"
    );
    match fatal {
        Some(cause) => Err(DispatchAborted {
            cause,
            partial: report,
        }),
        None => Ok(report),
    }
}

/// SHA-256 of every part at TRACE. Reads file parts once more, so it is
/// skipped entirely below that level.
fn log_payload_digest(payload: &UploadPayload) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    for part in payload.parts() {
        let digest = match &part.source {
            PartSource::Bytes(data) => Ok(checksum::sha256_bytes(data)),
            PartSource::File(path) => checksum::sha256_path(path),
        };
        match digest {
            Ok(sha256) => tracing::trace!(part = %part.name, %sha256, "payload part"),
            Err(e) => tracing::trace!(part = %part.name, "payload part digest unavailable: {:#}", e),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::{boundary_from_content_type, parse_form_data};
    use crate::payload::UploadPart;
    use crate::transport::{TransportError, TransportErrorKind, TransportResponse, UploadRequest};
    use std::collections::HashMap;
    use std::io::{self, Write};
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    enum Reply {
        Status(u32),
        SlowStatus(Duration, u32),
        ConnectionRefused,
        SinkFailure,
        /// Hold the request until the run is cancelled.
        WaitForCancel,
        Panic,
    }

    /// Answers per URL and records every body it receives.
    struct MockTransport {
        replies: HashMap<String, Reply>,
        received: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    impl MockTransport {
        fn new(replies: &[(&str, Reply)]) -> Arc<Self> {
            Arc::new(Self {
                replies: replies
                    .iter()
                    .map(|(url, r)| (url.to_string(), r.clone()))
                    .collect(),
                received: Mutex::new(Vec::new()),
            })
        }

        fn received(&self) -> Vec<(String, String, Vec<u8>)> {
            self.received.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        fn send(&self, req: UploadRequest<'_>) -> Result<TransportResponse, TransportError> {
            let reply = self.replies.get(req.url).cloned().unwrap_or(Reply::Status(200));
            if let Reply::Panic = reply {
                panic!("mock transport exploded");
            }
            self.received.lock().unwrap().push((
                req.url.to_string(),
                req.content_type.to_string(),
                req.body.to_vec(),
            ));
            let status = match reply {
                Reply::Status(s) => s,
                Reply::SlowStatus(delay, s) => {
                    thread::sleep(delay);
                    s
                }
                Reply::ConnectionRefused => return Err(TransportError::from(curl::Error::new(7))),
                Reply::SinkFailure => {
                    return Err(TransportError::DiagnosticSink {
                        path: PathBuf::from("/diag/client_0000000000000001.log"),
                        source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
                    })
                }
                Reply::WaitForCancel => {
                    let deadline = Instant::now() + Duration::from_secs(10);
                    while Instant::now() < deadline {
                        if req.cancel.is_some_and(CancelToken::is_cancelled) {
                            return Err(TransportError::Cancelled);
                        }
                        thread::sleep(Duration::from_millis(5));
                    }
                    200
                }
                Reply::Panic => unreachable!(),
            };
            Ok(TransportResponse {
                status,
                headers: vec![format!("HTTP/1.1 {} Mock", status)],
            })
        }
    }

    fn targets(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|s| s.to_string()).collect()
    }

    fn single_file_payload(data: &[u8]) -> Arc<UploadPayload> {
        let payload =
            UploadPayload::from_parts([UploadPart::file_bytes("file", "blob.bin", data.to_vec())])
                .unwrap();
        Arc::new(payload)
    }

    #[test]
    fn two_targets_one_accepts_one_rejects() {
        let data: Vec<u8> = (0u8..37).collect();
        let transport = MockTransport::new(&[
            ("https://a.example/up", Reply::Status(200)),
            ("https://b.example/up", Reply::Status(500)),
        ]);
        let urls = targets(&["https://a.example/up", "https://b.example/up"]);
        let report = dispatch_all(
            &urls,
            single_file_payload(&data),
            Arc::clone(&transport),
            &DispatchOptions::default(),
        )
        .unwrap();

        assert_eq!(report.len(), 2);
        let a = &report.results[0];
        let b = &report.results[1];
        assert_eq!(a.target, "https://a.example/up");
        assert!(a.success);
        assert_eq!(a.status, Some(200));
        assert_eq!(b.target, "https://b.example/up");
        assert!(!b.success);
        assert_eq!(b.status, Some(500));
        assert!(matches!(b.failure, Some(FailureReason::Status { code: 500, .. })));
        assert!(a.bytes_sent > data.len() as u64);

        // Both targets saw the full 37 bytes.
        for (_, content_type, body) in transport.received() {
            let boundary = boundary_from_content_type(&content_type).unwrap();
            let parts = parse_form_data(&body, &boundary).unwrap();
            assert_eq!(parts.len(), 1);
            assert_eq!(parts[0].data, data);
        }
    }

    #[test]
    fn every_target_gets_exactly_one_result_in_input_order() {
        let urls: Vec<String> = (0..8).map(|i| format!("https://t{}.example/up", i)).collect();
        // Later targets finish first.
        let replies: Vec<(String, Reply)> = urls
            .iter()
            .enumerate()
            .map(|(i, u)| {
                let delay = Duration::from_millis((8 - i as u64) * 15);
                let status = if i % 3 == 0 { 503 } else { 201 };
                (u.clone(), Reply::SlowStatus(delay, status))
            })
            .collect();
        let refs: Vec<(&str, Reply)> = replies.iter().map(|(u, r)| (u.as_str(), r.clone())).collect();
        let transport = MockTransport::new(&refs);

        let report = dispatch_all(
            &urls,
            single_file_payload(b"payload"),
            Arc::clone(&transport),
            &DispatchOptions::default(),
        )
        .unwrap();

        let got: Vec<&str> = report.iter().map(|r| r.target.as_str()).collect();
        let want: Vec<&str> = urls.iter().map(|s| s.as_str()).collect();
        assert_eq!(got, want);
        assert_eq!(report.failed(), 3);
        assert_eq!(report.succeeded(), 5);
        assert_eq!(transport.received().len(), 8);
    }

    #[test]
    fn a_failing_job_does_not_block_its_siblings() {
        let transport = MockTransport::new(&[
            ("https://down.example/up", Reply::ConnectionRefused),
            ("https://slow.example/up", Reply::SlowStatus(Duration::from_millis(100), 200)),
        ]);
        let urls = targets(&[
            "https://down.example/up",
            "https://slow.example/up",
            "https://fast.example/up",
        ]);
        let report = dispatch_all(
            &urls,
            single_file_payload(b"x"),
            transport,
            &DispatchOptions::default(),
        )
        .unwrap();
        assert_eq!(report.len(), 3);
        match &report.results[0].failure {
            Some(FailureReason::Transport { class, .. }) => {
                assert_eq!(*class, TransportErrorKind::Connection)
            }
            other => panic!("unexpected failure {:?}", other),
        }
        assert!(report.results[1].success);
        assert!(report.results[2].success);
    }

    #[test]
    fn shared_file_payload_reaches_every_target_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();
        let payload = UploadPayload::from_parts([
            UploadPart::field("note", "nightly"),
            UploadPart::file("file", &path),
        ])
        .unwrap();

        let urls: Vec<String> = (0..6).map(|i| format!("https://m{}.example/", i)).collect();
        let transport = MockTransport::new(&[]);
        let report = dispatch_all(
            &urls,
            Arc::new(payload),
            Arc::clone(&transport),
            &DispatchOptions::default(),
        )
        .unwrap();
        assert!(report.all_succeeded());

        let received = transport.received();
        assert_eq!(received.len(), 6);
        for (_, content_type, body) in received {
            let boundary = boundary_from_content_type(&content_type).unwrap();
            let parts = parse_form_data(&body, &boundary).unwrap();
            assert_eq!(parts.len(), 2);
            assert_eq!(parts[0].name, "note");
            assert_eq!(parts[0].data, b"nightly");
            assert_eq!(parts[1].filename.as_deref(), Some("report.csv"));
            assert_eq!(parts[1].data, content);
        }
    }

    #[test]
    fn panicking_job_is_reported_and_others_complete() {
        let transport = MockTransport::new(&[("https://boom.example/", Reply::Panic)]);
        let urls = targets(&["https://ok.example/", "https://boom.example/", "https://ok2.example/"]);
        let report = dispatch_all(
            &urls,
            single_file_payload(b"x"),
            transport,
            &DispatchOptions::default(),
        )
        .unwrap();
        assert_eq!(report.len(), 3);
        assert!(report.results[0].success);
        assert!(report.results[2].success);
        match &report.results[1].failure {
            Some(FailureReason::Worker { message }) => {
                assert!(message.contains("mock transport exploded"), "{}", message)
            }
            other => panic!("unexpected failure {:?}", other),
        }
    }

    #[test]
    fn cancelled_token_fails_every_job_without_sending() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let transport = MockTransport::new(&[]);
        let urls = targets(&["https://a.example/", "https://b.example/"]);
        let report = dispatch_all(
            &urls,
            single_file_payload(b"x"),
            Arc::clone(&transport),
            &DispatchOptions {
                cancel: Some(cancel),
            },
        )
        .unwrap();
        assert_eq!(report.failed(), 2);
        assert!(report
            .iter()
            .all(|r| r.failure == Some(FailureReason::Cancelled)));
        assert!(transport.received().is_empty());
    }

    #[test]
    fn unreadable_file_fails_each_job_with_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let payload =
            UploadPayload::from_parts([UploadPart::file("file", dir.path().join("gone.bin"))])
                .unwrap();
        let transport = MockTransport::new(&[]);
        let urls = targets(&["https://a.example/", "https://b.example/", "https://c.example/"]);
        let report = dispatch_all(
            &urls,
            Arc::new(payload),
            Arc::clone(&transport),
            &DispatchOptions::default(),
        )
        .unwrap();
        assert_eq!(report.len(), 3);
        for r in report.iter() {
            assert!(matches!(r.failure, Some(FailureReason::Encoding { .. })));
            assert_eq!(r.bytes_sent, 0);
        }
        assert!(transport.received().is_empty());
    }

    #[test]
    fn duplicate_targets_are_separate_jobs() {
        let transport = MockTransport::new(&[]);
        let urls = targets(&["https://a.example/", "https://a.example/"]);
        let report = dispatch_all(
            &urls,
            single_file_payload(b"x"),
            Arc::clone(&transport),
            &DispatchOptions::default(),
        )
        .unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(transport.received().len(), 2);
    }

    #[test]
    fn no_targets_yields_empty_report() {
        let report = dispatch_all(
            &[],
            single_file_payload(b"x"),
            MockTransport::new(&[]),
            &DispatchOptions::default(),
        )
        .unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn sink_failure_aborts_the_run_and_cancels_siblings() {
        let caller = CancelToken::new();
        let transport = MockTransport::new(&[
            ("https://diag.example/", Reply::SinkFailure),
            ("https://slow1.example/", Reply::WaitForCancel),
            ("https://slow2.example/", Reply::WaitForCancel),
        ]);
        let urls = targets(&[
            "https://slow1.example/",
            "https://diag.example/",
            "https://slow2.example/",
        ]);
        let started = Instant::now();
        let aborted = dispatch_all(
            &urls,
            single_file_payload(b"x"),
            transport,
            &DispatchOptions {
                cancel: Some(caller.clone()),
            },
        )
        .unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(aborted.cause, ConfigError::DiagnosticSink { .. }));
        let partial = &aborted.partial;
        assert_eq!(partial.len(), 3);
        assert!(matches!(
            partial.results[1].failure,
            Some(FailureReason::Transport { .. })
        ));
        assert_eq!(partial.results[0].failure, Some(FailureReason::Cancelled));
        assert_eq!(partial.results[2].failure, Some(FailureReason::Cancelled));
        // The abort stays inside the run.
        assert!(!caller.is_cancelled());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn digest_log_at(level: tracing::Level, payload: &UploadPayload) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || log_payload_digest(payload));
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn payload_digest_is_only_computed_at_trace() {
        let dir = tempfile::tempdir().unwrap();
        let payload = UploadPayload::from_parts([
            UploadPart::field("note", "abc"),
            UploadPart::file("file", dir.path().join("missing.bin")),
        ])
        .unwrap();
        let abc_sha256 = checksum::sha256_bytes(b"abc");

        let debug = digest_log_at(tracing::Level::DEBUG, &payload);
        assert!(!debug.contains(&abc_sha256), "{}", debug);
        assert!(!debug.contains("digest unavailable"), "{}", debug);

        let trace = digest_log_at(tracing::Level::TRACE, &payload);
        assert!(trace.contains(&abc_sha256), "{}", trace);
        assert!(trace.contains("digest unavailable"), "{}", trace);
    }
}
