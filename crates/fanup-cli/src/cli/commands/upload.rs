//! `fanup upload`: send one file (plus form fields) to every target.

use anyhow::{Context, Result};
use fanup_core::config::FanupConfig;
use fanup_core::control::{CancelToken, UploadCancelled};
use fanup_core::dispatcher::{
    dispatch_all, DispatchAborted, DispatchOptions, UploadReport, UploadResult,
};
use fanup_core::payload::{UploadPart, UploadPayload};
use fanup_core::transport::{ConfigError, TransportHandle, TransportOptions, TrustPolicy};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::{Outcome, UploadArgs};

pub async fn run_upload(cfg: &FanupConfig, args: UploadArgs) -> Result<Outcome> {
    let payload = build_payload(cfg, &args)?;
    let (policy, options) = transport_settings(cfg, &args)?;
    let transport = Arc::new(
        TransportHandle::configure(policy, options).context("configure transport")?,
    );

    let cancel = CancelToken::new();
    let signal_token = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling uploads");
            eprintln!("cancelling uploads...");
            signal_token.cancel();
        }
    });

    let dispatched = {
        let targets = args.targets.clone();
        let transport = Arc::clone(&transport);
        let dispatch = DispatchOptions {
            cancel: Some(cancel.clone()),
        };
        tokio::task::spawn_blocking(move || {
            dispatch_all(&targets, Arc::new(payload), transport, &dispatch)
        })
        .await
        .context("upload dispatcher task")?
    };
    ctrl_c.abort();
    let (report, aborted) = match dispatched {
        Ok(report) => (report, None),
        Err(DispatchAborted { cause, partial }) => (partial, Some(cause)),
    };

    print_report(&report, args.json)?;
    let closed = close_transport(transport);
    conclude(&report, closed, aborted, cancel.is_cancelled())
}

fn close_transport(transport: Arc<TransportHandle>) -> Result<()> {
    match Arc::try_unwrap(transport) {
        Ok(transport) => transport.close().context("close transport"),
        Err(_) => {
            tracing::warn!("transport still shared at shutdown; releasing on drop");
            Ok(())
        }
    }
}

/// Outcome of a run whose report has already been printed. A failed close
/// only warns: every result is final by then.
pub(crate) fn conclude(
    report: &UploadReport,
    closed: Result<()>,
    aborted: Option<ConfigError>,
    cancelled: bool,
) -> Result<Outcome> {
    if let Err(e) = closed {
        tracing::warn!("{:#}", e);
        eprintln!("fanup warning: {:#}", e);
    }
    if let Some(cause) = aborted {
        return Err(anyhow::Error::new(cause).context("upload run aborted"));
    }
    if cancelled {
        return Err(UploadCancelled.into());
    }
    Ok(if report.all_succeeded() {
        Outcome::Success
    } else {
        Outcome::JobsFailed
    })
}

/// Form fields in command-line order, then the file part.
pub(crate) fn build_payload(cfg: &FanupConfig, args: &UploadArgs) -> Result<UploadPayload> {
    let meta = fs::metadata(&args.file)
        .with_context(|| format!("upload file {}", args.file.display()))?;
    anyhow::ensure!(meta.is_file(), "{} is not a regular file", args.file.display());

    let field_name = args.field_name.as_deref().unwrap_or(&cfg.field_name);
    let parts = args
        .form
        .iter()
        .map(|(k, v)| UploadPart::field(k.as_str(), v.as_str()))
        .chain(std::iter::once(UploadPart::file(field_name, &args.file)));
    let payload = UploadPayload::from_parts(parts).context("build payload")?;
    tracing::debug!(
        parts = payload.len(),
        size = meta.len(),
        file = %args.file.display(),
        "payload ready"
    );
    Ok(payload)
}

/// Config values overridden by command-line flags.
pub(crate) fn transport_settings(
    cfg: &FanupConfig,
    args: &UploadArgs,
) -> Result<(TrustPolicy, TransportOptions)> {
    let mut options = TransportOptions::from_config(cfg);
    if let Some(version) = args.http_version {
        options.http_version = version;
    }
    if let Some(secs) = args.timeout {
        options.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if args.qlog {
        options.diagnostics_dir = Some(std::env::current_dir().context("current directory")?);
    }
    if let Some(dir) = &args.diagnostics_dir {
        options.diagnostics_dir = Some(dir.clone());
    }

    let mut extra_anchors = cfg.ca_certs.clone();
    extra_anchors.extend(args.ca_certs.iter().cloned());
    let policy = TrustPolicy {
        extra_anchors,
        system_bundle: cfg.system_ca_bundle.clone(),
        insecure_skip_verify: args.insecure,
        key_log: args.keylog.clone(),
    };
    Ok((policy, options))
}

/// `OK   200 <target>` or `FAIL <reason> <target>`.
pub(crate) fn format_result(r: &UploadResult) -> String {
    match (&r.failure, r.status) {
        (None, Some(status)) => format!("OK   {} {}", status, r.target),
        (None, None) => format!("OK   {}", r.target),
        (Some(reason), _) => format!("FAIL {} {}", reason, r.target),
    }
}

fn print_report(report: &UploadReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for r in report.iter() {
        println!("{}", format_result(r));
    }
    eprintln!(
        "{} target(s): {} succeeded, {} failed",
        report.len(),
        report.succeeded(),
        report.failed()
    );
    Ok(())
}
