//! CLI for the fanup uploader.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use fanup_core::config;
use fanup_core::transport::HttpVersionPref;
use std::path::PathBuf;

use commands::{run_checksum, run_config, run_upload};

/// Top-level CLI for fanup.
#[derive(Debug, Parser)]
#[command(name = "fanup")]
#[command(about = "fanup: send one multipart upload to many HTTP targets at once", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/fanup/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug logging to stderr instead of the log file.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Upload a file to every target concurrently.
    Upload(UploadArgs),

    /// Print SHA-256 and size of files (e.g. before uploading).
    Checksum {
        /// Files to hash.
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,
    },

    /// Print the config file path and the effective configuration.
    Config,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// File to upload.
    #[arg(short, long, value_name = "PATH")]
    pub file: PathBuf,

    /// Form field name for the file (default from config, "file").
    #[arg(long, value_name = "NAME")]
    pub field_name: Option<String>,

    /// Extra plain form field; repeat for more.
    #[arg(long = "form", value_name = "KEY=VALUE", value_parser = parse_form_field)]
    pub form: Vec<(String, String)>,

    /// Extra trust anchor (PEM) on top of the system pool; repeatable.
    #[arg(long = "ca-cert", value_name = "PATH")]
    pub ca_certs: Vec<PathBuf>,

    /// Skip certificate verification. For test servers only.
    #[arg(long)]
    pub insecure: bool,

    /// Write TLS session keys to this file.
    #[arg(long, value_name = "PATH")]
    pub keylog: Option<PathBuf>,

    /// Write per-connection diagnostics to the current directory.
    #[arg(long, conflicts_with = "diagnostics_dir")]
    pub qlog: bool,

    /// Write per-connection diagnostics to DIR.
    #[arg(long, value_name = "DIR")]
    pub diagnostics_dir: Option<PathBuf>,

    /// Preferred HTTP version: h3, h2 or h1.1.
    #[arg(long, value_name = "V")]
    pub http_version: Option<HttpVersionPref>,

    /// Per-request timeout in seconds (0 = none).
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Upload endpoints (http or https URLs).
    #[arg(required = true, value_name = "TARGET")]
    pub targets: Vec<String>,
}

/// How a successful run ended; the binary maps `JobsFailed` to exit status 1.
/// For `checksum` it means some file could not be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    JobsFailed,
}

fn parse_form_field(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {:?}", s)),
    }
}

impl Cli {
    pub async fn run(self) -> Result<Outcome> {
        let cfg = match &self.config {
            Some(path) => config::load_from_path(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);

        match self.command {
            CliCommand::Upload(args) => run_upload(&cfg, args).await,
            CliCommand::Checksum { paths } => Ok(if run_checksum(paths).await? {
                Outcome::Success
            } else {
                Outcome::JobsFailed
            }),
            CliCommand::Config => {
                run_config(self.config.as_deref(), &cfg)?;
                Ok(Outcome::Success)
            }
        }
    }
}

#[cfg(test)]
mod tests;
