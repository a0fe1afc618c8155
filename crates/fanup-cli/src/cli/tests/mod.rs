//! CLI parse tests.

use super::{Cli, CliCommand, UploadArgs};
use clap::Parser;

pub(super) fn parse(args: &[&str]) -> CliCommand {
    let cli = Cli::try_parse_from(args).unwrap();
    cli.command
}

pub(super) fn parse_upload(args: &[&str]) -> UploadArgs {
    match parse(args) {
        CliCommand::Upload(upload) => upload,
        other => panic!("expected Upload, got {:?}", other),
    }
}
