use clap::Parser;
use fanup_core::logging;
use fanup_core::transport::install_key_log;

mod cli;

use crate::cli::{Cli, CliCommand, Outcome};

fn main() {
    let cli = Cli::parse();

    // File logging by default; stderr when asked for or when the state dir is unusable.
    if cli.verbose {
        logging::init_logging_stderr(true);
    } else if let Err(err) = logging::init_logging() {
        logging::init_logging_stderr(false);
        tracing::warn!("file logging unavailable, using stderr: {:#}", err);
    }

    match run(cli) {
        Ok(Outcome::Success) => {}
        Ok(Outcome::JobsFailed) => std::process::exit(1),
        Err(err) => {
            eprintln!("fanup error: {:#}", err);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<Outcome> {
    // The key log edits the environment, so it goes in before any runtime thread exists.
    if let CliCommand::Upload(args) = &cli.command {
        if let Some(path) = &args.keylog {
            install_key_log(path)?;
        }
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(cli.run())
}
