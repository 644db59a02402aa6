//! hashsync CLI Binary
//!
//! Command-line interface for the hash-tree reconciliation engine.

use anyhow::Context;
use clap::Parser;
use hashsync::logging::init_logging;
use hashsync::tooling::cli::{Cli, CliContext};
use std::process;

fn run(cli: &Cli) -> anyhow::Result<String> {
    let context = CliContext::new(cli.workspace.clone(), cli.config.clone())
        .context("Error initializing workspace")?;

    let logging = cli.logging_config(&context.config().logging);
    init_logging(Some(&logging), Some(context.workspace_root()))
        .context("Error initializing logging")?;

    let output = context.execute(&cli.command)?;
    Ok(output)
}

fn main() {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
