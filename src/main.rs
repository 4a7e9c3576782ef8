//! # Material Tracker CLI
//!
//! Binary entry point. Parses arguments with `clap`, installs logging and
//! dispatches to a subcommand; the work itself happens in the
//! `material_tracker` library.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
