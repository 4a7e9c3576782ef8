//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use material_tracker::output::OutputConfig;

use crate::commands;

/// Material Tracker - Detect source changes and keep working copies current
#[derive(Parser, Debug)]
#[command(name = "material-tracker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace); `RUST_LOG` wins
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that every material can be reached
    Check(commands::check::CheckArgs),

    /// Show the latest revision of every material, per pipeline
    Latest(commands::latest::LatestArgs),

    /// Check out a pipeline's materials at their latest revisions
    Checkout(commands::checkout::CheckoutArgs),

    /// Poll materials and re-parse config-repos
    Poll(commands::poll::PollArgs),
}

impl Cli {
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);
        let output = OutputConfig::from_env_and_flag(&self.color);

        match self.command {
            Commands::Check(args) => commands::check::execute(args, &output),
            Commands::Latest(args) => commands::latest::execute(args, &output),
            Commands::Checkout(args) => commands::checkout::execute(args, &output),
            Commands::Poll(args) => commands::poll::execute(args, &output),
        }
    }
}

fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    // A logger may already be installed when running under a test harness.
    let _ = env_logger::Builder::from_env(env)
        .format_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_latest_with_pipeline() {
        let cli = Cli::try_parse_from([
            "material-tracker",
            "--color",
            "never",
            "latest",
            "--config",
            "server.yaml",
            "--pipeline",
            "build",
        ])
        .unwrap();
        assert_eq!(cli.color, "never");
        match cli.command {
            Commands::Latest(args) => {
                assert_eq!(args.pipeline.as_deref(), Some("build"));
                assert_eq!(args.config.config.to_str(), Some("server.yaml"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_checkout_requires_pipeline_and_dest() {
        assert!(Cli::try_parse_from(["material-tracker", "checkout", "--pipeline", "build"]).is_err());
    }
}
