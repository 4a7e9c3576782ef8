//! # Check Command Implementation
//!
//! Runs the connection check of every distinct material in the
//! configuration (pipeline materials and config-repos) and prints one line
//! per material. Messages are redacted by the adapters. The command fails
//! if any material is unreachable.
//!
//! This command is read-only: it neither clones nor checks anything out.

use anyhow::{bail, Result};
use clap::Args;
use rayon::prelude::*;

use material_tracker::output::OutputConfig;
use material_tracker::scm::ValidationResult;

use super::{all_materials, ConfigArgs};

/// Check that every material can be reached
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

pub fn execute(args: CheckArgs, output: &OutputConfig) -> Result<()> {
    let loaded = args.config.load()?;
    let materials = all_materials(&loaded.config)?;
    println!("Checking {} material(s)", materials.len());

    let results: Vec<(String, ValidationResult)> = materials
        .par_iter()
        .map(|material| {
            let result = match loaded.registry.adapter_for(material) {
                Ok(adapter) => adapter.check_connection(),
                Err(e) => ValidationResult::from_result(Err(e), material),
            };
            (material.display_name(), result)
        })
        .collect();

    let mut failed = 0;
    for (name, result) in &results {
        match result {
            ValidationResult::Valid => println!("{} {}", output.status(true), name),
            ValidationResult::Invalid(message) => {
                failed += 1;
                println!("{} {}: {}", output.status(false), name, message);
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} material(s) failed the connection check", failed, results.len());
    }
    println!("All materials are reachable");
    Ok(())
}
