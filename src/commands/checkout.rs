//! `checkout`: materialize a pipeline's working area at its latest revisions.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::Args;

use material_tracker::console::LogConsole;
use material_tracker::output::OutputConfig;
use material_tracker::revisions::adapter_assembler;
use material_tracker::scm::RevisionContext;
use material_tracker::workdir::{UpdateEngine, UpdateOutcome};

use super::{resolve_materials, ConfigArgs};

/// Check out every material of a pipeline at its latest revision
#[derive(Args, Debug)]
pub struct CheckoutArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    #[arg(short, long, value_name = "NAME")]
    pub pipeline: String,

    /// Pipeline working directory; materials land in their destination
    /// folders below it.
    #[arg(short, long, value_name = "DIR")]
    pub dest: PathBuf,
}

pub fn execute(args: CheckoutArgs, output: &OutputConfig) -> Result<()> {
    let loaded = args.config.load()?;
    let pipeline = loaded
        .config
        .pipeline(&args.pipeline)
        .ok_or_else(|| anyhow!("No pipeline named '{}'", args.pipeline))?;
    let materials = resolve_materials(&pipeline.materials)?;

    let snapshot = adapter_assembler(loaded.registry.clone(), &loaded.flyweight_root())
        .assemble(&pipeline.name, &materials, None)
        .with_context(|| format!("Could not determine latest revisions of '{}'", pipeline.name))?;

    std::fs::create_dir_all(&args.dest)
        .with_context(|| format!("Failed to create {}", args.dest.display()))?;
    let engine = UpdateEngine::new((*loaded.registry).clone());
    println!("{}", output.heading(&format!("Checking out {} into {}", pipeline.name, args.dest.display())));

    for entry in &snapshot {
        let material = entry.material();
        let context = match RevisionContext::from_modifications(entry.modifications()) {
            Some(context) => context,
            None => {
                println!("{} {}: no revision found", output.status(false), material.display_name());
                continue;
            }
        };
        let outcome = engine.update_to(material, &args.dest, &context, &LogConsole)?;
        let how = match outcome {
            UpdateOutcome::FreshCheckout => "fresh checkout",
            UpdateOutcome::Incremental => "updated in place",
            UpdateOutcome::RecoveredWithFreshCheckout => "recreated after a failed update",
            UpdateOutcome::NothingToMaterialize => "nothing to check out",
        };
        println!(
            "{} {} @ {} ({})",
            output.status(true),
            material.display_name(),
            context.latest.short(),
            how
        );
    }
    Ok(())
}
