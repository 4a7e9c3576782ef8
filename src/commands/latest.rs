//! `latest`: the current snapshot of each pipeline.

use anyhow::{anyhow, Result};
use clap::Args;

use material_tracker::output::OutputConfig;
use material_tracker::revisions::adapter_assembler;

use super::{resolve_materials, ConfigArgs};

/// Print the latest revision of every material, per pipeline
#[derive(Args, Debug)]
pub struct LatestArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Only this pipeline.
    #[arg(short, long, value_name = "NAME")]
    pub pipeline: Option<String>,
}

pub fn execute(args: LatestArgs, output: &OutputConfig) -> Result<()> {
    let loaded = args.config.load()?;
    let pipelines: Vec<_> = match &args.pipeline {
        Some(name) => vec![loaded
            .config
            .pipeline(name)
            .ok_or_else(|| anyhow!("No pipeline named '{}'", name))?],
        None => loaded.config.pipelines.iter().collect(),
    };

    let assembler = adapter_assembler(loaded.registry.clone(), &loaded.flyweight_root());
    let mut failures = 0;
    for pipeline in pipelines {
        println!("{}", output.heading(&pipeline.name));
        let materials = resolve_materials(&pipeline.materials)?;
        match assembler.assemble(&pipeline.name, &materials, None) {
            Ok(snapshot) => {
                for entry in &snapshot {
                    let revision = entry
                        .latest_revision()
                        .map(|r| r.short())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "  {} @ {} ({})",
                        entry.material().display_name(),
                        revision,
                        output.trigger(entry.is_changed(), entry.should_trigger())
                    );
                }
                println!("  {}", snapshot.build_cause_message());
            }
            Err(e) => {
                failures += 1;
                println!("  {}", output.warning(&e.to_string()));
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} pipeline(s) could not be checked", failures));
    }
    Ok(())
}
