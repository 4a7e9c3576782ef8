//! # Poll Command Implementation
//!
//! Runs the update orchestrator over every material in the configuration.
//! Auto-update materials are polled on `poll_interval_secs`; config-repos
//! are re-parsed whenever their material finishes an update. With `--once`
//! a single cycle runs, the command waits for it (listeners included) and
//! prints the resulting config-repo state.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use log::info;

use material_tracker::cipher::DisabledCipher;
use material_tracker::config_repo::ConfigRepoService;
use material_tracker::console::LogConsole;
use material_tracker::orchestrator::{MaterialUpdateService, PollingUpdater};
use material_tracker::output::OutputConfig;
use material_tracker::persistence::InMemoryMaterialRepository;
use material_tracker::revisions::AdapterModificationSource;
use material_tracker::workdir::UpdateEngine;

use super::{all_materials, ConfigArgs};

/// Poll materials and keep config-repos parsed
#[derive(Args, Debug)]
pub struct PollArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Run one poll cycle, wait for it and exit.
    #[arg(long)]
    pub once: bool,
}

pub fn execute(args: PollArgs, output: &OutputConfig) -> Result<()> {
    let loaded = args.config.load()?;
    let config = &loaded.config;
    let materials = all_materials(config)?;

    let source = Arc::new(AdapterModificationSource::new(
        loaded.registry.clone(),
        loaded.flyweight_root(),
    ));
    let repository = Arc::new(InMemoryMaterialRepository::with_config_repos(
        config.config_repos.iter().map(|r| r.material.clone()).collect(),
    ));
    let service = Arc::new(MaterialUpdateService::new(
        Arc::new(PollingUpdater::new(source, repository)),
        config.worker_threads(),
    )?);

    let config_repos = Arc::new(
        ConfigRepoService::new(
            &config.config_repos,
            &DisabledCipher,
            UpdateEngine::new((*loaded.registry).clone()).server_side(true),
            loaded.config_repo_root(),
        )?
        .with_console(Arc::new(LogConsole)),
    );
    config_repos.set_base(config.base_partial())?;
    service.add_listener(config_repos.clone())?;

    if args.once {
        let scheduled = service.poll_cycle(&materials)?;
        info!("Scheduled {} material update(s)", scheduled);
        let idle = service.wait_until_idle(config.hung_threshold());
        service.shutdown()?;
        if !idle {
            bail!(
                "Updates still running after {}s",
                config.hung_threshold().as_secs()
            );
        }
        report(&config_repos, config, output)?;
        return Ok(());
    }

    info!(
        "Polling {} material(s) every {}s",
        materials.len(),
        config.poll_interval().as_secs()
    );
    service.poll_cycle(&materials)?;
    service.start_polling(materials, config.poll_interval(), config.hung_threshold())?;
    loop {
        std::thread::sleep(Duration::from_secs(3600));
    }
}

fn report(
    config_repos: &ConfigRepoService,
    config: &material_tracker::config::ServerConfig,
    output: &OutputConfig,
) -> Result<()> {
    for repo in &config.config_repos {
        match config_repos.parse_result(&repo.id)? {
            Some(result) if result.is_success() => println!(
                "{} config-repo {} @ {}",
                output.status(true),
                repo.id,
                result.revision.short()
            ),
            Some(result) => println!(
                "{} config-repo {} @ {}: {}",
                output.status(false),
                repo.id,
                result.revision.short(),
                result.error.as_deref().unwrap_or("unknown error")
            ),
            None => println!("{} config-repo {}: not parsed", output.warning("[ -- ]"), repo.id),
        }
    }
    let merged = config_repos.merged_config()?;
    println!("{} pipeline(s) in the merged configuration", merged.pipelines().len());
    Ok(())
}
