//! # CLI Command Implementations
//!
//! Each subcommand lives in its own file with an `Args` struct derived with
//! `clap` and an `execute` function. Loading the server configuration and
//! resolving materials is shared here.

pub mod check;
pub mod checkout;
pub mod latest;
pub mod poll;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use material_tracker::cipher::DisabledCipher;
use material_tracker::config::{self, ServerConfig};
use material_tracker::material::{Material, MaterialConfig};
use material_tracker::scm::{AdapterRegistry, PluginRegistry};
use material_tracker::secret::EnvSecretResolver;

/// Options every command that reads the server configuration takes.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to the server configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "material-tracker.yaml")]
    pub config: PathBuf,

    /// Root for flyweight clones and checkouts.
    ///
    /// Overrides `working_dir` from the configuration file. Defaults to the
    /// platform data directory (`~/.local/share/material-tracker` on Linux).
    #[arg(long, value_name = "DIR", env = "MATERIAL_TRACKER_HOME")]
    pub working_dir: Option<PathBuf>,
}

/// A loaded configuration plus what every command derives from it.
pub struct Loaded {
    pub config: ServerConfig,
    pub working_dir: PathBuf,
    pub registry: Arc<AdapterRegistry>,
}

impl ConfigArgs {
    pub fn load(&self) -> Result<Loaded> {
        let config = config::from_file(&self.config)
            .with_context(|| format!("Failed to load config from {}", self.config.display()))?;
        let working_dir = config.working_dir(self.working_dir.as_deref())?;
        let registry = AdapterRegistry::new(PluginRegistry::new()).with_command_timeout(config.command_timeout());
        log::debug!("Using working directory {}", working_dir.display());
        Ok(Loaded {
            config,
            working_dir,
            registry: Arc::new(registry),
        })
    }
}

impl Loaded {
    pub fn flyweight_root(&self) -> PathBuf {
        self.working_dir.join("flyweight")
    }

    pub fn pipelines_root(&self) -> PathBuf {
        self.working_dir.join("pipelines")
    }

    pub fn config_repo_root(&self) -> PathBuf {
        self.working_dir.join("config-repos")
    }
}

/// Resolve materials, reading `{{SECRET:[env][NAME]}}` passwords from the
/// environment.
pub fn resolve_materials<'a, I>(configs: I) -> Result<Vec<Material>>
where
    I: IntoIterator<Item = &'a MaterialConfig>,
{
    configs
        .into_iter()
        .map(|config| {
            let mut material = Material::from_config(config, &DisabledCipher)?;
            material
                .resolve_secrets(&EnvSecretResolver)
                .with_context(|| format!("Material {}", material.display_name()))?;
            Ok(material)
        })
        .collect()
}

/// Every distinct material in the configuration, pipelines first, then
/// config-repos, with secrets resolved.
pub fn all_materials(config: &ServerConfig) -> Result<Vec<Material>> {
    let mut materials = config.unique_materials(&DisabledCipher)?;
    for material in &mut materials {
        material
            .resolve_secrets(&EnvSecretResolver)
            .with_context(|| format!("Material {}", material.display_name()))?;
    }
    Ok(materials)
}
