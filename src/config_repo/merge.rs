//! Merging partial configs into the live configuration.
//!
//! The local (base) partial goes first, then config-repos in declaration
//! order. Environments sharing a name are unioned. A pipeline name defined
//! by two sources is a conflict attributed to the later source.

use std::collections::BTreeMap;
use std::fmt;

use super::partial::{EnvironmentDefinition, PartialConfig, PipelineDefinition};
use crate::error::{Error, Result};
use crate::revision::Revision;

/// Where a merged pipeline came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    Local,
    ConfigRepo { id: String, revision: Revision },
}

impl fmt::Display for ConfigOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigOrigin::Local => write!(f, "local configuration"),
            ConfigOrigin::ConfigRepo { id, revision } => write!(f, "config-repo {} at {}", id, revision.short()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedPipeline {
    pub definition: PipelineDefinition,
    pub origin: ConfigOrigin,
}

/// The live configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedConfig {
    pipelines: Vec<MergedPipeline>,
    environments: BTreeMap<String, EnvironmentDefinition>,
}

impl MergedConfig {
    pub fn pipelines(&self) -> &[MergedPipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, name: &str) -> Option<&MergedPipeline> {
        self.pipelines.iter().find(|p| p.definition.name == name)
    }

    pub fn environments(&self) -> impl Iterator<Item = &EnvironmentDefinition> {
        self.environments.values()
    }

    pub fn environment(&self, name: &str) -> Option<&EnvironmentDefinition> {
        self.environments.get(name)
    }

    /// Add one source's partial. Nothing is added if it conflicts.
    pub fn add(&mut self, partial: &PartialConfig, origin: ConfigOrigin) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for pipeline in &partial.pipelines {
            if !seen.insert(pipeline.name.as_str()) {
                return Err(Error::ConfigMerge {
                    origin: origin.to_string(),
                    message: format!("pipeline '{}' is defined more than once", pipeline.name),
                });
            }
            if let Some(existing) = self.pipeline(&pipeline.name) {
                return Err(Error::ConfigMerge {
                    origin: origin.to_string(),
                    message: format!(
                        "pipeline '{}' is already defined in {}",
                        pipeline.name, existing.origin
                    ),
                });
            }
        }
        self.pipelines.extend(partial.pipelines.iter().map(|definition| MergedPipeline {
            definition: definition.clone(),
            origin: origin.clone(),
        }));
        for environment in &partial.environments {
            self.environments
                .entry(environment.name.clone())
                .or_insert_with(|| EnvironmentDefinition {
                    name: environment.name.clone(),
                    ..Default::default()
                })
                .absorb(environment);
        }
        Ok(())
    }
}

/// Merge `base` and every `(id, revision, partial)` in order.
pub fn merge<'a, I>(base: &PartialConfig, repos: I) -> Result<MergedConfig>
where
    I: IntoIterator<Item = (&'a str, &'a Revision, &'a PartialConfig)>,
{
    let mut merged = MergedConfig::default();
    merged.add(base, ConfigOrigin::Local)?;
    for (id, revision, partial) in repos {
        merged.add(
            partial,
            ConfigOrigin::ConfigRepo {
                id: id.to_string(),
                revision: revision.clone(),
            },
        )?;
    }
    Ok(merged)
}
