//! # Config-Repo Parse-Cache-Merge
//!
//! A config-repo is a material whose checked-out content holds pipeline
//! configuration fragments. After every successful update of that material
//! the working copy is parsed into a [`PartialConfig`] and the outcome is
//! cached per fingerprint as a [`ParseResult`].
//!
//! The live configuration only ever merges the last *successful* partial of
//! each repo. A parse failure, or a partial that conflicts with the rest of
//! the configuration, leaves the previous contribution in place and surfaces
//! the error through [`ConfigRepoService::parse_result`].
//!
//! Checkout and parse of one repo are serialized: its working copy has a
//! single writer at a time, and an update event older than one already
//! handled is dropped instead of overwriting the newer result.

mod cache;
mod merge;
mod parser;
mod partial;

pub use cache::ParseResultCache;
pub use merge::{merge, ConfigOrigin, MergedConfig, MergedPipeline};
pub use parser::{ConfigParser, ParserRegistry, YamlConfigParser};
pub use partial::{EnvironmentDefinition, ParseResult, PartialConfig, PipelineDefinition};

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::cipher::Cipher;
use crate::console::{ConsoleSink, LogConsole};
use crate::error::{Error, Result};
use crate::filesystem::MemoryFS;
use crate::material::{Material, MaterialConfig};
use crate::orchestrator::{UpdateCompleted, UpdateListener};
use crate::revision::Revision;
use crate::scm::RevisionContext;
use crate::workdir::UpdateEngine;

fn default_format() -> String {
    "yaml".to_string()
}

/// A config-repo as declared in the server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRepoConfig {
    pub id: String,
    /// Parser format id.
    #[serde(default = "default_format")]
    pub format: String,
    pub material: MaterialConfig,
}

impl ConfigRepoConfig {
    pub fn new(id: impl Into<String>, material: MaterialConfig) -> Self {
        Self {
            id: id.into(),
            format: default_format(),
            material,
        }
    }
}

struct BoundRepo {
    config: ConfigRepoConfig,
    material: Material,
    /// Held while the working copy is written and parsed. Holds the
    /// sequence of the newest update event handled.
    working_copy: Mutex<u64>,
}

pub struct ConfigRepoService {
    repos: Vec<BoundRepo>,
    base: RwLock<PartialConfig>,
    parsers: ParserRegistry,
    cache: ParseResultCache,
    engine: UpdateEngine,
    checkout_root: PathBuf,
    console: Arc<dyn ConsoleSink>,
}

impl ConfigRepoService {
    pub fn new(
        repos: &[ConfigRepoConfig],
        cipher: &dyn Cipher,
        engine: UpdateEngine,
        checkout_root: impl Into<PathBuf>,
    ) -> Result<Self> {
        let repos = repos
            .iter()
            .map(|config| {
                Ok(BoundRepo {
                    material: Material::from_config(&config.material, cipher)?,
                    config: config.clone(),
                    working_copy: Mutex::new(0),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            repos,
            base: RwLock::new(PartialConfig::new()),
            parsers: ParserRegistry::new(),
            cache: ParseResultCache::new(),
            engine,
            checkout_root: checkout_root.into(),
            console: Arc::new(LogConsole),
        })
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn with_console(mut self, console: Arc<dyn ConsoleSink>) -> Self {
        self.console = console;
        self
    }

    /// Replace the locally defined part of the configuration.
    pub fn set_base(&self, base: PartialConfig) -> Result<()> {
        let mut guard = self.base.write().map_err(|_| Error::poisoned("base configuration"))?;
        *guard = base;
        Ok(())
    }

    pub fn cache(&self) -> &ParseResultCache {
        &self.cache
    }

    /// Materials of every config-repo, in declaration order.
    pub fn materials(&self) -> Vec<Material> {
        self.repos.iter().map(|r| r.material.clone()).collect()
    }

    pub fn checkout_dir(&self, material: &Material) -> PathBuf {
        self.checkout_root.join(material.fingerprint())
    }

    fn repo_by_fingerprint(&self, fingerprint: &str) -> Option<&BoundRepo> {
        self.repos.iter().find(|r| r.material.fingerprint() == fingerprint)
    }

    fn repo_by_id(&self, id: &str) -> Option<&BoundRepo> {
        self.repos.iter().find(|r| r.config.id == id)
    }

    /// Latest parse outcome of the repo named `id`.
    pub fn parse_result(&self, id: &str) -> Result<Option<ParseResult>> {
        match self.repo_by_id(id) {
            Some(repo) => self.cache.get(repo.material.fingerprint()),
            None => Ok(None),
        }
    }

    /// Parse whatever is checked out in `dir` with the repo's parser.
    pub fn parse_working_copy(&self, config: &ConfigRepoConfig, dir: &Path) -> Result<PartialConfig> {
        let parser = self.parsers.get(&config.format)?;
        let files = MemoryFS::load_dir(dir)?;
        debug!("Parsing {} files of config-repo {}", files.len(), config.id);
        parser.parse(&files)
    }

    /// Check out `revision` of a config-repo material and parse it.
    ///
    /// Returns `None` for materials that are not config-repos. A revision
    /// that already parsed successfully is not parsed again.
    pub fn on_material_updated(&self, material: &Material, revision: &Revision) -> Result<Option<ParseResult>> {
        self.handle_update(material, revision, None)
    }

    fn handle_update(
        &self,
        material: &Material,
        revision: &Revision,
        sequence: Option<u64>,
    ) -> Result<Option<ParseResult>> {
        let repo = match self.repo_by_fingerprint(material.fingerprint()) {
            Some(repo) => repo,
            None => return Ok(None),
        };
        let fingerprint = repo.material.fingerprint();
        let mut newest = repo
            .working_copy
            .lock()
            .map_err(|_| Error::poisoned("config-repo working copy"))?;
        if let Some(sequence) = sequence {
            if sequence <= *newest {
                debug!(
                    "Dropping stale update of config-repo {} at {}",
                    repo.config.id,
                    revision.short()
                );
                return self.cache.get(fingerprint);
            }
            *newest = sequence;
        }
        if self.cache.has_successful_parse(fingerprint, revision)? {
            debug!("Config-repo {} already parsed at {}", repo.config.id, revision.short());
            return self.cache.get(fingerprint);
        }

        match self.checkout_and_parse(repo, revision) {
            Ok(partial) => {
                info!(
                    "Parsed config-repo {} at {}: {} pipeline(s), {} environment(s)",
                    repo.config.id,
                    revision.short(),
                    partial.pipelines.len(),
                    partial.environments.len()
                );
                self.cache.record_success(fingerprint, revision.clone(), partial).map(Some)
            }
            Err(e) => {
                let message = repo.material.redactor().redact(&e.to_string());
                warn!(
                    "Config-repo {} at {} was rejected, keeping its last good configuration: {}",
                    repo.config.id,
                    revision.short(),
                    message
                );
                self.cache.record_failure(fingerprint, revision.clone(), &message).map(Some)
            }
        }
    }

    fn checkout_and_parse(&self, repo: &BoundRepo, revision: &Revision) -> Result<PartialConfig> {
        let dir = self.checkout_dir(&repo.material);
        self.engine.update_to(
            &repo.material,
            &dir,
            &RevisionContext::new(revision.clone()),
            self.console.as_ref(),
        )?;
        let partial = self.parse_working_copy(&repo.config, &self.engine.working_dir(&repo.material, &dir))?;
        self.check_merge(repo, revision, &partial)?;
        Ok(partial)
    }

    /// Merge `candidate` in place of the repo's current contribution.
    fn check_merge(&self, repo: &BoundRepo, revision: &Revision, candidate: &PartialConfig) -> Result<()> {
        let base = self.base.read().map_err(|_| Error::poisoned("base configuration"))?;
        let mut merged = MergedConfig::default();
        merged.add(&base, ConfigOrigin::Local)?;
        for other in &self.repos {
            if other.config.id == repo.config.id {
                merged.add(
                    candidate,
                    ConfigOrigin::ConfigRepo {
                        id: repo.config.id.clone(),
                        revision: revision.clone(),
                    },
                )?;
            } else if let Some((rev, partial)) = self.cache.last_good(other.material.fingerprint())? {
                // Another repo's existing contribution that clashes is not
                // this candidate's fault.
                let origin = ConfigOrigin::ConfigRepo {
                    id: other.config.id.clone(),
                    revision: rev,
                };
                if let Err(e) = merged.add(&partial, origin) {
                    debug!("Config-repo {} already conflicts on its own: {}", other.config.id, e);
                }
            }
        }
        Ok(())
    }

    /// The live configuration: local config plus every repo's last good
    /// partial, in declaration order.
    pub fn merged_config(&self) -> Result<MergedConfig> {
        let base = self.base.read().map_err(|_| Error::poisoned("base configuration"))?;
        let mut merged = MergedConfig::default();
        merged.add(&base, ConfigOrigin::Local)?;
        for repo in &self.repos {
            let (revision, partial) = match self.cache.last_good(repo.material.fingerprint())? {
                Some(good) => good,
                None => continue,
            };
            let origin = ConfigOrigin::ConfigRepo {
                id: repo.config.id.clone(),
                revision,
            };
            if let Err(e) = merged.add(&partial, origin) {
                warn!("Leaving config-repo {} out of the configuration: {}", repo.config.id, e);
            }
        }
        Ok(merged)
    }
}

impl UpdateListener for ConfigRepoService {
    fn on_update_completed(&self, event: &UpdateCompleted) {
        let latest = match &event.result {
            Ok(report) => match &report.latest {
                Some(latest) => latest,
                None => return,
            },
            Err(_) => return,
        };
        if let Err(e) = self.handle_update(&event.material, &latest.revision, Some(event.sequence)) {
            warn!(
                "Could not process config-repo update for {}: {}",
                event.material.display_name(),
                e
            );
        }
    }
}
