//! # Source Adapters
//!
//! Every material kind is polled and materialized through one uniform
//! contract, [`ScmAdapter`]. Concrete adapters shell out to the usual command
//! line tool (`git`, `svn`, `hg`, `tf`, `p4`) or delegate to a collaborator
//! for the kinds that have no tool of their own (upstream pipelines, package
//! repositories, plugin-supplied SCMs).
//!
//! ## Design
//!
//! Adapters are resolved from a material's `type` tag by [`AdapterRegistry`]
//! rather than through a class hierarchy. The registry also accepts
//! [`AdapterFactory`] overrides per kind, which is how tests substitute
//! scripted adapters for the real tools.
//!
//! Polling methods receive a *flyweight* directory: a scratch location owned
//! by the poller where adapters that need local history (git, hg) keep a
//! metadata-only clone. Working-copy methods receive the directory that the
//! pipeline's job will see.
//!
//! Every adapter builds its commands with the material's
//! [`Redactor`](crate::redact::Redactor), so nothing they stream or raise can
//! contain a plaintext credential.

mod dependency;
mod git;
mod hg;
mod p4;
mod package;
mod pluggable;
mod svn;
mod tfs;
mod xml;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::console::TaggedConsole;
use crate::error::{Error, Result};
use crate::material::{Material, MaterialKind};
use crate::revision::{Modification, ModifiedFile, PipelineRevision, Revision};

pub use dependency::DependencyAdapter;
pub use git::GitAdapter;
pub use hg::HgAdapter;
pub use p4::P4Adapter;
pub use package::PackageAdapter;
pub use pluggable::PluggableScmAdapter;
pub use svn::SvnAdapter;
pub use tfs::TfsAdapter;

/// File written into working copies of kinds without native metadata.
pub const ORIGIN_MARKER: &str = ".material-origin";

/// Shallow clones never go below this depth.
pub const DEFAULT_SHALLOW_DEPTH: usize = 2;

/// The revisions a working copy must be able to reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionContext {
    /// Revision to leave the working copy at.
    pub latest: Revision,
    /// Oldest revision of the trigger snapshot; must be in local history.
    pub oldest: Option<Revision>,
    pub number_of_modifications: usize,
}

impl RevisionContext {
    pub fn new(latest: Revision) -> Self {
        Self {
            latest,
            oldest: None,
            number_of_modifications: 1,
        }
    }

    /// Context spanning a newest-first modification list.
    pub fn from_modifications(modifications: &[Modification]) -> Option<Self> {
        let latest = modifications.first()?;
        let oldest = modifications.last()?;
        Some(Self {
            latest: latest.revision.clone(),
            oldest: Some(oldest.revision.clone()),
            number_of_modifications: modifications.len(),
        })
    }

    pub fn oldest(&self) -> &Revision {
        self.oldest.as_ref().unwrap_or(&self.latest)
    }

    /// Depth a fresh shallow clone needs to contain every revision here.
    pub fn shallow_depth(&self) -> usize {
        (self.number_of_modifications + 1).max(DEFAULT_SHALLOW_DEPTH)
    }
}

/// Where a working copy came from, as far as reuse decisions care.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingCopyIdentity {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub shallow: bool,
}

impl WorkingCopyIdentity {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: None,
            shallow: false,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn shallow(mut self, shallow: bool) -> Self {
        self.shallow = shallow;
        self
    }
}

/// Outcome of a connection check. Messages are already redacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Collapse a fallible check, redacting the error text.
    pub fn from_result(result: Result<()>, material: &Material) -> Self {
        match result {
            Ok(()) => ValidationResult::Valid,
            Err(e) => ValidationResult::Invalid(material.redactor().redact(&e.to_string())),
        }
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationResult::Valid => f.write_str("valid"),
            ValidationResult::Invalid(message) => write!(f, "invalid: {}", message),
        }
    }
}

/// Uniform contract implemented once per material kind.
pub trait ScmAdapter: Send + Sync {
    fn material(&self) -> &Material;

    /// Exactly one entry: the newest modification.
    fn latest_modification(&self, flyweight: &Path) -> Result<Vec<Modification>>;

    /// Every modification strictly newer than `revision`, newest-first.
    fn modifications_since(&self, flyweight: &Path, revision: &Revision) -> Result<Vec<Modification>>;

    /// Destructive fresh checkout into an empty `dir`.
    fn checkout(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()>;

    /// Incremental update of a compatible working copy in `dir`.
    fn update(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()>;

    /// Never fails; problems come back as [`ValidationResult::Invalid`].
    fn check_connection(&self) -> ValidationResult;

    /// Identity the working copy should have for this material.
    fn identity(&self) -> WorkingCopyIdentity;

    /// Identity recorded by an existing working copy, `None` if `dir` holds none.
    fn recorded_origin(&self, dir: &Path) -> Result<Option<WorkingCopyIdentity>>;

    /// Whether this kind materializes files on disk at all.
    fn supports_working_copy(&self) -> bool {
        true
    }

    /// Nested sources discovered under this one, as pseudo-materials.
    fn externals(&self) -> Result<Vec<Material>> {
        Ok(Vec::new())
    }
}

/// Read the marker file left by [`write_origin_marker`].
pub(crate) fn read_origin_marker(dir: &Path) -> Result<Option<WorkingCopyIdentity>> {
    let marker = dir.join(ORIGIN_MARKER);
    if !marker.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&marker)?;
    match serde_json::from_str(&content) {
        Ok(identity) => Ok(Some(identity)),
        Err(e) => {
            log::warn!("Ignoring unreadable origin marker {}: {}", marker.display(), e);
            Ok(None)
        }
    }
}

pub(crate) fn write_origin_marker(dir: &Path, identity: &WorkingCopyIdentity) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let content = serde_json::to_string_pretty(identity)?;
    std::fs::write(dir.join(ORIGIN_MARKER), content)?;
    Ok(())
}

/// Passed run of an upstream pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRun {
    pub revision: PipelineRevision,
    pub completed_at: DateTime<Utc>,
    pub triggered_by: String,
}

/// Read access to upstream pipeline history.
pub trait PipelineHistory: Send + Sync {
    /// Most recent passed run of `pipeline`'s `stage`.
    fn latest_passed(&self, pipeline: &str, stage: &str) -> Result<Option<PipelineRun>>;

    /// Passed runs strictly after `after`, newest-first.
    fn passed_since(&self, pipeline: &str, stage: &str, after: &PipelineRevision) -> Result<Vec<PipelineRun>>;
}

/// A revision reported by a package repository plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRevision {
    pub revision: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub comment: String,
    pub data: BTreeMap<String, String>,
}

/// Package repository plugin.
pub trait PackagePoller: Send + Sync {
    fn latest_revision(
        &self,
        repository: &BTreeMap<String, String>,
        package: &BTreeMap<String, String>,
    ) -> Result<Option<PackageRevision>>;

    /// The newest revision after `previous`, if there is one.
    fn latest_since(
        &self,
        repository: &BTreeMap<String, String>,
        package: &BTreeMap<String, String>,
        previous: &str,
    ) -> Result<Option<PackageRevision>>;

    fn check_connection(
        &self,
        repository: &BTreeMap<String, String>,
        package: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// A revision reported by an SCM plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmRevision {
    pub revision: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub comment: String,
    pub files: Vec<ModifiedFile>,
    pub data: BTreeMap<String, String>,
}

/// Plugin-supplied SCM.
pub trait ScmPlugin: Send + Sync {
    fn latest_revision(&self, configuration: &BTreeMap<String, String>, flyweight: &Path) -> Result<ScmRevision>;

    /// Revisions after `previous`, newest-first.
    fn revisions_since(
        &self,
        configuration: &BTreeMap<String, String>,
        flyweight: &Path,
        previous: &str,
    ) -> Result<Vec<ScmRevision>>;

    /// Materialize `revision` into `dest`, returning a progress message.
    fn checkout(&self, configuration: &BTreeMap<String, String>, dest: &Path, revision: &str) -> Result<String>;

    fn check_connection(&self, configuration: &BTreeMap<String, String>) -> Result<()>;
}

/// Collaborators for the kinds that are not backed by a command line tool.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    pipelines: Option<Arc<dyn PipelineHistory>>,
    packages: HashMap<String, Arc<dyn PackagePoller>>,
    scms: HashMap<String, Arc<dyn ScmPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline_history(mut self, history: Arc<dyn PipelineHistory>) -> Self {
        self.pipelines = Some(history);
        self
    }

    pub fn with_package_poller(mut self, plugin_id: impl Into<String>, poller: Arc<dyn PackagePoller>) -> Self {
        self.packages.insert(plugin_id.into(), poller);
        self
    }

    pub fn with_scm_plugin(mut self, plugin_id: impl Into<String>, plugin: Arc<dyn ScmPlugin>) -> Self {
        self.scms.insert(plugin_id.into(), plugin);
        self
    }

    pub fn pipeline_history(&self) -> Result<Arc<dyn PipelineHistory>> {
        self.pipelines.clone().ok_or_else(|| Error::PluginNotFound {
            plugin_id: "pipeline-history".to_string(),
        })
    }

    pub fn package_poller(&self, plugin_id: &str) -> Result<Arc<dyn PackagePoller>> {
        self.packages
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })
    }

    pub fn scm_plugin(&self, plugin_id: &str) -> Result<Arc<dyn ScmPlugin>> {
        self.scms
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound {
                plugin_id: plugin_id.to_string(),
            })
    }
}

/// Builds an adapter for one material.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, material: &Material) -> Result<Box<dyn ScmAdapter>>;
}

/// Resolves a material's `type` tag to a concrete adapter.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    plugins: PluginRegistry,
    command_timeout: Option<Duration>,
    overrides: HashMap<String, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new(plugins: PluginRegistry) -> Self {
        Self {
            plugins,
            command_timeout: None,
            overrides: HashMap::new(),
        }
    }

    /// Kill any tool invocation running longer than `timeout`.
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Use `factory` for every material whose kind tag is `kind`.
    pub fn with_override(mut self, kind: impl Into<String>, factory: Arc<dyn AdapterFactory>) -> Self {
        self.overrides.insert(kind.into(), factory);
        self
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    pub fn adapter_for(&self, material: &Material) -> Result<Box<dyn ScmAdapter>> {
        if let Some(factory) = self.overrides.get(material.kind().tag()) {
            return factory.create(material);
        }
        let timeout = self.command_timeout;
        let material = material.clone();
        let adapter: Box<dyn ScmAdapter> = match material.kind() {
            MaterialKind::Git(_) => Box::new(GitAdapter::new(material, timeout)),
            MaterialKind::Svn(_) => Box::new(SvnAdapter::new(material, timeout)),
            MaterialKind::Hg(_) => Box::new(HgAdapter::new(material, timeout)),
            MaterialKind::Tfs(_) => Box::new(TfsAdapter::new(material, timeout)),
            MaterialKind::P4(_) => Box::new(P4Adapter::new(material, timeout)),
            MaterialKind::Dependency(_) => {
                Box::new(DependencyAdapter::new(material, self.plugins.pipeline_history()?))
            }
            MaterialKind::Package(attrs) => {
                let poller = self.plugins.package_poller(&attrs.plugin_id)?;
                Box::new(PackageAdapter::new(material, poller))
            }
            MaterialKind::PluggableScm(attrs) => {
                let plugin = self.plugins.scm_plugin(&attrs.plugin_id)?;
                Box::new(PluggableScmAdapter::new(material, plugin))
            }
        };
        Ok(adapter)
    }
}

/// Parse a tool timestamp, accepting RFC 3339, `git --date=iso` and the
/// `tf` form with a colon-less offset.
pub(crate) fn parse_timestamp(raw: &str, tool: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(parsed.with_timezone(&Utc));
    }
    DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z")
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|e| Error::ToolOutput {
            tool: tool.to_string(),
            message: format!("bad timestamp '{}': {}", raw, e),
        })
}
