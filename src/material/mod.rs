//! Material identity and configuration
//!
//! A [`MaterialConfig`] is the persisted description of a source: its kind,
//! connection attributes, destination folder, polling policy and ignore
//! filter. A [`Material`] is the runtime counterpart built from it, with the
//! stored password decrypted and classified as a literal or a deferred secret
//! parameter.
//!
//! ## Identity
//!
//! Every material has two fingerprints, both lowercase hex BLAKE3 digests of
//! a `key=value<|>key=value` criteria string:
//!
//! - [`MaterialConfig::fingerprint`] covers only identity-relevant attributes
//!   (URL, branch, username, view, ...). Passwords and cosmetic fields such as
//!   the display name never participate. Equal fingerprints mean the same
//!   physical source, so this is the key for polling, locking and caching.
//! - [`MaterialConfig::pipeline_unique_fingerprint`] additionally folds in the
//!   destination folder, telling apart two checkouts of one source inside a
//!   single pipeline.

mod filter;
mod validation;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::cipher::Cipher;
use crate::error::{Error, Result};
use crate::redact::{mask_url_credentials, strip_password, url_password, Redactor};
use crate::revision::Modification;
use crate::secret::{SecretParam, SecretValue};

pub use filter::{CompiledFilter, Filter};
pub use validation::{validate_auto_update_consistency, validate_pipeline_materials};

const SEPARATOR: &str = "<|>";
const DEFAULT_GIT_BRANCH: &str = "master";
const DEFAULT_HG_BRANCH: &str = "default";
const HG_BRANCH_MARKER: &str = "##";

fn default_true() -> bool {
    true
}

/// Username and password shared by the SCM kinds.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Plain text or a `{{SECRET:[store][key]}}` placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = |v: &Option<String>| v.as_ref().map(|_| crate::redact::MASK);
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &masked(&self.password))
            .field("encrypted_password", &masked(&self.encrypted_password))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitAttributes {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default)]
    pub shallow_clone: bool,
    #[serde(flatten)]
    pub credentials: Credentials,
}

impl GitAttributes {
    /// Configured branch, with blank meaning `master`.
    pub fn effective_branch(&self) -> &str {
        match self.branch.as_deref().map(str::trim) {
            Some(branch) if !branch.is_empty() => branch,
            _ => DEFAULT_GIT_BRANCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvnAttributes {
    pub url: String,
    #[serde(default)]
    pub check_externals: bool,
    #[serde(flatten)]
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HgAttributes {
    /// Repository URL, optionally with the branch appended as `url##branch`.
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(flatten)]
    pub credentials: Credentials,
}

impl HgAttributes {
    /// URL without any `##branch` suffix.
    pub fn base_url(&self) -> &str {
        match self.url.split_once(HG_BRANCH_MARKER) {
            Some((base, _)) => base,
            None => &self.url,
        }
    }

    /// Branch from the explicit field, else from the URL, else `default`.
    pub fn effective_branch(&self) -> &str {
        if let Some(branch) = self.branch.as_deref().map(str::trim) {
            if !branch.is_empty() {
                return branch;
            }
        }
        match self.url.split_once(HG_BRANCH_MARKER) {
            Some((_, branch)) if !branch.trim().is_empty() => branch.trim(),
            _ => DEFAULT_HG_BRANCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TfsAttributes {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub project_path: String,
    #[serde(flatten)]
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct P4Attributes {
    /// `host:port` of the Perforce server.
    pub port: String,
    pub view: String,
    #[serde(default)]
    pub use_tickets: bool,
    #[serde(flatten)]
    pub credentials: Credentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyAttributes {
    pub pipeline: String,
    pub stage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAttributes {
    pub plugin_id: String,
    #[serde(default)]
    pub repository: BTreeMap<String, String>,
    #[serde(default)]
    pub package: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluggableScmAttributes {
    pub plugin_id: String,
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
}

/// Source kind plus its connection attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MaterialKind {
    Git(GitAttributes),
    Svn(SvnAttributes),
    Hg(HgAttributes),
    Tfs(TfsAttributes),
    P4(P4Attributes),
    Dependency(DependencyAttributes),
    Package(PackageAttributes),
    PluggableScm(PluggableScmAttributes),
}

impl MaterialKind {
    /// Short lowercase tag used in console prefixes and the registry.
    pub fn tag(&self) -> &'static str {
        match self {
            MaterialKind::Git(_) => "git",
            MaterialKind::Svn(_) => "svn",
            MaterialKind::Hg(_) => "hg",
            MaterialKind::Tfs(_) => "tfs",
            MaterialKind::P4(_) => "p4",
            MaterialKind::Dependency(_) => "dependency",
            MaterialKind::Package(_) => "package",
            MaterialKind::PluggableScm(_) => "pluggable-scm",
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            MaterialKind::Git(_) => "GitMaterial",
            MaterialKind::Svn(_) => "SvnMaterial",
            MaterialKind::Hg(_) => "HgMaterial",
            MaterialKind::Tfs(_) => "TfsMaterial",
            MaterialKind::P4(_) => "P4Material",
            MaterialKind::Dependency(_) => "DependencyMaterial",
            MaterialKind::Package(_) => "PackageMaterial",
            MaterialKind::PluggableScm(_) => "PluggableSCMMaterial",
        }
    }

    /// Whether this kind materializes a working copy on disk.
    pub fn is_scm(&self) -> bool {
        !matches!(
            self,
            MaterialKind::Dependency(_) | MaterialKind::Package(_)
        )
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        match self {
            MaterialKind::Git(a) => Some(&a.credentials),
            MaterialKind::Svn(a) => Some(&a.credentials),
            MaterialKind::Hg(a) => Some(&a.credentials),
            MaterialKind::Tfs(a) => Some(&a.credentials),
            MaterialKind::P4(a) => Some(&a.credentials),
            _ => None,
        }
    }

    fn credentials_mut(&mut self) -> Option<&mut Credentials> {
        match self {
            MaterialKind::Git(a) => Some(&mut a.credentials),
            MaterialKind::Svn(a) => Some(&mut a.credentials),
            MaterialKind::Hg(a) => Some(&mut a.credentials),
            MaterialKind::Tfs(a) => Some(&mut a.credentials),
            MaterialKind::P4(a) => Some(&mut a.credentials),
            _ => None,
        }
    }

    /// The location string as configured, possibly carrying a password.
    pub fn location(&self) -> String {
        match self {
            MaterialKind::Git(a) => a.url.clone(),
            MaterialKind::Svn(a) => a.url.clone(),
            MaterialKind::Hg(a) => a.url.clone(),
            MaterialKind::Tfs(a) => a.url.clone(),
            MaterialKind::P4(a) => a.port.clone(),
            MaterialKind::Dependency(a) => a.pipeline.clone(),
            MaterialKind::Package(a) => a.plugin_id.clone(),
            MaterialKind::PluggableScm(a) => a.plugin_id.clone(),
        }
    }

    /// Ordered identity criteria, excluding every password.
    ///
    /// Git identity is URL plus branch. A username written into the URL is
    /// part of it, but the separate `username` field is not: two git
    /// materials that differ only there share one fingerprint.
    fn criteria(&self) -> Vec<(String, String)> {
        let mut criteria = Vec::new();
        let mut push = |key: &str, value: &str| criteria.push((key.to_string(), value.to_string()));
        match self {
            MaterialKind::Git(a) => {
                push("type", self.type_name());
                push("url", &strip_password(&a.url));
                push("branch", a.effective_branch());
            }
            MaterialKind::Svn(a) => {
                push("type", self.type_name());
                push("url", &strip_password(&a.url));
                push("username", a.credentials.username.as_deref().unwrap_or(""));
                push("checkExternals", &a.check_externals.to_string());
            }
            MaterialKind::Hg(a) => {
                push("type", self.type_name());
                let base = strip_password(a.base_url());
                let branch = a.effective_branch();
                if branch == DEFAULT_HG_BRANCH {
                    push("url", &base);
                } else {
                    push("url", &format!("{}{}{}", base, HG_BRANCH_MARKER, branch));
                }
            }
            MaterialKind::Tfs(a) => {
                push("type", self.type_name());
                push("url", &strip_password(&a.url));
                push("domain", a.domain.as_deref().unwrap_or(""));
                push("username", a.credentials.username.as_deref().unwrap_or(""));
                push("projectPath", &a.project_path);
            }
            MaterialKind::P4(a) => {
                push("type", self.type_name());
                push("url", &a.port);
                push("username", a.credentials.username.as_deref().unwrap_or(""));
                push("view", a.view.trim());
            }
            MaterialKind::Dependency(a) => {
                push("type", self.type_name());
                push("pipelineName", &a.pipeline);
                push("stageName", &a.stage);
            }
            MaterialKind::Package(a) => {
                push("plugin-id", &a.plugin_id);
                for (k, v) in &a.repository {
                    push(k, v);
                }
                for (k, v) in &a.package {
                    push(k, v);
                }
            }
            MaterialKind::PluggableScm(a) => {
                push("plugin-id", &a.plugin_id);
                for (k, v) in &a.configuration {
                    push(k, v);
                }
            }
        }
        criteria
    }
}

/// Persisted description of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialConfig {
    #[serde(flatten)]
    pub kind: MaterialKind,
    /// Display name; cosmetic, never part of identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sub-folder of the pipeline working area to check out into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default = "default_true")]
    pub auto_update: bool,
    #[serde(default, skip_serializing_if = "Filter::is_empty")]
    pub filter: Filter,
}

impl MaterialConfig {
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            kind,
            name: None,
            destination: None,
            auto_update: true,
            filter: Filter::default(),
        }
    }

    pub fn git(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self::new(MaterialKind::Git(GitAttributes {
            url: url.into(),
            branch: Some(branch.into()),
            shallow_clone: false,
            credentials: Credentials::default(),
        }))
    }

    pub fn svn(url: impl Into<String>) -> Self {
        Self::new(MaterialKind::Svn(SvnAttributes {
            url: url.into(),
            check_externals: false,
            credentials: Credentials::default(),
        }))
    }

    pub fn hg(url: impl Into<String>) -> Self {
        Self::new(MaterialKind::Hg(HgAttributes {
            url: url.into(),
            branch: None,
            credentials: Credentials::default(),
        }))
    }

    pub fn dependency(pipeline: impl Into<String>, stage: impl Into<String>) -> Self {
        Self::new(MaterialKind::Dependency(DependencyAttributes {
            pipeline: pipeline.into(),
            stage: stage.into(),
        }))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_auto_update(mut self, auto_update: bool) -> Self {
        self.auto_update = auto_update;
        self
    }

    /// Clone git working copies shallowly. Other kinds ignore it.
    pub fn with_shallow_clone(mut self, shallow_clone: bool) -> Self {
        if let MaterialKind::Git(attrs) = &mut self.kind {
            attrs.shallow_clone = shallow_clone;
        }
        self
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        if let Some(credentials) = self.kind.credentials_mut() {
            credentials.username = Some(username.into());
        }
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        if let Some(credentials) = self.kind.credentials_mut() {
            credentials.password = Some(password.into());
            credentials.encrypted_password = None;
        }
        self
    }

    /// Replace any plain password with its encrypted form.
    pub fn encrypt_password(&mut self, plain_text: &str, cipher: &dyn Cipher) -> Result<()> {
        let encrypted = cipher.encrypt(plain_text)?;
        match self.kind.credentials_mut() {
            Some(credentials) => {
                credentials.password = None;
                credentials.encrypted_password = Some(encrypted);
                Ok(())
            }
            None => Err(Error::Validation {
                problems: vec![format!(
                    "{} materials do not take a password",
                    self.kind.tag()
                )],
            }),
        }
    }

    /// Destination folder, with blank treated as none.
    pub fn destination(&self) -> Option<&str> {
        self.destination
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }

    pub fn criteria_string(&self) -> String {
        self.kind
            .criteria()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }

    pub fn fingerprint(&self) -> String {
        digest(&self.criteria_string())
    }

    pub fn pipeline_unique_fingerprint(&self) -> String {
        match self.destination() {
            Some(dest) => digest(&format!("{}{}dest={}", self.criteria_string(), SEPARATOR, dest)),
            None => self.fingerprint(),
        }
    }

    /// Display name: the explicit name, else a password-free description.
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.trim().is_empty()) {
            return name.to_string();
        }
        match &self.kind {
            MaterialKind::Git(a) => mask_url_credentials(&a.url),
            MaterialKind::Svn(a) => mask_url_credentials(&a.url),
            MaterialKind::Hg(a) => mask_url_credentials(&a.url),
            MaterialKind::Tfs(a) => {
                format!("{}:{}", mask_url_credentials(&a.url), a.project_path)
            }
            MaterialKind::P4(a) => format!("{}:{}", a.port, a.view.trim()),
            MaterialKind::Dependency(a) => format!("{} [{}]", a.pipeline, a.stage),
            MaterialKind::Package(a) => {
                let package = a.package.values().next().cloned().unwrap_or_default();
                format!("{}:{}", a.plugin_id, package)
            }
            MaterialKind::PluggableScm(a) => a.plugin_id.clone(),
        }
    }

    /// Field-level problems with this one material.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let name = self.display_name();
        let required = |value: &str, field: &str, problems: &mut Vec<String>| {
            if value.trim().is_empty() {
                problems.push(format!("{} material '{}': {} must not be blank", self.kind.tag(), name, field));
            }
        };
        match &self.kind {
            MaterialKind::Git(a) => required(&a.url, "url", &mut problems),
            MaterialKind::Svn(a) => required(&a.url, "url", &mut problems),
            MaterialKind::Hg(a) => required(&a.url, "url", &mut problems),
            MaterialKind::Tfs(a) => {
                required(&a.url, "url", &mut problems);
                required(&a.project_path, "project_path", &mut problems);
            }
            MaterialKind::P4(a) => {
                required(&a.port, "port", &mut problems);
                required(&a.view, "view", &mut problems);
            }
            MaterialKind::Dependency(a) => {
                required(&a.pipeline, "pipeline", &mut problems);
                required(&a.stage, "stage", &mut problems);
            }
            MaterialKind::Package(a) => required(&a.plugin_id, "plugin_id", &mut problems),
            MaterialKind::PluggableScm(a) => required(&a.plugin_id, "plugin_id", &mut problems),
        }
        if let Some(credentials) = self.kind.credentials() {
            if credentials.password.is_some() && credentials.encrypted_password.is_some() {
                problems.push(format!(
                    "material '{}': set either password or encrypted_password, not both",
                    name
                ));
            }
        }
        if let Err(e) = self.filter.compile() {
            problems.push(format!("material '{}': invalid filter pattern: {}", name, e));
        }
        problems
    }
}

fn digest(criteria: &str) -> String {
    blake3::hash(criteria.as_bytes()).to_hex().to_string()
}

/// Compare two origin URLs the way a recorded working copy is compared to
/// its material: a `file://` prefix and any password are disregarded,
/// usernames are kept.
pub fn same_origin_url(a: &str, b: &str) -> bool {
    normalize_origin(a) == normalize_origin(b)
}

fn normalize_origin(raw: &str) -> String {
    let stripped = strip_password(raw.trim());
    let without_scheme = stripped.strip_prefix("file://").unwrap_or(&stripped);
    without_scheme.trim_end_matches('/').to_string()
}

/// Runtime material: a config plus resolved credentials.
#[derive(Clone)]
pub struct Material {
    config: MaterialConfig,
    id: Option<i64>,
    password: Option<SecretValue>,
    fingerprint: String,
    pipeline_unique_fingerprint: String,
}

impl Material {
    /// Build from a config, decrypting any stored password.
    pub fn from_config(config: &MaterialConfig, cipher: &dyn Cipher) -> Result<Self> {
        let password = match config.kind.credentials() {
            Some(Credentials {
                encrypted_password: Some(encrypted),
                ..
            }) => Some(SecretValue::from_config(&cipher.decrypt(encrypted)?)),
            Some(Credentials {
                password: Some(raw),
                ..
            }) => Some(SecretValue::from_config(raw)),
            Some(_) => url_password(&config.kind.location()).map(SecretValue::Literal),
            None => None,
        };
        Ok(Self {
            fingerprint: config.fingerprint(),
            pipeline_unique_fingerprint: config.pipeline_unique_fingerprint(),
            config: config.clone(),
            id: None,
            password,
        })
    }

    pub fn config(&self) -> &MaterialConfig {
        &self.config
    }

    pub fn kind(&self) -> &MaterialKind {
        &self.config.kind
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn pipeline_unique_fingerprint(&self) -> &str {
        &self.pipeline_unique_fingerprint
    }

    pub fn display_name(&self) -> String {
        self.config.display_name()
    }

    pub fn destination(&self) -> Option<&str> {
        self.config.destination()
    }

    pub fn auto_update(&self) -> bool {
        self.config.auto_update
    }

    pub fn filter(&self) -> &Filter {
        &self.config.filter
    }

    pub fn username(&self) -> Option<&str> {
        self.config
            .kind
            .credentials()
            .and_then(|c| c.username.as_deref())
    }

    /// The password, failing fast if it is an unresolved secret parameter.
    pub fn password(&self) -> Result<Option<&str>> {
        match &self.password {
            Some(value) => value.expose().map(Some),
            None => Ok(None),
        }
    }

    pub fn secret_params(&self) -> Vec<&SecretParam> {
        match &self.password {
            Some(SecretValue::Deferred(param)) => vec![param],
            _ => Vec::new(),
        }
    }

    pub fn has_secret_params(&self) -> bool {
        !self.secret_params().is_empty()
    }

    /// Resolve a deferred password through an external store.
    pub fn resolve_secrets(&mut self, resolver: &dyn crate::secret::SecretResolver) -> Result<()> {
        if let Some(value) = &self.password {
            self.password = Some(value.resolve(resolver)?);
        }
        Ok(())
    }

    /// A redactor for every secret this material knows.
    pub fn redactor(&self) -> Redactor {
        let mut redactor = Redactor::new();
        if let Some(SecretValue::Literal(password)) = &self.password {
            redactor.add_secret(password.clone());
        }
        if let Some(password) = url_password(&self.config.kind.location()) {
            redactor.add_secret(password);
        }
        redactor
    }

    /// The configured URL with username and password folded in, for tools
    /// that only accept credentials inside the URL.
    pub fn url_with_credentials(&self, raw: &str) -> Result<String> {
        let password = self.password()?;
        let username = self.username();
        if password.is_none() && username.is_none() {
            return Ok(raw.to_string());
        }
        let mut parsed = match Url::parse(raw) {
            Ok(parsed) if parsed.has_host() => parsed,
            _ => return Ok(raw.to_string()),
        };
        if let Some(username) = username {
            if parsed.username().is_empty() && parsed.set_username(username).is_err() {
                return Ok(raw.to_string());
            }
        }
        if let Some(password) = password {
            if parsed.set_password(Some(password)).is_err() {
                return Ok(raw.to_string());
            }
        }
        Ok(parsed.to_string())
    }

    /// Pseudo-material for a Subversion external found under this material.
    pub fn for_external(&self, folder: &str, url: &str) -> Result<Material> {
        let MaterialKind::Svn(parent) = &self.config.kind else {
            return Err(Error::Validation {
                problems: vec![format!(
                    "externals are only supported for svn, not {}",
                    self.config.kind.tag()
                )],
            });
        };
        let destination = match self.destination() {
            Some(dest) => format!("{}/{}", dest.trim_end_matches('/'), folder),
            None => folder.to_string(),
        };
        let config = MaterialConfig::new(MaterialKind::Svn(SvnAttributes {
            url: url.to_string(),
            check_externals: false,
            credentials: Credentials {
                username: parent.credentials.username.clone(),
                password: None,
                encrypted_password: None,
            },
        }))
        .with_destination(destination)
        .with_auto_update(self.config.auto_update)
        .with_filter(self.config.filter.clone());
        Ok(Material {
            fingerprint: config.fingerprint(),
            pipeline_unique_fingerprint: config.pipeline_unique_fingerprint(),
            config,
            id: None,
            password: self.password.clone(),
        })
    }

    /// Environment variables a job would see for this material at `latest`.
    pub fn environment_variables(&self, latest: &Modification) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        let suffix = |base: &str, name: Option<&str>| match name {
            Some(n) => format!("{}_{}", base, env_name(n)),
            None => base.to_string(),
        };
        match &self.config.kind {
            MaterialKind::Dependency(a) => {
                let name = self.config.name.as_deref().unwrap_or(&a.pipeline);
                vars.insert(
                    format!("GO_DEPENDENCY_LOCATOR_{}", env_name(name)),
                    latest.revision.to_string(),
                );
                if let crate::revision::Revision::Pipeline(p) = &latest.revision {
                    vars.insert(
                        format!("GO_DEPENDENCY_LABEL_{}", env_name(name)),
                        p.pipeline_label.clone(),
                    );
                }
            }
            MaterialKind::Package(a) => {
                let prefix = format!(
                    "GO_PACKAGE_{}",
                    env_name(self.config.name.as_deref().unwrap_or(&a.plugin_id))
                );
                vars.insert(format!("{}_LABEL", prefix), latest.revision.to_string());
                for (k, v) in a.repository.iter().chain(a.package.iter()) {
                    vars.insert(format!("{}_{}", prefix, env_name(k)), v.clone());
                }
                for (k, v) in &latest.additional_data {
                    vars.insert(format!("{}_{}", prefix, env_name(k)), v.clone());
                }
            }
            MaterialKind::PluggableScm(a) => {
                let prefix = format!(
                    "GO_SCM_{}",
                    env_name(self.config.name.as_deref().unwrap_or(&a.plugin_id))
                );
                vars.insert(format!("{}_LABEL", prefix), latest.revision.to_string());
                for (k, v) in &latest.additional_data {
                    vars.insert(format!("{}_{}", prefix, env_name(k)), v.clone());
                }
            }
            _ => {
                let dest = self.destination();
                vars.insert(suffix("GO_REVISION", dest), latest.revision.to_string());
                if let MaterialKind::Git(a) = &self.config.kind {
                    vars.insert(suffix("GO_MATERIAL_BRANCH", dest), a.effective_branch().to_string());
                }
            }
        }
        vars
    }
}

/// Upper-case, with every non-alphanumeric replaced by `_`.
fn env_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("kind", &self.config.kind.tag())
            .field("name", &self.display_name())
            .field("fingerprint", &self.fingerprint)
            .field("destination", &self.destination())
            .field("id", &self.id)
            .finish()
    }
}
