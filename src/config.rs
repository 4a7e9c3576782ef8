//! # Server Configuration
//!
//! The YAML file the binary is started with. It declares where working
//! copies live, how often materials are polled, the pipelines with their
//! materials, and the config-repos whose content extends the pipeline list.
//!
//! ```yaml
//! requires: ">=0.1"
//! working_dir: /var/lib/material-tracker
//! poll_interval_secs: 60
//! pipelines:
//!   - name: build
//!     materials:
//!       - type: git
//!         url: https://host/repo.git
//!         branch: main
//!         destination: src
//!         filter: { ignore: ["docs/**"] }
//! config_repos:
//!   - id: infra
//!     material: { type: git, url: https://host/infra.git, branch: main }
//! ```
//!
//! Loading validates the whole file and reports every problem at once as
//! [`Error::Validation`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use crate::cipher::Cipher;
use crate::config_repo::{ConfigRepoConfig, PartialConfig, PipelineDefinition};
use crate::error::{Error, Result};
use crate::material::{validate_auto_update_consistency, validate_pipeline_materials, Material, MaterialConfig};

/// Directory name under the platform data dir used when nothing else is set.
pub const DEFAULT_DIR_NAME: &str = "material-tracker";

fn default_poll_interval() -> u64 {
    60
}

fn default_hung_threshold() -> u64 {
    900
}

/// A locally declared pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub materials: Vec<MaterialConfig>,
}

impl PipelineConfig {
    /// Resolve every material, decrypting stored passwords.
    pub fn materials(&self, cipher: &dyn Cipher) -> Result<Vec<Material>> {
        self.materials
            .iter()
            .map(|config| Material::from_config(config, cipher))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Version requirement on this binary, e.g. `">=0.1"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_hung_threshold")]
    pub hung_threshold_secs: u64,
    /// Update worker pool size; defaults to the available parallelism.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,
    /// Kill SCM tool runs after this many seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
    #[serde(default)]
    pub config_repos: Vec<ConfigRepoConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            requires: None,
            working_dir: None,
            poll_interval_secs: default_poll_interval(),
            hung_threshold_secs: default_hung_threshold(),
            worker_threads: None,
            command_timeout_secs: None,
            pipelines: Vec::new(),
            config_repos: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn hung_threshold(&self) -> Duration {
        Duration::from_secs(self.hung_threshold_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4))
            .max(1)
    }

    /// Working directory: `override_dir`, then the file's `working_dir`,
    /// then `<data dir>/material-tracker`.
    pub fn working_dir(&self, override_dir: Option<&Path>) -> Result<PathBuf> {
        if let Some(dir) = override_dir.or(self.working_dir.as_deref()) {
            return Ok(dir.to_path_buf());
        }
        default_working_dir()
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    /// Every distinct material across pipelines and config-repos, first
    /// declaration wins.
    pub fn unique_materials(&self, cipher: &dyn Cipher) -> Result<Vec<Material>> {
        let mut seen = HashSet::new();
        let mut materials = Vec::new();
        let configs = self
            .pipelines
            .iter()
            .flat_map(|p| p.materials.iter())
            .chain(self.config_repos.iter().map(|r| &r.material));
        for config in configs {
            if seen.insert(config.fingerprint()) {
                materials.push(Material::from_config(config, cipher)?);
            }
        }
        Ok(materials)
    }

    /// Local pipelines as the base partial that config-repos merge onto.
    pub fn base_partial(&self) -> PartialConfig {
        PartialConfig {
            pipelines: self
                .pipelines
                .iter()
                .map(|p| PipelineDefinition {
                    name: p.name.clone(),
                    group: p.group.clone(),
                    materials: p.materials.clone(),
                    stages: Vec::new(),
                })
                .collect(),
            environments: Vec::new(),
        }
    }

    /// Every problem in the file.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if let Some(requires) = &self.requires {
            let requirement = VersionReq::parse(requires)?;
            let current = Version::parse(env!("CARGO_PKG_VERSION"))?;
            if !requirement.matches(&current) {
                problems.push(format!(
                    "configuration requires material-tracker {} but this is {}",
                    requires, current
                ));
            }
        }
        if self.poll_interval_secs == 0 {
            problems.push("poll_interval_secs must be greater than zero".to_string());
        }
        if self.worker_threads == Some(0) {
            problems.push("worker_threads must be greater than zero".to_string());
        }

        let mut names: BTreeMap<&str, usize> = BTreeMap::new();
        for pipeline in &self.pipelines {
            if pipeline.name.trim().is_empty() {
                problems.push("a pipeline has an empty name".to_string());
            }
            *names.entry(pipeline.name.as_str()).or_default() += 1;
            problems.extend(validate_pipeline_materials(&pipeline.name, &pipeline.materials));
        }
        problems.extend(
            names
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(name, _)| format!("pipeline '{}' is declared more than once", name)),
        );

        let mut ids = HashSet::new();
        for repo in &self.config_repos {
            if repo.id.trim().is_empty() {
                problems.push("a config-repo has an empty id".to_string());
            } else if !ids.insert(repo.id.as_str()) {
                problems.push(format!("config-repo '{}' is declared more than once", repo.id));
            }
            if !repo.material.kind.is_scm() {
                problems.push(format!(
                    "config-repo '{}' must use an SCM material, not {}",
                    repo.id,
                    repo.material.kind.tag()
                ));
            }
            problems.extend(repo.material.validate());
        }

        problems.extend(validate_auto_update_consistency(
            self.pipelines
                .iter()
                .flat_map(|p| p.materials.iter())
                .chain(self.config_repos.iter().map(|r| &r.material)),
        ));

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation { problems })
        }
    }
}

/// `<platform data dir>/material-tracker`.
pub fn default_working_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(DEFAULT_DIR_NAME))
        .ok_or_else(|| Error::Filesystem {
            message: "No data directory on this platform; set working_dir or MATERIAL_TRACKER_HOME".to_string(),
        })
}

/// Parse and validate a configuration.
pub fn parse(yaml_content: &str) -> Result<ServerConfig> {
    let config: ServerConfig = serde_yaml::from_str(yaml_content).map_err(|e| Error::ConfigParse {
        message: e.to_string(),
        hint: Some("See the configuration example in the README".to_string()),
    })?;
    config.validate()?;
    Ok(config)
}

pub fn from_file<P: AsRef<Path>>(path: P) -> Result<ServerConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigParse {
        message: format!("Cannot read {}: {}", path.display(), e),
        hint: None,
    })?;
    parse(&content).map_err(|e| match e {
        Error::ConfigParse { message, hint } => Error::ConfigParse {
            message: format!("{}: {}", path.display(), message),
            hint,
        },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::DisabledCipher;

    const SAMPLE: &str = r#"
working_dir: /srv/mt
poll_interval_secs: 30
pipelines:
  - name: build
    materials:
      - type: git
        url: https://bob:hunter2@h/app.git
        branch: main
        destination: app
        filter: { ignore: ["docs/**"] }
      - type: svn
        url: https://h/svn/lib
        destination: lib
        auto_update: false
  - name: deploy
    materials:
      - type: dependency
        pipeline: build
        stage: test
config_repos:
  - id: infra
    material: { type: git, url: https://h/infra.git, branch: main }
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse(SAMPLE).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.hung_threshold_secs, 900);
        assert_eq!(config.pipelines.len(), 2);
        assert_eq!(config.pipeline("build").unwrap().materials[0].filter.ignore, vec!["docs/**"]);
        assert!(!config.pipeline("build").unwrap().materials[1].auto_update);
        assert_eq!(config.config_repos[0].format, "yaml");
        assert_eq!(config.working_dir(None).unwrap(), PathBuf::from("/srv/mt"));
        assert_eq!(
            config.working_dir(Some(Path::new("/tmp/x"))).unwrap(),
            PathBuf::from("/tmp/x")
        );
    }

    #[test]
    fn test_defaults() {
        let config = parse("pipelines: []").unwrap();
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.hung_threshold(), Duration::from_secs(900));
        assert!(config.worker_threads() >= 1);
        assert!(config.command_timeout().is_none());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        match parse("pipelines: [unclosed") {
            Err(Error::ConfigParse { hint, .. }) => assert!(hint.is_some()),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_collects_all_problems() {
        let yaml = r#"
poll_interval_secs: 0
pipelines:
  - name: build
    materials:
      - type: git
        url: https://h/a.git
        branch: main
      - type: git
        url: https://h/b.git
        branch: main
  - name: build
    materials:
      - type: git
        url: https://h/a.git
        branch: main
        auto_update: false
"#;
        match parse(yaml) {
            Err(Error::Validation { problems }) => {
                assert!(problems.iter().any(|p| p.contains("poll_interval_secs")));
                assert!(problems.iter().any(|p| p.contains("declared more than once")));
                assert!(problems.iter().any(|p| p.contains("destination")));
                assert!(problems.iter().any(|p| p.contains("auto_update")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_version_requirement() {
        assert!(parse("requires: \">=0.0.1\"").is_ok());
        assert!(matches!(
            parse("requires: \">=999.0\""),
            Err(Error::Validation { .. })
        ));
        assert!(matches!(parse("requires: \"not a version\""), Err(Error::Semver(_))));
    }

    #[test]
    fn test_unique_materials_and_base_partial() {
        let mut config = parse(SAMPLE).unwrap();
        config.pipelines.push(PipelineConfig {
            name: "again".to_string(),
            group: None,
            materials: vec![MaterialConfig::git("https://h/infra.git", "main")],
        });
        let materials = config.unique_materials(&DisabledCipher).unwrap();
        assert_eq!(materials.len(), 4);

        let base = config.base_partial();
        assert_eq!(base.pipelines.len(), 3);
        assert_eq!(base.pipelines[0].name, "build");
    }

    #[test]
    fn test_from_file_names_the_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("server.yaml");
        std::fs::write(&path, "pipelines: {").unwrap();
        match from_file(&path) {
            Err(Error::ConfigParse { message, .. }) => assert!(message.contains("server.yaml")),
            other => panic!("expected parse error, got {other:?}"),
        }
        assert!(from_file(temp.path().join("missing.yaml")).is_err());
    }
}
