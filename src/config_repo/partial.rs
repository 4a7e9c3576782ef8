//! Parsed configuration fragments and per-repo parse outcomes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::material::MaterialConfig;
use crate::revision::Revision;

/// One pipeline definition. Stages are carried opaquely; only the scheduler
/// reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub materials: Vec<MaterialConfig>,
    #[serde(default)]
    pub stages: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDefinition {
    pub name: String,
    #[serde(default)]
    pub pipelines: BTreeSet<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl EnvironmentDefinition {
    /// Union pipelines and variables of `other` into this one. On a
    /// variable clash the existing value wins.
    pub fn absorb(&mut self, other: &EnvironmentDefinition) {
        self.pipelines.extend(other.pipelines.iter().cloned());
        for (key, value) in &other.variables {
            self.variables.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Pipelines and environments contributed by one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialConfig {
    #[serde(default)]
    pub pipelines: Vec<PipelineDefinition>,
    #[serde(default)]
    pub environments: Vec<EnvironmentDefinition>,
}

impl PartialConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, pipeline: PipelineDefinition) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentDefinition) -> Self {
        self.environments.push(environment);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty() && self.environments.is_empty()
    }

    /// BLAKE3 digest of the canonical JSON form.
    pub fn etag(&self) -> String {
        match serde_json::to_vec(self) {
            Ok(bytes) => blake3::hash(&bytes).to_hex().to_string(),
            // Only reachable with non-string map keys, which this type
            // cannot hold.
            Err(_) => String::new(),
        }
    }
}

/// Latest parse outcome for one config-repo material.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    /// Revision of the most recent parse attempt.
    pub revision: Revision,
    /// Last successfully parsed partial and the revision it came from.
    pub last_good: Option<(Revision, PartialConfig)>,
    /// Error of the most recent attempt, `None` if it succeeded.
    pub error: Option<String>,
}

impl ParseResult {
    pub fn success(revision: Revision, partial: PartialConfig) -> Self {
        Self {
            revision: revision.clone(),
            last_good: Some((revision, partial)),
            error: None,
        }
    }

    /// A failed attempt at `revision`, keeping any earlier good partial.
    pub fn failure(previous: Option<&ParseResult>, revision: Revision, error: impl Into<String>) -> Self {
        Self {
            revision,
            last_good: previous.and_then(|p| p.last_good.clone()),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn last_good_partial(&self) -> Option<&PartialConfig> {
        self.last_good.as_ref().map(|(_, partial)| partial)
    }

    pub fn last_good_revision(&self) -> Option<&Revision> {
        self.last_good.as_ref().map(|(revision, _)| revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(name: &str) -> PipelineDefinition {
        PipelineDefinition {
            name: name.to_string(),
            group: None,
            materials: vec![MaterialConfig::git("https://h/r.git", "main")],
            stages: vec![serde_json::json!({"name": "test", "jobs": ["unit"]})],
        }
    }

    #[test]
    fn test_etag_is_stable_and_content_sensitive() {
        let a = PartialConfig::new().with_pipeline(pipeline("build"));
        let b = PartialConfig::new().with_pipeline(pipeline("build"));
        let c = PartialConfig::new().with_pipeline(pipeline("deploy"));
        assert_eq!(a.etag(), b.etag());
        assert_ne!(a.etag(), c.etag());
        assert_eq!(a.etag().len(), 64);
    }

    #[test]
    fn test_failure_keeps_last_good() {
        let good = ParseResult::success(Revision::scm("r1"), PartialConfig::new().with_pipeline(pipeline("build")));
        let failed = ParseResult::failure(Some(&good), Revision::scm("r2"), "bad yaml");
        assert!(!failed.is_success());
        assert_eq!(failed.revision, Revision::scm("r2"));
        assert_eq!(failed.last_good_revision(), Some(&Revision::scm("r1")));
        assert_eq!(failed.last_good_partial(), good.last_good_partial());

        let first_failure = ParseResult::failure(None, Revision::scm("r1"), "bad yaml");
        assert!(first_failure.last_good.is_none());
    }

    #[test]
    fn test_environment_absorb_unions() {
        let mut env = EnvironmentDefinition {
            name: "prod".to_string(),
            pipelines: ["build".to_string()].into_iter().collect(),
            variables: [("REGION".to_string(), "eu".to_string())].into_iter().collect(),
        };
        env.absorb(&EnvironmentDefinition {
            name: "prod".to_string(),
            pipelines: ["deploy".to_string()].into_iter().collect(),
            variables: [
                ("REGION".to_string(), "us".to_string()),
                ("TIER".to_string(), "web".to_string()),
            ]
            .into_iter()
            .collect(),
        });
        assert_eq!(env.pipelines.len(), 2);
        assert_eq!(env.variables["REGION"], "eu");
        assert_eq!(env.variables["TIER"], "web");
    }
}
