use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::partial::{EnvironmentDefinition, PartialConfig, PipelineDefinition};
use crate::error::{Error, Result};
use crate::filesystem::MemoryFS;

const PIPELINE_PATTERNS: &[&str] = &["**/*.pipeline.yaml", "**/*.pipeline.yml"];
const ENVIRONMENT_PATTERNS: &[&str] = &["**/*.env.yaml", "**/*.env.yml"];

/// Turns a working copy's files into a [`PartialConfig`].
///
/// Implementations must be deterministic: the same files always produce an
/// identical partial.
pub trait ConfigParser: Send + Sync {
    /// Format id config-repos select this parser by.
    fn format(&self) -> &str;

    fn parse(&self, files: &MemoryFS) -> Result<PartialConfig>;
}

/// One pipeline per `*.pipeline.yaml`, one environment per `*.env.yaml`.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlConfigParser;

impl YamlConfigParser {
    fn parse_file<T: serde::de::DeserializeOwned>(path: &Path, files: &MemoryFS) -> Result<T> {
        let file = files.get_file(path).ok_or_else(|| Error::Filesystem {
            message: format!("File disappeared while parsing: {}", path.display()),
        })?;
        serde_yaml::from_str(file.as_str()?).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e),
            hint: Some("Each *.pipeline.yaml holds one pipeline and each *.env.yaml one environment".to_string()),
        })
    }
}

impl ConfigParser for YamlConfigParser {
    fn format(&self) -> &str {
        "yaml"
    }

    fn parse(&self, files: &MemoryFS) -> Result<PartialConfig> {
        let mut partial = PartialConfig::new();
        for path in files.list_files_glob(PIPELINE_PATTERNS)? {
            let pipeline: PipelineDefinition = Self::parse_file(&path, files)?;
            if pipeline.name.trim().is_empty() {
                return Err(Error::ConfigParse {
                    message: format!("{}: pipeline name is empty", path.display()),
                    hint: None,
                });
            }
            partial.pipelines.push(pipeline);
        }
        for path in files.list_files_glob(ENVIRONMENT_PATTERNS)? {
            let environment: EnvironmentDefinition = Self::parse_file(&path, files)?;
            partial.environments.push(environment);
        }
        Ok(partial)
    }
}

/// Parsers by format id.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn ConfigParser>>,
}

impl ParserRegistry {
    /// Registry holding the YAML parser.
    pub fn new() -> Self {
        Self::empty().with_parser(Arc::new(YamlConfigParser))
    }

    pub fn empty() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ConfigParser>) -> Self {
        self.parsers.insert(parser.format().to_string(), parser);
        self
    }

    pub fn get(&self, format: &str) -> Result<Arc<dyn ConfigParser>> {
        self.parsers
            .get(format)
            .cloned()
            .ok_or_else(|| Error::PluginNotFound {
                plugin_id: format!("config parser '{}'", format),
            })
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> MemoryFS {
        let mut fs = MemoryFS::new();
        fs.add_file_string(
            "pipelines/b.pipeline.yaml",
            "name: deploy\nmaterials:\n  - type: git\n    url: https://h/app.git\n    branch: main\n",
        );
        fs.add_file_string("a.pipeline.yml", "name: build\ngroup: core\nstages:\n  - name: test\n");
        fs.add_file_string("envs/prod.env.yaml", "name: prod\npipelines: [deploy]\nvariables:\n  REGION: eu\n");
        fs.add_file_string("README.md", "not config");
        fs
    }

    #[test]
    fn test_yaml_parser_reads_fragments_in_path_order() {
        let partial = YamlConfigParser.parse(&files()).unwrap();
        let names: Vec<&str> = partial.pipelines.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["build", "deploy"]);
        assert_eq!(partial.pipelines[0].group.as_deref(), Some("core"));
        assert_eq!(partial.pipelines[1].materials.len(), 1);
        assert_eq!(partial.environments[0].variables["REGION"], "eu");
    }

    #[test]
    fn test_yaml_parser_is_deterministic() {
        let a = YamlConfigParser.parse(&files()).unwrap();
        let b = YamlConfigParser.parse(&files()).unwrap();
        assert_eq!(a.etag(), b.etag());
    }

    #[test]
    fn test_invalid_fragment_is_config_parse_error() {
        let mut fs = files();
        fs.add_file_string("broken.pipeline.yaml", "name: [unclosed");
        match YamlConfigParser.parse(&fs) {
            Err(Error::ConfigParse { message, hint }) => {
                assert!(message.contains("broken.pipeline.yaml"));
                assert!(hint.is_some());
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ParserRegistry::new();
        assert_eq!(registry.get("yaml").unwrap().format(), "yaml");
        assert!(matches!(registry.get("json"), Err(Error::PluginNotFound { .. })));
    }
}
