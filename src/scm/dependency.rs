use std::path::Path;
use std::sync::Arc;

use super::{PipelineHistory, PipelineRun, RevisionContext, ScmAdapter, ValidationResult, WorkingCopyIdentity};
use crate::console::TaggedConsole;
use crate::error::{Error, Result};
use crate::material::{Material, MaterialKind};
use crate::revision::{Modification, Revision};

/// Upstream pipeline stage as a material. A new passed run is a new revision.
pub struct DependencyAdapter {
    material: Material,
    pipeline: String,
    stage: String,
    history: Arc<dyn PipelineHistory>,
}

impl DependencyAdapter {
    pub fn new(material: Material, history: Arc<dyn PipelineHistory>) -> Self {
        let (pipeline, stage) = match material.kind() {
            MaterialKind::Dependency(attrs) => (attrs.pipeline.clone(), attrs.stage.clone()),
            _ => (String::new(), String::new()),
        };
        Self {
            material,
            pipeline,
            stage,
            history,
        }
    }
}

fn modification_for(run: PipelineRun) -> Modification {
    let label = run.revision.pipeline_label.clone();
    Modification::new(Revision::Pipeline(run.revision), run.triggered_by, label, run.completed_at)
}

impl ScmAdapter for DependencyAdapter {
    fn material(&self) -> &Material {
        &self.material
    }

    fn latest_modification(&self, _flyweight: &Path) -> Result<Vec<Modification>> {
        Ok(self
            .history
            .latest_passed(&self.pipeline, &self.stage)?
            .into_iter()
            .map(modification_for)
            .collect())
    }

    fn modifications_since(&self, _flyweight: &Path, revision: &Revision) -> Result<Vec<Modification>> {
        let after = match revision {
            Revision::Pipeline(p) => p.clone(),
            other => crate::revision::PipelineRevision::parse(&other.to_string())?,
        };
        Ok(self
            .history
            .passed_since(&self.pipeline, &self.stage, &after)?
            .into_iter()
            .map(modification_for)
            .collect())
    }

    fn checkout(&self, _dir: &Path, _context: &RevisionContext, _console: &TaggedConsole) -> Result<()> {
        Ok(())
    }

    fn update(&self, _dir: &Path, _context: &RevisionContext, _console: &TaggedConsole) -> Result<()> {
        Ok(())
    }

    fn check_connection(&self) -> ValidationResult {
        let result = self
            .history
            .latest_passed(&self.pipeline, &self.stage)
            .and_then(|run| match run {
                Some(_) => Ok(()),
                None => Err(Error::Validation {
                    problems: vec![format!(
                        "Stage {} of pipeline {} has never passed",
                        self.stage, self.pipeline
                    )],
                }),
            });
        ValidationResult::from_result(result, &self.material)
    }

    fn identity(&self) -> WorkingCopyIdentity {
        WorkingCopyIdentity::new(format!("{}/{}", self.pipeline, self.stage))
    }

    fn recorded_origin(&self, _dir: &Path) -> Result<Option<WorkingCopyIdentity>> {
        Ok(None)
    }

    fn supports_working_copy(&self) -> bool {
        false
    }
}
