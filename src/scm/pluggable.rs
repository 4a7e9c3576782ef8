use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::{
    read_origin_marker, write_origin_marker, RevisionContext, ScmAdapter, ScmPlugin, ScmRevision, ValidationResult,
    WorkingCopyIdentity,
};
use crate::console::TaggedConsole;
use crate::error::Result;
use crate::material::{Material, MaterialKind, PluggableScmAttributes};
use crate::revision::{Modification, Revision};

/// SCM implemented by a plugin. The plugin owns both polling and checkout;
/// this adapter records the origin marker so working copies can be reused.
pub struct PluggableScmAdapter {
    material: Material,
    attributes: PluggableScmAttributes,
    plugin: Arc<dyn ScmPlugin>,
}

impl PluggableScmAdapter {
    pub fn new(material: Material, plugin: Arc<dyn ScmPlugin>) -> Self {
        let attributes = match material.kind() {
            MaterialKind::PluggableScm(attrs) => attrs.clone(),
            _ => PluggableScmAttributes::default(),
        };
        Self {
            material,
            attributes,
            plugin,
        }
    }

    fn materialize(&self, dir: &Path, revision: &Revision, console: &TaggedConsole) -> Result<()> {
        fs::create_dir_all(dir)?;
        let message = self
            .plugin
            .checkout(&self.attributes.configuration, dir, &revision.to_string())?;
        if !message.is_empty() {
            console.info(&message);
        }
        write_origin_marker(dir, &self.identity())
    }
}

fn modification_for(revision: ScmRevision) -> Modification {
    let mut modification = Modification::new(
        Revision::scm(revision.revision),
        revision.user,
        revision.comment,
        revision.timestamp,
    );
    modification.files = revision.files;
    modification.additional_data = revision.data;
    modification
}

impl ScmAdapter for PluggableScmAdapter {
    fn material(&self) -> &Material {
        &self.material
    }

    fn latest_modification(&self, flyweight: &Path) -> Result<Vec<Modification>> {
        fs::create_dir_all(flyweight)?;
        let latest = self.plugin.latest_revision(&self.attributes.configuration, flyweight)?;
        Ok(vec![modification_for(latest)])
    }

    fn modifications_since(&self, flyweight: &Path, revision: &Revision) -> Result<Vec<Modification>> {
        fs::create_dir_all(flyweight)?;
        Ok(self
            .plugin
            .revisions_since(&self.attributes.configuration, flyweight, &revision.to_string())?
            .into_iter()
            .map(modification_for)
            .collect())
    }

    fn checkout(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        console.info(&format!(
            "Checking out {} with plugin {}",
            self.material.display_name(),
            self.attributes.plugin_id
        ));
        self.materialize(dir, &context.latest, console)
    }

    fn update(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        self.materialize(dir, &context.latest, console)
    }

    fn check_connection(&self) -> ValidationResult {
        ValidationResult::from_result(
            self.plugin.check_connection(&self.attributes.configuration),
            &self.material,
        )
    }

    fn identity(&self) -> WorkingCopyIdentity {
        WorkingCopyIdentity::new(format!("{}:{}", self.attributes.plugin_id, self.material.fingerprint()))
    }

    fn recorded_origin(&self, dir: &Path) -> Result<Option<WorkingCopyIdentity>> {
        read_origin_marker(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::DisabledCipher;
    use crate::console::InMemoryConsole;
    use crate::material::MaterialConfig;
    use crate::redact::Redactor;
    use crate::revision::{ModifiedAction, ModifiedFile};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockPlugin {
        checkouts: Mutex<Vec<(String, String)>>,
    }

    impl ScmPlugin for MockPlugin {
        fn latest_revision(&self, _configuration: &BTreeMap<String, String>, _flyweight: &Path) -> Result<ScmRevision> {
            Ok(ScmRevision {
                revision: "r9".to_string(),
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                user: "bob".to_string(),
                comment: "ship".to_string(),
                files: vec![ModifiedFile::new("a.txt", ModifiedAction::Modified)],
                data: BTreeMap::new(),
            })
        }

        fn revisions_since(
            &self,
            _configuration: &BTreeMap<String, String>,
            _flyweight: &Path,
            _previous: &str,
        ) -> Result<Vec<ScmRevision>> {
            Ok(Vec::new())
        }

        fn checkout(&self, _configuration: &BTreeMap<String, String>, dest: &Path, revision: &str) -> Result<String> {
            self.checkouts
                .lock()
                .unwrap()
                .push((dest.display().to_string(), revision.to_string()));
            Ok(format!("Checked out {}", revision))
        }

        fn check_connection(&self, _configuration: &BTreeMap<String, String>) -> Result<()> {
            Ok(())
        }
    }

    fn material() -> Material {
        let config = MaterialConfig::new(MaterialKind::PluggableScm(PluggableScmAttributes {
            plugin_id: "github.pr".to_string(),
            configuration: BTreeMap::new(),
        }));
        Material::from_config(&config, &DisabledCipher).unwrap()
    }

    #[test]
    fn test_checkout_delegates_and_records_origin() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("wc");
        let plugin = Arc::new(MockPlugin::default());
        let adapter = PluggableScmAdapter::new(material(), plugin.clone());
        let sink = InMemoryConsole::new();
        let console = TaggedConsole::new(&sink, "[scm]", Redactor::new());

        adapter
            .checkout(&dir, &RevisionContext::new(Revision::scm("r9")), &console)
            .unwrap();

        assert_eq!(plugin.checkouts.lock().unwrap()[0].1, "r9");
        assert!(sink.contains("[scm] Checked out r9"));
        assert_eq!(adapter.recorded_origin(&dir).unwrap(), Some(adapter.identity()));
    }

    #[test]
    fn test_latest_keeps_plugin_files() {
        let temp = tempfile::TempDir::new().unwrap();
        let adapter = PluggableScmAdapter::new(material(), Arc::new(MockPlugin::default()));
        let latest = adapter.latest_modification(&temp.path().join("fly")).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].files[0].path, "a.txt");
        assert!(adapter.check_connection().is_valid());
    }
}
