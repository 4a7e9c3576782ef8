use std::path::Path;
use std::sync::Arc;

use super::{PackagePoller, PackageRevision, RevisionContext, ScmAdapter, ValidationResult, WorkingCopyIdentity};
use crate::console::TaggedConsole;
use crate::error::Result;
use crate::material::{Material, MaterialKind, PackageAttributes};
use crate::revision::{Modification, Revision};

/// Package repository material, polled through its plugin. Nothing is
/// materialized on disk; jobs fetch the package themselves.
pub struct PackageAdapter {
    material: Material,
    attributes: PackageAttributes,
    poller: Arc<dyn PackagePoller>,
}

impl PackageAdapter {
    pub fn new(material: Material, poller: Arc<dyn PackagePoller>) -> Self {
        let attributes = match material.kind() {
            MaterialKind::Package(attrs) => attrs.clone(),
            _ => PackageAttributes::default(),
        };
        Self {
            material,
            attributes,
            poller,
        }
    }
}

fn modification_for(revision: PackageRevision) -> Modification {
    let mut modification = Modification::new(
        Revision::Package(revision.revision),
        revision.user,
        revision.comment,
        revision.timestamp,
    );
    modification.additional_data = revision.data;
    modification
}

impl ScmAdapter for PackageAdapter {
    fn material(&self) -> &Material {
        &self.material
    }

    fn latest_modification(&self, _flyweight: &Path) -> Result<Vec<Modification>> {
        Ok(self
            .poller
            .latest_revision(&self.attributes.repository, &self.attributes.package)?
            .into_iter()
            .map(modification_for)
            .collect())
    }

    fn modifications_since(&self, _flyweight: &Path, revision: &Revision) -> Result<Vec<Modification>> {
        let previous = match revision {
            Revision::Package(p) => p.clone(),
            other => other.to_string(),
        };
        Ok(self
            .poller
            .latest_since(&self.attributes.repository, &self.attributes.package, &previous)?
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
        ValidationResult::from_result(
            self.poller
                .check_connection(&self.attributes.repository, &self.attributes.package),
            &self.material,
        )
    }

    fn identity(&self) -> WorkingCopyIdentity {
        WorkingCopyIdentity::new(format!("{}:{}", self.attributes.plugin_id, self.material.fingerprint()))
    }

    fn recorded_origin(&self, _dir: &Path) -> Result<Option<WorkingCopyIdentity>> {
        Ok(None)
    }

    fn supports_working_copy(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::DisabledCipher;
    use crate::error::Error;
    use crate::material::MaterialConfig;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct MockPoller {
        revision: Option<PackageRevision>,
        previous_seen: Mutex<Vec<String>>,
    }

    impl PackagePoller for MockPoller {
        fn latest_revision(
            &self,
            _repository: &BTreeMap<String, String>,
            package: &BTreeMap<String, String>,
        ) -> Result<Option<PackageRevision>> {
            assert_eq!(package.get("name").map(String::as_str), Some("libfoo"));
            Ok(self.revision.clone())
        }

        fn latest_since(
            &self,
            _repository: &BTreeMap<String, String>,
            _package: &BTreeMap<String, String>,
            previous: &str,
        ) -> Result<Option<PackageRevision>> {
            self.previous_seen.lock().unwrap().push(previous.to_string());
            Ok(None)
        }

        fn check_connection(
            &self,
            repository: &BTreeMap<String, String>,
            _package: &BTreeMap<String, String>,
        ) -> Result<()> {
            match repository.get("url") {
                Some(_) => Ok(()),
                None => Err(Error::Validation {
                    problems: vec!["repository url is required".to_string()],
                }),
            }
        }
    }

    fn material() -> Material {
        let mut package = BTreeMap::new();
        package.insert("name".to_string(), "libfoo".to_string());
        let config = MaterialConfig::new(MaterialKind::Package(PackageAttributes {
            plugin_id: "yum".to_string(),
            repository: BTreeMap::new(),
            package,
        }));
        Material::from_config(&config, &DisabledCipher).unwrap()
    }

    #[test]
    fn test_latest_carries_plugin_data() {
        let mut data = BTreeMap::new();
        data.insert("LOCATION".to_string(), "http://repo/libfoo-1.2.rpm".to_string());
        let poller = Arc::new(MockPoller {
            revision: Some(PackageRevision {
                revision: "libfoo-1.2".to_string(),
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
                user: "builder".to_string(),
                comment: "Built".to_string(),
                data,
            }),
            previous_seen: Mutex::new(Vec::new()),
        });
        let adapter = PackageAdapter::new(material(), poller);
        let latest = adapter.latest_modification(Path::new("unused")).unwrap();
        assert_eq!(latest[0].revision, Revision::Package("libfoo-1.2".to_string()));
        assert_eq!(latest[0].additional_data["LOCATION"], "http://repo/libfoo-1.2.rpm");
    }

    #[test]
    fn test_since_passes_previous_revision() {
        let poller = Arc::new(MockPoller {
            revision: None,
            previous_seen: Mutex::new(Vec::new()),
        });
        let adapter = PackageAdapter::new(material(), poller.clone());
        let since = adapter
            .modifications_since(Path::new("unused"), &Revision::Package("libfoo-1.1".to_string()))
            .unwrap();
        assert!(since.is_empty());
        assert_eq!(poller.previous_seen.lock().unwrap().as_slice(), ["libfoo-1.1".to_string()]);
        assert!(!adapter.check_connection().is_valid());
        assert!(!adapter.supports_working_copy());
    }
}
