//! Storage seam for materials and their modification history.
//!
//! The engine only needs a handful of load/save calls; [`MaterialRepository`]
//! names them and [`InMemoryMaterialRepository`] backs tests and the CLI.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::material::{Material, MaterialConfig};
use crate::revision::{sort_newest_first, Modification};

pub trait MaterialRepository: Send + Sync {
    fn load_material_config(&self, id: i64) -> Result<Option<MaterialConfig>>;

    /// Persist `material` if its fingerprint is new and return its id.
    /// Saving the same fingerprint again returns the existing id.
    fn save_material_instance(&self, material: &Material) -> Result<i64>;

    /// Material configs registered as config-repos.
    fn find_config_repos(&self) -> Result<Vec<MaterialConfig>>;

    /// Newest stored modification for `fingerprint`.
    fn latest_modification(&self, fingerprint: &str) -> Result<Option<Modification>>;

    /// Store modifications, assigning ascending sequence ids oldest-first.
    /// Returns them newest-first with ids set.
    fn save_modifications(&self, fingerprint: &str, modifications: Vec<Modification>) -> Result<Vec<Modification>>;

    /// Every stored modification for `fingerprint`, newest-first.
    fn modifications(&self, fingerprint: &str) -> Result<Vec<Modification>>;
}

#[derive(Default)]
struct Store {
    next_material_id: i64,
    next_modification_id: i64,
    materials: HashMap<i64, MaterialConfig>,
    ids_by_fingerprint: HashMap<String, i64>,
    modifications: HashMap<String, Vec<Modification>>,
    config_repos: Vec<MaterialConfig>,
}

/// Process-local repository.
#[derive(Default)]
pub struct InMemoryMaterialRepository {
    store: Mutex<Store>,
}

impl InMemoryMaterialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_repos(config_repos: Vec<MaterialConfig>) -> Self {
        let repository = Self::new();
        if let Ok(mut store) = repository.store.lock() {
            store.config_repos = config_repos;
        }
        repository
    }

    fn store(&self) -> Result<std::sync::MutexGuard<'_, Store>> {
        self.store.lock().map_err(|_| Error::poisoned("material repository"))
    }
}

impl MaterialRepository for InMemoryMaterialRepository {
    fn load_material_config(&self, id: i64) -> Result<Option<MaterialConfig>> {
        Ok(self.store()?.materials.get(&id).cloned())
    }

    fn save_material_instance(&self, material: &Material) -> Result<i64> {
        let mut store = self.store()?;
        if let Some(id) = store.ids_by_fingerprint.get(material.fingerprint()) {
            return Ok(*id);
        }
        store.next_material_id += 1;
        let id = store.next_material_id;
        store.materials.insert(id, material.config().clone());
        store.ids_by_fingerprint.insert(material.fingerprint().to_string(), id);
        Ok(id)
    }

    fn find_config_repos(&self) -> Result<Vec<MaterialConfig>> {
        Ok(self.store()?.config_repos.clone())
    }

    fn latest_modification(&self, fingerprint: &str) -> Result<Option<Modification>> {
        Ok(self
            .store()?
            .modifications
            .get(fingerprint)
            .and_then(|mods| mods.first().cloned()))
    }

    fn save_modifications(&self, fingerprint: &str, modifications: Vec<Modification>) -> Result<Vec<Modification>> {
        let mut store = self.store()?;
        let mut saved = Vec::with_capacity(modifications.len());
        // Input is newest-first; ids grow from the oldest.
        for modification in modifications.into_iter().rev() {
            store.next_modification_id += 1;
            let id = store.next_modification_id;
            saved.push(modification.with_id(id));
        }
        sort_newest_first(&mut saved);
        let history = store.modifications.entry(fingerprint.to_string()).or_default();
        history.extend(saved.iter().cloned());
        sort_newest_first(history);
        Ok(saved)
    }

    fn modifications(&self, fingerprint: &str) -> Result<Vec<Modification>> {
        Ok(self
            .store()?
            .modifications
            .get(fingerprint)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::DisabledCipher;
    use crate::revision::Revision;
    use chrono::{TimeZone, Utc};

    fn modification(rev: &str, hour: u32) -> Modification {
        Modification::new(
            Revision::scm(rev),
            "bob",
            "",
            Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_save_material_instance_is_idempotent() {
        let repo = InMemoryMaterialRepository::new();
        let material = Material::from_config(&MaterialConfig::git("https://h/r.git", "main"), &DisabledCipher).unwrap();
        let id = repo.save_material_instance(&material).unwrap();
        assert_eq!(repo.save_material_instance(&material).unwrap(), id);
        assert_eq!(repo.load_material_config(id).unwrap(), Some(material.config().clone()));
        assert_eq!(repo.load_material_config(id + 1).unwrap(), None);
    }

    #[test]
    fn test_sequence_ids_order_history_despite_clock_skew() {
        let repo = InMemoryMaterialRepository::new();
        repo.save_modifications("fp", vec![modification("b", 9), modification("a", 10)])
            .unwrap();
        // Newer commit with an older timestamp.
        repo.save_modifications("fp", vec![modification("c", 1)]).unwrap();

        let history = repo.modifications("fp").unwrap();
        let revs: Vec<String> = history.iter().map(|m| m.revision.to_string()).collect();
        assert_eq!(revs, vec!["c", "b", "a"]);
        assert_eq!(repo.latest_modification("fp").unwrap().unwrap().revision, Revision::scm("c"));
        assert!(repo.latest_modification("other").unwrap().is_none());
    }

    #[test]
    fn test_config_repos_are_listed() {
        let repos = vec![MaterialConfig::git("https://h/config.git", "main")];
        let repo = InMemoryMaterialRepository::with_config_repos(repos.clone());
        assert_eq!(repo.find_config_repos().unwrap(), repos);
    }
}
