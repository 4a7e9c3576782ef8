//! # Revision-Set Assembly
//!
//! Builds the per-pipeline trigger snapshot, [`MaterialRevisions`], from the
//! pipeline's declared materials.
//!
//! Each material is queried for either its latest modification (no previous
//! snapshot entry) or everything since the head of its previous entry. The
//! queries run in parallel, but the result always follows declaration order,
//! with Subversion externals placed directly after their parent. One
//! material's failure does not stop the others from being queried; all
//! failures are reported together as [`Error::TriggerCheck`].
//!
//! Whether a material triggers is decided by its ignore filter over the
//! union of paths touched by its new modifications. A material with no new
//! modifications never triggers.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::material::{Material, MaterialKind};
use crate::revision::{all_changed_paths, Modification, Revision};
use crate::scm::AdapterRegistry;

/// What to ask a material for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionQuery {
    Latest,
    /// Everything newer than the given, previously seen modification.
    Since(Modification),
}

/// Where modifications come from. Implemented over the adapter registry;
/// tests substitute scripted sources.
pub trait ModificationSource: Send + Sync {
    fn latest(&self, material: &Material) -> Result<Vec<Modification>>;

    fn since(&self, material: &Material, revision: &Revision) -> Result<Vec<Modification>>;

    /// Pseudo-materials nested under `material`.
    fn externals(&self, material: &Material) -> Result<Vec<Material>>;
}

/// [`ModificationSource`] that polls through real adapters, keeping one
/// flyweight directory per material fingerprint.
pub struct AdapterModificationSource {
    registry: Arc<AdapterRegistry>,
    flyweight_root: PathBuf,
}

impl AdapterModificationSource {
    pub fn new(registry: Arc<AdapterRegistry>, flyweight_root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            flyweight_root: flyweight_root.into(),
        }
    }

    pub fn flyweight_dir(&self, material: &Material) -> PathBuf {
        self.flyweight_root.join(material.fingerprint())
    }

    fn prepare(&self, material: &Material) -> Result<PathBuf> {
        let dir = self.flyweight_dir(material);
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(dir)
    }
}

impl ModificationSource for AdapterModificationSource {
    fn latest(&self, material: &Material) -> Result<Vec<Modification>> {
        let flyweight = self.prepare(material)?;
        self.registry.adapter_for(material)?.latest_modification(&flyweight)
    }

    fn since(&self, material: &Material, revision: &Revision) -> Result<Vec<Modification>> {
        let flyweight = self.prepare(material)?;
        self.registry
            .adapter_for(material)?
            .modifications_since(&flyweight, revision)
    }

    fn externals(&self, material: &Material) -> Result<Vec<Material>> {
        self.registry.adapter_for(material)?.externals()
    }
}

/// One material's entry in a trigger snapshot.
#[derive(Debug, Clone)]
pub struct MaterialRevision {
    material: Material,
    modifications: Vec<Modification>,
    changed: bool,
    should_trigger: bool,
}

impl MaterialRevision {
    /// Entry whose `modifications` are all new since the previous snapshot.
    pub fn changed(material: Material, modifications: Vec<Modification>) -> Self {
        let changed = !modifications.is_empty();
        let should_trigger = changed && !is_ignored(&material, &modifications);
        Self {
            material,
            modifications,
            changed,
            should_trigger,
        }
    }

    /// Entry carrying the previously seen head; nothing new, never triggers.
    pub fn unchanged(material: Material, previous: Modification) -> Self {
        Self {
            material,
            modifications: vec![previous],
            changed: false,
            should_trigger: false,
        }
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    /// Newest-first.
    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    pub fn latest_modification(&self) -> Option<&Modification> {
        self.modifications.first()
    }

    pub fn latest_revision(&self) -> Option<&Revision> {
        self.latest_modification().map(|m| &m.revision)
    }

    pub fn oldest_modification(&self) -> Option<&Modification> {
        self.modifications.last()
    }

    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn should_trigger(&self) -> bool {
        self.should_trigger
    }
}

/// Whether a material's ignore filter suppresses these modifications.
///
/// Dependency materials are never ignored. Otherwise the filter decides over
/// the union of changed paths; an empty union counts as ignored in both filter
/// modes.
pub fn is_ignored(material: &Material, modifications: &[Modification]) -> bool {
    if matches!(material.kind(), MaterialKind::Dependency(_)) {
        return false;
    }
    let filter = material.filter();
    if filter.is_empty() && !filter.invert {
        return false;
    }
    match filter.compile() {
        Ok(compiled) => compiled.should_ignore(&all_changed_paths(modifications)),
        Err(e) => {
            warn!(
                "Ignoring unusable filter of {}: {}",
                material.display_name(),
                e
            );
            false
        }
    }
}

/// Ordered trigger snapshot for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct MaterialRevisions {
    revisions: Vec<MaterialRevision>,
}

impl MaterialRevisions {
    pub fn new(revisions: Vec<MaterialRevision>) -> Self {
        Self { revisions }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaterialRevision> {
        self.revisions.iter()
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    /// Whether any material has new modifications.
    pub fn is_changed(&self) -> bool {
        self.revisions.iter().any(MaterialRevision::is_changed)
    }

    /// Whether any material's new modifications pass its filter.
    pub fn should_trigger(&self) -> bool {
        self.revisions.iter().any(MaterialRevision::should_trigger)
    }

    /// `modified by <user>` of the first changed material, else of the first.
    pub fn build_cause_message(&self) -> String {
        let chosen = self
            .revisions
            .iter()
            .find(|r| r.is_changed())
            .or_else(|| self.revisions.first());
        match chosen.and_then(MaterialRevision::latest_modification) {
            Some(m) => format!("modified by {}", m.user_name),
            None => "No modifications".to_string(),
        }
    }

    /// Head revision of the first entry.
    pub fn latest_revision(&self) -> Option<&Revision> {
        self.revisions.first().and_then(MaterialRevision::latest_revision)
    }

    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Option<&MaterialRevision> {
        self.revisions.iter().find(|r| {
            r.material.pipeline_unique_fingerprint() == fingerprint || r.material.fingerprint() == fingerprint
        })
    }

    /// Same materials in the same order with identical head revisions.
    pub fn is_same_as(&self, other: &MaterialRevisions) -> bool {
        self.revisions.len() == other.revisions.len()
            && self.revisions.iter().zip(&other.revisions).all(|(a, b)| {
                a.material.pipeline_unique_fingerprint() == b.material.pipeline_unique_fingerprint()
                    && a.latest_revision() == b.latest_revision()
            })
    }
}

impl<'a> IntoIterator for &'a MaterialRevisions {
    type Item = &'a MaterialRevision;
    type IntoIter = std::slice::Iter<'a, MaterialRevision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.iter()
    }
}

impl fmt::Display for MaterialRevisions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for revision in &self.revisions {
            let head = revision
                .latest_revision()
                .map(|r| r.short())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "{} @ {}{}",
                revision.material.display_name(),
                head,
                if revision.should_trigger { " (triggers)" } else { "" }
            )?;
        }
        Ok(())
    }
}

/// Assembles [`MaterialRevisions`] through a [`ModificationSource`].
pub struct RevisionSetAssembler<S: ModificationSource + ?Sized> {
    source: Arc<S>,
}

impl<S: ModificationSource + ?Sized> RevisionSetAssembler<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    /// Snapshot of `materials` for `pipeline`, relative to `previous` when
    /// given. Externals discovered under a material follow it directly.
    pub fn assemble(
        &self,
        pipeline: &str,
        materials: &[Material],
        previous: Option<&MaterialRevisions>,
    ) -> Result<MaterialRevisions> {
        let expanded = self.expand_externals(materials);
        let mut failures = Vec::new();
        let mut candidates = Vec::new();
        for entry in expanded {
            match entry {
                Ok(material) => candidates.push(material),
                Err(message) => failures.push(message),
            }
        }

        let results: Vec<std::result::Result<MaterialRevision, String>> = candidates
            .into_par_iter()
            .map(|material| {
                let query = query_for(&material, previous);
                self.query(material, query)
            })
            .collect();

        let mut revisions = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(revision) => revisions.push(revision),
                Err(message) => failures.push(message),
            }
        }
        if !failures.is_empty() {
            return Err(Error::TriggerCheck {
                pipeline: pipeline.to_string(),
                failures,
            });
        }
        debug!("Assembled {} material revisions for {}", revisions.len(), pipeline);
        Ok(MaterialRevisions::new(revisions))
    }

    fn expand_externals(&self, materials: &[Material]) -> Vec<std::result::Result<Material, String>> {
        let mut expanded = Vec::new();
        for material in materials {
            expanded.push(Ok(material.clone()));
            if !matches!(material.kind(), MaterialKind::Svn(attrs) if attrs.check_externals) {
                continue;
            }
            match self.source.externals(material) {
                Ok(externals) => expanded.extend(externals.into_iter().map(Ok)),
                Err(e) => expanded.push(Err(failure_message(material, &e))),
            }
        }
        expanded
    }

    fn query(&self, material: Material, query: RevisionQuery) -> std::result::Result<MaterialRevision, String> {
        let result = match &query {
            RevisionQuery::Latest => self.source.latest(&material),
            RevisionQuery::Since(previous) => self.source.since(&material, &previous.revision),
        };
        match (result, query) {
            (Ok(modifications), RevisionQuery::Since(previous)) if modifications.is_empty() => {
                Ok(MaterialRevision::unchanged(material, previous))
            }
            (Ok(modifications), _) => Ok(MaterialRevision::changed(material, modifications)),
            (Err(e), _) => Err(failure_message(&material, &e)),
        }
    }
}

fn query_for(material: &Material, previous: Option<&MaterialRevisions>) -> RevisionQuery {
    previous
        .and_then(|p| p.find_by_fingerprint(material.pipeline_unique_fingerprint()))
        .and_then(MaterialRevision::latest_modification)
        .map(|m| RevisionQuery::Since(m.clone()))
        .unwrap_or(RevisionQuery::Latest)
}

fn failure_message(material: &Material, error: &Error) -> String {
    material
        .redactor()
        .redact(&format!("{}: {}", material.display_name(), error))
}

/// Convenience for callers holding a plain path to a flyweight root.
pub fn adapter_assembler(
    registry: Arc<AdapterRegistry>,
    flyweight_root: &Path,
) -> RevisionSetAssembler<AdapterModificationSource> {
    RevisionSetAssembler::new(Arc::new(AdapterModificationSource::new(registry, flyweight_root)))
}
