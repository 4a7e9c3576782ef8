//! Revisions and modifications
//!
//! A [`Revision`] identifies a point in a source's history. A
//! [`Modification`] is one committed change at a revision. Lists of
//! modifications for a single material are always kept newest-first by the
//! sequence id the persistence layer assigns, never by commit timestamp.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Compound revision of an upstream pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineRevision {
    pub pipeline_name: String,
    pub pipeline_counter: u64,
    pub pipeline_label: String,
    pub stage_name: String,
    pub stage_counter: u64,
}

impl PipelineRevision {
    pub fn new(
        pipeline_name: impl Into<String>,
        pipeline_counter: u64,
        stage_name: impl Into<String>,
        stage_counter: u64,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            pipeline_counter,
            pipeline_label: pipeline_counter.to_string(),
            stage_name: stage_name.into(),
            stage_counter,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.pipeline_label = label.into();
        self
    }

    /// Parse `pipeline/counter/stage/stage_counter`.
    pub fn parse(raw: &str) -> Result<Self> {
        let parts: Vec<&str> = raw.split('/').collect();
        let invalid = || Error::Validation {
            problems: vec![format!(
                "'{}' is not a pipeline revision (expected pipeline/counter/stage/counter)",
                raw
            )],
        };
        if parts.len() != 4 || parts[0].is_empty() || parts[2].is_empty() {
            return Err(invalid());
        }
        let pipeline_counter = parts[1].parse().map_err(|_| invalid())?;
        let stage_counter = parts[3].parse().map_err(|_| invalid())?;
        Ok(Self::new(parts[0], pipeline_counter, parts[2], stage_counter))
    }
}

impl fmt::Display for PipelineRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.pipeline_name, self.pipeline_counter, self.stage_name, self.stage_counter
        )
    }
}

/// Opaque identifier of a point in a source's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Revision {
    /// Commit hash or changeset id (git, hg, tfs changeset, p4 change, plugin SCM).
    Scm(String),
    /// Subversion revision number.
    Svn(u64),
    /// Upstream pipeline stage run.
    Pipeline(PipelineRevision),
    /// Package repository revision label.
    Package(String),
}

impl Revision {
    pub fn scm(id: impl Into<String>) -> Self {
        Revision::Scm(id.into())
    }

    /// Short form for display: git hashes are cut to seven characters.
    pub fn short(&self) -> String {
        match self {
            Revision::Scm(id) if id.len() > 7 && id.chars().all(|c| c.is_ascii_hexdigit()) => {
                id[..7].to_string()
            }
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Scm(id) | Revision::Package(id) => f.write_str(id),
            Revision::Svn(number) => write!(f, "{}", number),
            Revision::Pipeline(p) => write!(f, "{}", p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifiedAction {
    Added,
    Modified,
    Deleted,
    Unknown,
}

impl ModifiedAction {
    /// Map a single-letter status as printed by git, hg and svn.
    pub fn from_status_letter(letter: &str) -> Self {
        match letter.chars().next() {
            Some('A') | Some('C') => ModifiedAction::Added,
            Some('M') | Some('R') | Some('T') => ModifiedAction::Modified,
            Some('D') => ModifiedAction::Deleted,
            _ => ModifiedAction::Unknown,
        }
    }
}

impl fmt::Display for ModifiedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModifiedAction::Added => "added",
            ModifiedAction::Modified => "modified",
            ModifiedAction::Deleted => "deleted",
            ModifiedAction::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModifiedFile {
    pub path: String,
    pub action: ModifiedAction,
}

impl ModifiedFile {
    pub fn new(path: impl Into<String>, action: ModifiedAction) -> Self {
        Self {
            path: path.into(),
            action,
        }
    }
}

/// One committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// Sequence id assigned by persistence; `None` until saved.
    pub id: Option<i64>,
    pub revision: Revision,
    pub user_name: String,
    pub email: Option<String>,
    pub comment: String,
    pub modified_time: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<ModifiedFile>,
    /// Source-specific metadata, opaque to the engine.
    #[serde(default)]
    pub additional_data: BTreeMap<String, String>,
}

impl Modification {
    pub fn new(
        revision: Revision,
        user_name: impl Into<String>,
        comment: impl Into<String>,
        modified_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            revision,
            user_name: user_name.into(),
            email: None,
            comment: comment.into(),
            modified_time,
            files: Vec::new(),
            additional_data: BTreeMap::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, action: ModifiedAction) -> Self {
        self.files.push(ModifiedFile::new(path, action));
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_data.insert(key.into(), value.into());
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    pub fn changed_paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }
}

/// Sort modifications newest-first by sequence id.
///
/// Unsaved modifications (no id yet) are newer than any saved one and keep
/// the order the adapter reported them in. Commit timestamps are ignored.
pub fn sort_newest_first(modifications: &mut [Modification]) {
    modifications.sort_by_key(|m| Reverse(m.id.unwrap_or(i64::MAX)));
}

/// Union of changed paths across a set of modifications.
pub fn all_changed_paths(modifications: &[Modification]) -> Vec<&str> {
    let mut paths: Vec<&str> = modifications
        .iter()
        .flat_map(Modification::changed_paths)
        .collect();
    paths.sort_unstable();
    paths.dedup();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_pipeline_revision_round_trip_display() {
        let rev = PipelineRevision::parse("upstream/12/dist/2").unwrap();
        assert_eq!(rev.pipeline_name, "upstream");
        assert_eq!(rev.pipeline_counter, 12);
        assert_eq!(rev.stage_name, "dist");
        assert_eq!(rev.stage_counter, 2);
        assert_eq!(rev.pipeline_label, "12");
        assert_eq!(rev.to_string(), "upstream/12/dist/2");
    }

    #[test]
    fn test_pipeline_revision_rejects_garbage() {
        assert!(PipelineRevision::parse("upstream/x/dist/2").is_err());
        assert!(PipelineRevision::parse("upstream/1/dist").is_err());
        assert!(PipelineRevision::parse("/1//2").is_err());
    }

    #[test]
    fn test_revision_short_form() {
        let git = Revision::scm("4e5a6b7c8d9e0f1a2b3c4d5e6f708192a3b4c5d6");
        assert_eq!(git.short(), "4e5a6b7");
        assert_eq!(Revision::Svn(1234).short(), "1234");
        assert_eq!(Revision::scm("changeset-99").short(), "changeset-99");
    }

    #[test]
    fn test_status_letters() {
        assert_eq!(ModifiedAction::from_status_letter("A"), ModifiedAction::Added);
        assert_eq!(ModifiedAction::from_status_letter("M"), ModifiedAction::Modified);
        assert_eq!(ModifiedAction::from_status_letter("R100"), ModifiedAction::Modified);
        assert_eq!(ModifiedAction::from_status_letter("D"), ModifiedAction::Deleted);
        assert_eq!(ModifiedAction::from_status_letter("?"), ModifiedAction::Unknown);
    }

    #[test]
    fn test_sort_ignores_clock_skew() {
        // id 3 was committed "earlier" by a skewed clock but is newer.
        let mut mods = vec![
            Modification::new(Revision::scm("a"), "u", "first", at(10)).with_id(1),
            Modification::new(Revision::scm("c"), "u", "third", at(9)).with_id(3),
            Modification::new(Revision::scm("b"), "u", "second", at(11)).with_id(2),
        ];
        sort_newest_first(&mut mods);
        let order: Vec<String> = mods.iter().map(|m| m.revision.to_string()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_sort_keeps_unsaved_first_in_reported_order() {
        let mut mods = vec![
            Modification::new(Revision::scm("old"), "u", "", at(1)).with_id(7),
            Modification::new(Revision::scm("new2"), "u", "", at(3)),
            Modification::new(Revision::scm("new1"), "u", "", at(2)),
        ];
        sort_newest_first(&mut mods);
        let order: Vec<String> = mods.iter().map(|m| m.revision.to_string()).collect();
        assert_eq!(order, vec!["new2", "new1", "old"]);
    }

    #[test]
    fn test_all_changed_paths_is_union() {
        let mods = vec![
            Modification::new(Revision::scm("b"), "u", "", at(2))
                .with_file("src/a.rs", ModifiedAction::Modified)
                .with_file("docs/readme.md", ModifiedAction::Added),
            Modification::new(Revision::scm("a"), "u", "", at(1))
                .with_file("src/a.rs", ModifiedAction::Added),
        ];
        assert_eq!(all_changed_paths(&mods), vec!["docs/readme.md", "src/a.rs"]);
    }
}
