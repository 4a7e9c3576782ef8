use std::fs;
use std::path::Path;
use std::time::Duration;

use log::debug;

use super::xml::XmlDoc;
use super::{
    parse_timestamp, read_origin_marker, write_origin_marker, RevisionContext, ScmAdapter, ValidationResult,
    WorkingCopyIdentity,
};
use crate::command::CommandLine;
use crate::console::TaggedConsole;
use crate::error::{Error, Result};
use crate::material::{Material, MaterialKind};
use crate::redact::strip_password;
use crate::revision::{Modification, ModifiedAction, Revision};

/// Team Foundation version control through the cross-platform `tf` client.
///
/// Working copies are backed by a workspace named after the material's
/// fingerprint, so two pipelines sharing a material share the workspace name
/// but never the mapped folder.
pub struct TfsAdapter {
    material: Material,
    url: String,
    domain: Option<String>,
    project_path: String,
    timeout: Option<Duration>,
}

impl TfsAdapter {
    pub fn new(material: Material, timeout: Option<Duration>) -> Self {
        let (url, domain, project_path) = match material.kind() {
            MaterialKind::Tfs(attrs) => (attrs.url.clone(), attrs.domain.clone(), attrs.project_path.clone()),
            other => (other.location(), None, String::new()),
        };
        Self {
            material,
            url,
            domain,
            project_path,
            timeout,
        }
    }

    fn tf(&self, subcommand: &str) -> Result<CommandLine> {
        let mut cmd = CommandLine::new("tf")
            .arg(subcommand)
            .arg(format!("-collection:{}", self.url))
            .arg("-noprompt")
            .timeout(self.timeout)
            .redacting(&self.material.redactor());
        if let Some(user) = self.material.username() {
            let login_user = match self.domain.as_deref().filter(|d| !d.is_empty()) {
                Some(domain) => format!("{}\\{}", domain, user),
                None => user.to_string(),
            };
            let password = self.material.password()?.unwrap_or_default();
            cmd = cmd.secret_arg(format!("-login:{},{}", login_user, password));
        }
        Ok(cmd)
    }

    fn workspace_name(&self) -> String {
        let fingerprint = self.material.pipeline_unique_fingerprint();
        format!("mt-{}", &fingerprint[..fingerprint.len().min(16)])
    }

    fn history(&self, extra: &[String]) -> Result<Vec<Modification>> {
        let output = self
            .tf("history")?
            .arg(&self.project_path)
            .args(["-recursive", "-format:xml"])
            .args(extra.iter().cloned())
            .run_or_bomb()
            .map_err(|e| Error::Connection {
                material: self.material.display_name(),
                message: self.material.redactor().redact(&e.to_string()),
            })?;
        parse_history(&output.output())
    }

    fn get(&self, dir: &Path, changeset: u64, force: bool, console: &TaggedConsole) -> Result<()> {
        let mut cmd = self
            .tf("get")?
            .arg(dir.to_string_lossy())
            .arg("-recursive")
            .arg(format!("-version:C{}", changeset));
        if force {
            cmd = cmd.arg("-force");
        }
        cmd.current_dir(dir).run_or_fail(console)
    }
}

fn changeset_number(revision: &Revision) -> Result<u64> {
    let raw = revision.to_string();
    raw.trim_start_matches('C').parse().map_err(|_| Error::Validation {
        problems: vec![format!("'{}' is not a TFS changeset", raw)],
    })
}

fn action_for(change_type: &str) -> ModifiedAction {
    let change_type = change_type.to_ascii_lowercase();
    if change_type.contains("delete") {
        ModifiedAction::Deleted
    } else if change_type.contains("add") || change_type.contains("branch") {
        ModifiedAction::Added
    } else if change_type.contains("edit") || change_type.contains("rename") || change_type.contains("merge") {
        ModifiedAction::Modified
    } else {
        ModifiedAction::Unknown
    }
}

/// Parse `tf history -format:xml`, newest-first.
fn parse_history(xml: &str) -> Result<Vec<Modification>> {
    let doc = XmlDoc::parse(xml, "tf")?;
    let mut modifications = Vec::new();
    for changeset in doc.descendants(doc.root(), "changeset") {
        let id = doc.required_attribute(changeset, "id")?;
        let date = doc.required_attribute(changeset, "date")?;
        let owner = doc
            .attribute(changeset, "committer")
            .or_else(|| doc.attribute(changeset, "owner"))
            .unwrap_or_default();
        let mut modification = Modification::new(
            Revision::scm(id),
            owner,
            doc.child_text(changeset, "comment").unwrap_or_default(),
            parse_timestamp(&date, "tf")?,
        );
        for item in doc.children(changeset, "item") {
            let path = doc.required_attribute(item, "server-item")?;
            let action = action_for(&doc.attribute(item, "change-type").unwrap_or_default());
            modification = modification.with_file(path, action);
        }
        modifications.push(modification);
    }
    Ok(modifications)
}

impl ScmAdapter for TfsAdapter {
    fn material(&self) -> &Material {
        &self.material
    }

    fn latest_modification(&self, _flyweight: &Path) -> Result<Vec<Modification>> {
        let mut latest = self.history(&["-stopafter:1".to_string()])?;
        latest.truncate(1);
        Ok(latest)
    }

    fn modifications_since(&self, _flyweight: &Path, revision: &Revision) -> Result<Vec<Modification>> {
        let since = changeset_number(revision)?;
        let modifications = self.history(&[format!("-version:C{}~T", since + 1)])?;
        Ok(modifications
            .into_iter()
            .filter(|m| changeset_number(&m.revision).map(|n| n > since).unwrap_or(false))
            .collect())
    }

    fn checkout(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        let changeset = changeset_number(&context.latest)?;
        fs::create_dir_all(dir)?;
        let workspace = self.workspace_name();
        console.info(&format!(
            "Creating workspace {} for {} in {}",
            workspace,
            self.material.display_name(),
            dir.display()
        ));
        // A stale workspace from an earlier checkout may still exist.
        if let Err(e) = self.tf("workspace")?.args(["-delete", workspace.as_str()]).run_or_bomb() {
            debug!("No stale workspace {} to delete: {}", workspace, e);
        }
        self.tf("workspace")?.args(["-new", workspace.as_str()]).run_or_fail(console)?;
        self.tf("workfold")?
            .arg("-map")
            .arg(format!("-workspace:{}", workspace))
            .arg(&self.project_path)
            .arg(dir.to_string_lossy())
            .run_or_fail(console)?;
        self.get(dir, changeset, true, console)?;
        write_origin_marker(dir, &self.identity())
    }

    fn update(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        let changeset = changeset_number(&context.latest)?;
        console.info(&format!("Getting changeset {} of {}", changeset, self.project_path));
        self.get(dir, changeset, false, console)
    }

    fn check_connection(&self) -> ValidationResult {
        let result = self
            .tf("dir")
            .and_then(|cmd| cmd.arg(&self.project_path).run_or_bomb())
            .map(|_| ());
        ValidationResult::from_result(result, &self.material)
    }

    fn identity(&self) -> WorkingCopyIdentity {
        WorkingCopyIdentity::new(strip_password(&self.url)).with_branch(self.project_path.clone())
    }

    fn recorded_origin(&self, dir: &Path) -> Result<Option<WorkingCopyIdentity>> {
        read_origin_marker(dir)
    }
}
