use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};

use super::{parse_timestamp, RevisionContext, ScmAdapter, ValidationResult, WorkingCopyIdentity};
use crate::command::CommandLine;
use crate::console::{NullConsole, TaggedConsole};
use crate::error::{Error, Result};
use crate::material::{Material, MaterialKind};
use crate::redact::strip_password;
use crate::revision::{Modification, ModifiedAction, Revision};
use crate::workdir::origin_matches;

const RECORD: char = '\u{1e}';
const FIELD: char = '\u{1f}';

/// Fields: node, author name, author email, date, description, then added,
/// modified and removed files each joined by `\u{1d}`.
const LOG_TEMPLATE: &str = "\u{1e}{node}\u{1f}{author|person}\u{1f}{author|email}\u{1f}{date|rfc3339date}\u{1f}{desc}\u{1f}{join(file_adds,'\u{1d}')}\u{1f}{join(file_mods,'\u{1d}')}\u{1f}{join(file_dels,'\u{1d}')}\u{1f}";
const FILE_SEPARATOR: char = '\u{1d}';

/// Mercurial through the `hg` command line client.
pub struct HgAdapter {
    material: Material,
    url: String,
    branch: String,
    timeout: Option<Duration>,
}

impl HgAdapter {
    pub fn new(material: Material, timeout: Option<Duration>) -> Self {
        let (url, branch) = match material.kind() {
            MaterialKind::Hg(attrs) => (attrs.base_url().to_string(), attrs.effective_branch().to_string()),
            other => (other.location(), "default".to_string()),
        };
        Self {
            material,
            url,
            branch,
            timeout,
        }
    }

    fn hg(&self) -> CommandLine {
        CommandLine::new("hg")
            .env("HGPLAIN", "1")
            .timeout(self.timeout)
            .redacting(&self.material.redactor())
    }

    fn remote_url(&self) -> Result<String> {
        self.material.url_with_credentials(&self.url)
    }

    fn clone_into(&self, dir: &Path, no_update: bool, console: &TaggedConsole) -> Result<()> {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut cmd = self.hg().arg("clone");
        if no_update {
            cmd = cmd.arg("-U");
        }
        cmd.args(["-b", self.branch.as_str()])
            .arg(self.remote_url()?)
            .arg(dir.to_string_lossy())
            .run_or_fail(console)
    }

    fn pull(&self, dir: &Path, console: &dyn crate::console::ConsoleSink) -> Result<()> {
        self.hg()
            .args(["pull", "-b", self.branch.as_str()])
            .arg(self.remote_url()?)
            .current_dir(dir)
            .run_or_fail(console)
    }

    fn update_working_dir(&self, dir: &Path, revision: &Revision, console: &TaggedConsole) -> Result<()> {
        console.info(&format!("Updating working copy to {}", revision));
        self.hg()
            .args(["--config", "extensions.purge=", "purge", "--all"])
            .current_dir(dir)
            .run_or_fail(console)?;
        self.hg()
            .args(["update", "--clean", "-r"])
            .arg(revision.to_string())
            .current_dir(dir)
            .run_or_fail(console)
    }

    fn refresh_flyweight(&self, flyweight: &Path) -> Result<()> {
        let sink = NullConsole;
        let console = TaggedConsole::new(&sink, "", self.material.redactor());
        let reusable = match self.recorded_origin(flyweight)? {
            Some(recorded) => origin_matches(&recorded, &self.identity()),
            None => false,
        };
        let result = if reusable {
            debug!("Pulling into flyweight {}", flyweight.display());
            self.pull(flyweight, &console)
        } else {
            if flyweight.exists() {
                fs::remove_dir_all(flyweight)?;
            }
            self.clone_into(flyweight, true, &console)
        };
        result.map_err(|e| self.connection_error(e))
    }

    fn connection_error(&self, error: Error) -> Error {
        Error::Connection {
            material: self.material.display_name(),
            message: self.material.redactor().redact(&error.to_string()),
        }
    }

    fn log(&self, flyweight: &Path, revisions: &str, limit: Option<usize>) -> Result<Vec<Modification>> {
        let mut cmd = self
            .hg()
            .args(["log", "--template", LOG_TEMPLATE, "-b", self.branch.as_str(), "-r", revisions]);
        if let Some(limit) = limit {
            cmd = cmd.arg("-l").arg(limit.to_string());
        }
        let output = cmd.current_dir(flyweight).run_or_bomb()?;
        parse_log(&output.output())
    }
}

fn parse_log(output: &str) -> Result<Vec<Modification>> {
    let mut modifications = Vec::new();
    for record in output.split(RECORD).filter(|r| !r.trim().is_empty()) {
        let fields: Vec<&str> = record.split(FIELD).collect();
        if fields.len() < 8 {
            return Err(Error::ToolOutput {
                tool: "hg".to_string(),
                message: format!("expected 8 fields in log record, found {}", fields.len()),
            });
        }
        let mut modification = Modification::new(
            Revision::scm(fields[0].trim()),
            fields[1],
            fields[4].trim_end(),
            parse_timestamp(fields[3], "hg")?,
        );
        if !fields[2].is_empty() {
            modification = modification.with_email(fields[2]);
        }
        let actions = [
            (fields[5], ModifiedAction::Added),
            (fields[6], ModifiedAction::Modified),
            (fields[7], ModifiedAction::Deleted),
        ];
        for (files, action) in actions {
            for file in files.split(FILE_SEPARATOR).filter(|f| !f.is_empty()) {
                modification = modification.with_file(file, action);
            }
        }
        modifications.push(modification);
    }
    Ok(modifications)
}

impl ScmAdapter for HgAdapter {
    fn material(&self) -> &Material {
        &self.material
    }

    fn latest_modification(&self, flyweight: &Path) -> Result<Vec<Modification>> {
        self.refresh_flyweight(flyweight)?;
        let mut latest = self.log(flyweight, "tip:0", Some(1))?;
        latest.truncate(1);
        Ok(latest)
    }

    fn modifications_since(&self, flyweight: &Path, revision: &Revision) -> Result<Vec<Modification>> {
        self.refresh_flyweight(flyweight)?;
        let range = format!("tip:{}", revision);
        match self.log(flyweight, &range, None) {
            Ok(modifications) => Ok(modifications
                .into_iter()
                .filter(|m| m.revision != *revision)
                .collect()),
            Err(Error::Command { .. }) => {
                warn!(
                    "Revision {} of {} is unknown, using latest",
                    revision,
                    self.material.display_name()
                );
                self.latest_modification(flyweight)
            }
            Err(e) => Err(e),
        }
    }

    fn checkout(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        console.info(&format!(
            "Cloning {} ({}) into {}",
            self.material.display_name(),
            self.branch,
            dir.display()
        ));
        self.clone_into(dir, false, console)?;
        self.update_working_dir(dir, &context.latest, console)
    }

    fn update(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        console.info(&format!("Pulling changes from {}", self.material.display_name()));
        self.pull(dir, console)?;
        self.update_working_dir(dir, &context.latest, console)
    }

    fn check_connection(&self) -> ValidationResult {
        let result = self
            .remote_url()
            .and_then(|url| self.hg().args(["id", url.as_str()]).run_or_bomb())
            .map(|_| ());
        ValidationResult::from_result(result, &self.material)
    }

    fn identity(&self) -> WorkingCopyIdentity {
        let url = self
            .remote_url()
            .map(|u| strip_password(&u))
            .unwrap_or_else(|_| strip_password(&self.url));
        WorkingCopyIdentity::new(url).with_branch(self.branch.clone())
    }

    fn recorded_origin(&self, dir: &Path) -> Result<Option<WorkingCopyIdentity>> {
        if !dir.join(".hg").exists() {
            return Ok(None);
        }
        let url = match self
            .hg()
            .args(["showconfig", "paths.default"])
            .current_dir(dir)
            .run_or_bomb()
        {
            Ok(output) => output.output().trim().to_string(),
            Err(Error::Command { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        // A `-U` clone has no checked-out branch; fall back to what was cloned.
        let branch = self
            .hg()
            .arg("branch")
            .current_dir(dir)
            .run_or_bomb()
            .ok()
            .map(|o| o.output().trim().to_string())
            .filter(|b| !b.is_empty() && b != "default")
            .unwrap_or_else(|| self.branch.clone());
        Ok(Some(WorkingCopyIdentity::new(strip_password(&url)).with_branch(branch)))
    }
}
