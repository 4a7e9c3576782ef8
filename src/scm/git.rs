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
use crate::workdir::{ensure_reachable, origin_matches, ShallowHistory};

const RECORD: char = '\u{1e}';
const FIELD: char = '\u{1f}';
const LOG_FORMAT: &str = "--pretty=format:%x1e%H%x1f%an%x1f%ae%x1f%aI%x1f%B%x1f";

/// Git through the system `git` binary.
///
/// Authentication is whatever the host's git is configured with (SSH keys,
/// credential helpers) plus any username/password on the material, which is
/// folded into the remote URL and masked everywhere it could surface.
pub struct GitAdapter {
    material: Material,
    url: String,
    branch: String,
    shallow_clone: bool,
    timeout: Option<Duration>,
}

impl GitAdapter {
    pub fn new(material: Material, timeout: Option<Duration>) -> Self {
        let (url, branch, shallow_clone) = match material.kind() {
            MaterialKind::Git(attrs) => (
                attrs.url.clone(),
                attrs.effective_branch().to_string(),
                attrs.shallow_clone,
            ),
            other => (other.location(), "master".to_string(), false),
        };
        Self {
            material,
            url,
            branch,
            shallow_clone,
            timeout,
        }
    }

    fn git(&self) -> CommandLine {
        CommandLine::new("git")
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.timeout)
            .redacting(&self.material.redactor())
    }

    fn remote_url(&self) -> Result<String> {
        self.material.url_with_credentials(&self.url)
    }

    fn remote_branch(&self) -> String {
        format!("origin/{}", self.branch)
    }

    fn clone_into(&self, dir: &Path, depth: Option<usize>, no_checkout: bool, console: &TaggedConsole) -> Result<()> {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut cmd = self.git().args(["clone", "--branch", self.branch.as_str()]);
        if let Some(depth) = depth {
            cmd = cmd.arg(format!("--depth={}", depth));
        }
        if no_checkout {
            cmd = cmd.arg("--no-checkout");
        }
        cmd.arg(self.remote_url()?)
            .arg(dir.to_string_lossy())
            .run_or_fail(console)
    }

    fn fetch(&self, dir: &Path, console: &TaggedConsole) -> Result<()> {
        console.info(&format!("Fetching changes from {}", self.material.display_name()));
        self.git()
            .args(["fetch", "origin", "--prune", "--recurse-submodules=no"])
            .current_dir(dir)
            .run_or_fail(console)?;
        self.git().args(["gc", "--auto"]).current_dir(dir).run_or_fail(console)
    }

    fn reset_working_dir(&self, dir: &Path, revision: &Revision, console: &TaggedConsole) -> Result<()> {
        console.info(&format!("Resetting working copy to {}", revision));
        self.git().args(["clean", "-dffx"]).current_dir(dir).run_or_fail(console)?;
        self.git()
            .args(["reset", "--hard"])
            .arg(revision.to_string())
            .current_dir(dir)
            .run_or_fail(console)?;
        if dir.join(".gitmodules").is_file() {
            self.git().args(["submodule", "sync"]).current_dir(dir).run_or_fail(console)?;
            self.git()
                .args(["submodule", "update", "--init", "--recursive"])
                .current_dir(dir)
                .run_or_fail(console)?;
        }
        Ok(())
    }

    /// Keep a full-depth `--no-checkout` clone in `flyweight` current with
    /// the remote. Shallow cloning applies to working copies only; history
    /// queries need every commit after the last known revision.
    fn refresh_flyweight(&self, flyweight: &Path) -> Result<()> {
        let sink = NullConsole;
        let console = TaggedConsole::new(&sink, "", self.material.redactor());
        let reusable = match self.recorded_origin(flyweight)? {
            Some(recorded) => origin_matches(&recorded, &self.identity().shallow(false)),
            None => false,
        };
        if reusable {
            debug!("Fetching into flyweight {}", flyweight.display());
            self.git()
                .args(["fetch", "origin", "--prune"])
                .current_dir(flyweight)
                .run_or_bomb()?;
            return Ok(());
        }
        if flyweight.exists() {
            fs::remove_dir_all(flyweight)?;
        }
        self.clone_into(flyweight, None, true, &console)
            .map_err(|e| self.connection_error(e))
    }

    fn connection_error(&self, error: Error) -> Error {
        Error::Connection {
            material: self.material.display_name(),
            message: self.material.redactor().redact(&error.to_string()),
        }
    }

    fn log(&self, flyweight: &Path, range: &[String]) -> Result<Vec<Modification>> {
        let result = self
            .git()
            .args(["log", "--no-color", "--name-status", LOG_FORMAT])
            .args(range.iter().cloned())
            .arg("--")
            .current_dir(flyweight)
            .run_or_bomb()?;
        parse_log(&result.output())
    }
}

/// Parse `git log` output produced with [`LOG_FORMAT`] and `--name-status`.
fn parse_log(output: &str) -> Result<Vec<Modification>> {
    let mut modifications = Vec::new();
    for record in output.split(RECORD).filter(|r| !r.trim().is_empty()) {
        let fields: Vec<&str> = record.splitn(6, FIELD).collect();
        if fields.len() < 5 {
            return Err(Error::ToolOutput {
                tool: "git".to_string(),
                message: format!("truncated log record '{}'", record.trim()),
            });
        }
        let mut modification = Modification::new(
            Revision::scm(fields[0].trim()),
            fields[1],
            fields[4].trim_end(),
            parse_timestamp(fields[3], "git")?,
        );
        if !fields[2].is_empty() {
            modification = modification.with_email(fields[2]);
        }
        if let Some(files) = fields.get(5) {
            for line in files.lines().filter(|l| !l.trim().is_empty()) {
                let columns: Vec<&str> = line.split('\t').collect();
                if let (Some(status), Some(path)) = (columns.first(), columns.last()) {
                    if columns.len() > 1 {
                        modification = modification.with_file(*path, ModifiedAction::from_status_letter(status));
                    }
                }
            }
        }
        modifications.push(modification);
    }
    Ok(modifications)
}

/// Local history of one git working copy, for shallow deepening.
struct GitHistory<'a> {
    adapter: &'a GitAdapter,
    dir: &'a Path,
    console: &'a TaggedConsole<'a>,
}

impl ShallowHistory for GitHistory<'_> {
    fn is_shallow(&self) -> bool {
        self.dir.join(".git").join("shallow").is_file()
    }

    fn contains_revision(&self, revision: &Revision) -> Result<bool> {
        let result = self
            .adapter
            .git()
            .args(["branch", "-r", "--contains"])
            .arg(revision.to_string())
            .current_dir(self.dir)
            .run_or_bomb();
        match result {
            Ok(output) => Ok(output.stdout.iter().any(|l| !l.trim().is_empty())),
            Err(Error::Command { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn unshallow(&self, depth: Option<usize>) -> Result<()> {
        let depth_arg = match depth {
            Some(depth) => format!("--depth={}", depth),
            None => "--unshallow".to_string(),
        };
        self.console.info(&format!("Deepening shallow clone ({})", depth_arg));
        self.adapter
            .git()
            .args(["fetch", "origin"])
            .arg(depth_arg)
            .current_dir(self.dir)
            .run_or_fail(self.console)
    }
}

impl ScmAdapter for GitAdapter {
    fn material(&self) -> &Material {
        &self.material
    }

    fn latest_modification(&self, flyweight: &Path) -> Result<Vec<Modification>> {
        self.refresh_flyweight(flyweight)?;
        let mut latest = self.log(flyweight, &["-1".to_string(), self.remote_branch()])?;
        latest.truncate(1);
        Ok(latest)
    }

    fn modifications_since(&self, flyweight: &Path, revision: &Revision) -> Result<Vec<Modification>> {
        self.refresh_flyweight(flyweight)?;
        let range = format!("{}..{}", revision, self.remote_branch());
        match self.log(flyweight, &[range]) {
            Ok(modifications) => Ok(modifications),
            Err(Error::Command { .. }) => {
                warn!(
                    "Revision {} of {} is no longer in history, using latest",
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
        let depth = self.shallow_clone.then(|| context.shallow_depth());
        self.clone_into(dir, depth, false, console)?;
        let history = GitHistory {
            adapter: self,
            dir,
            console,
        };
        ensure_reachable(&history, context.oldest(), console)?;
        self.reset_working_dir(dir, &context.latest, console)
    }

    fn update(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        self.fetch(dir, console)?;
        let history = GitHistory {
            adapter: self,
            dir,
            console,
        };
        ensure_reachable(&history, context.oldest(), console)?;
        self.reset_working_dir(dir, &context.latest, console)
    }

    fn check_connection(&self) -> ValidationResult {
        let result = self.remote_url().and_then(|url| {
            self.git()
                .args(["ls-remote", url.as_str()])
                .arg(format!("refs/heads/{}", self.branch))
                .run_or_bomb()
        });
        match result {
            Ok(output) if output.stdout.iter().filter(|l| !l.trim().is_empty()).count() == 1 => {
                ValidationResult::Valid
            }
            Ok(_) => ValidationResult::Invalid(format!("The branch {} could not be found.", self.branch)),
            Err(e) => ValidationResult::from_result(Err(e), &self.material),
        }
    }

    fn identity(&self) -> WorkingCopyIdentity {
        let url = self
            .remote_url()
            .map(|u| strip_password(&u))
            .unwrap_or_else(|_| strip_password(&self.url));
        WorkingCopyIdentity::new(url)
            .with_branch(self.branch.clone())
            .shallow(self.shallow_clone)
    }

    fn recorded_origin(&self, dir: &Path) -> Result<Option<WorkingCopyIdentity>> {
        if !dir.join(".git").exists() {
            return Ok(None);
        }
        let url = match self
            .git()
            .args(["config", "--get", "remote.origin.url"])
            .current_dir(dir)
            .run_or_bomb()
        {
            Ok(output) => output.output().trim().to_string(),
            Err(Error::Command { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let branch = self
            .git()
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(dir)
            .run_or_bomb()
            .ok()
            .map(|o| o.output().trim().to_string())
            .filter(|b| !b.is_empty() && b != "HEAD");
        let identity = WorkingCopyIdentity {
            url: strip_password(&url),
            branch,
            shallow: dir.join(".git").join("shallow").is_file(),
        };
        Ok(Some(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::DisabledCipher;
    use crate::material::MaterialConfig;

    fn log_output() -> String {
        format!(
            "{r}4e5a6b7c8d9e0f1a2b3c4d5e6f708192a3b4c5d6{f}Bob{f}bob@example.com{f}2024-03-01T10:00:00+00:00{f}Fix build\n\nLonger body{f}\nM\tsrc/lib.rs\nA\tdocs/new.md\nR100\told.txt\tnew.txt\n\
             {r}0123456789abcdef0123456789abcdef01234567{f}Alice{f}{f}2024-02-28T09:30:00+00:00{f}Initial{f}\nA\tREADME.md\n",
            r = RECORD,
            f = FIELD
        )
    }

    #[test]
    fn test_parse_log_records() {
        let mods = parse_log(&log_output()).unwrap();
        assert_eq!(mods.len(), 2);

        let first = &mods[0];
        assert_eq!(first.revision, Revision::scm("4e5a6b7c8d9e0f1a2b3c4d5e6f708192a3b4c5d6"));
        assert_eq!(first.user_name, "Bob");
        assert_eq!(first.email.as_deref(), Some("bob@example.com"));
        assert_eq!(first.comment, "Fix build\n\nLonger body");
        let paths: Vec<&str> = first.changed_paths().collect();
        assert_eq!(paths, vec!["src/lib.rs", "docs/new.md", "new.txt"]);
        assert_eq!(first.files[1].action, ModifiedAction::Added);

        let second = &mods[1];
        assert_eq!(second.email, None);
        assert_eq!(second.files.len(), 1);
    }

    #[test]
    fn test_parse_log_empty_output() {
        assert!(parse_log("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_log_rejects_truncated_record() {
        let truncated = format!("{}abc{}Bob", RECORD, FIELD);
        assert!(matches!(parse_log(&truncated), Err(Error::ToolOutput { .. })));
    }

    #[test]
    fn test_identity_keeps_username_drops_password() {
        let config = MaterialConfig::git("https://host/repo.git", "")
            .with_username("bob")
            .with_password("hunter2");
        let material = Material::from_config(&config, &DisabledCipher).unwrap();
        let adapter = GitAdapter::new(material, None);
        let identity = adapter.identity();
        assert_eq!(identity.url, "https://bob@host/repo.git");
        assert_eq!(identity.branch.as_deref(), Some("master"));
        assert!(!identity.shallow);
    }

    #[test]
    fn test_recorded_origin_absent_without_git_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let material =
            Material::from_config(&MaterialConfig::git("https://h/r.git", "main"), &DisabledCipher).unwrap();
        let adapter = GitAdapter::new(material, None);
        assert_eq!(adapter.recorded_origin(temp.path()).unwrap(), None);
    }
}
