use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use super::{read_origin_marker, write_origin_marker, RevisionContext, ScmAdapter, ValidationResult, WorkingCopyIdentity};
use crate::command::CommandLine;
use crate::console::{NullConsole, TaggedConsole};
use crate::error::{Error, Result};
use crate::material::{Material, MaterialKind};
use crate::revision::{Modification, ModifiedAction, Revision};

/// Perforce through the `p4` command line client.
pub struct P4Adapter {
    material: Material,
    port: String,
    view: String,
    use_tickets: bool,
    timeout: Option<Duration>,
}

type ZtagRecord = BTreeMap<String, String>;

impl P4Adapter {
    pub fn new(material: Material, timeout: Option<Duration>) -> Self {
        let (port, view, use_tickets) = match material.kind() {
            MaterialKind::P4(attrs) => (attrs.port.clone(), attrs.view.clone(), attrs.use_tickets),
            other => (other.location(), String::new(), false),
        };
        Self {
            material,
            port,
            view,
            use_tickets,
            timeout,
        }
    }

    fn client_name(&self) -> String {
        let fingerprint = self.material.pipeline_unique_fingerprint();
        format!("mt-{}", &fingerprint[..fingerprint.len().min(16)])
    }

    fn p4(&self) -> Result<CommandLine> {
        let mut cmd = CommandLine::new("p4")
            .env("P4PORT", self.port.as_str())
            .env("P4CLIENT", self.client_name())
            .timeout(self.timeout)
            .redacting(&self.material.redactor());
        if let Some(user) = self.material.username() {
            cmd = cmd.env("P4USER", user);
        }
        if !self.use_tickets {
            if let Some(password) = self.material.password()? {
                cmd = cmd.secret_env("P4PASSWD", password);
            }
        }
        Ok(cmd)
    }

    fn login(&self) -> Result<()> {
        if !self.use_tickets {
            return Ok(());
        }
        let password = self.material.password()?.unwrap_or_default();
        self.p4()?.arg("login").stdin(format!("{}\n", password)).run_or_bomb()?;
        Ok(())
    }

    /// Client spec mapping the material's view into `root`.
    fn client_spec(&self, root: &Path) -> String {
        let name = self.client_name();
        let mut spec = format!(
            "Client: {}\n\nRoot: {}\n\nOptions: clobber rmdir\n\nLineEnd: local\n\nView:\n",
            name,
            root.display()
        );
        for line in client_view(&self.view, &name) {
            spec.push('\t');
            spec.push_str(&line);
            spec.push('\n');
        }
        spec
    }

    fn ensure_client(&self, root: &Path) -> Result<()> {
        self.login()?;
        self.p4()?.args(["client", "-i"]).stdin(self.client_spec(root)).run_or_bomb()?;
        Ok(())
    }

    fn ztag(&self, args: &[&str]) -> Result<Vec<ZtagRecord>> {
        let output = self
            .p4()?
            .arg("-ztag")
            .args(args.iter().copied())
            .run_or_bomb()
            .map_err(|e| self.connection_error(e))?;
        Ok(parse_ztag(&output.output()))
    }

    fn describe(&self, change: &str) -> Result<Modification> {
        let records = self.ztag(&["describe", "-s", change])?;
        let record = records.into_iter().next().ok_or_else(|| Error::ToolOutput {
            tool: "p4".to_string(),
            message: format!("no description for change {}", change),
        })?;
        modification_from_describe(&record)
    }

    fn connection_error(&self, error: Error) -> Error {
        match error {
            Error::Command { .. } | Error::CommandTimeout { .. } => Error::Connection {
                material: self.material.display_name(),
                message: self.material.redactor().redact(&error.to_string()),
            },
            other => other,
        }
    }

    fn depot_scope(&self) -> String {
        format!("//{}/...", self.client_name())
    }

    fn sync(&self, dir: &Path, change: &str, force: bool, console: &TaggedConsole) -> Result<()> {
        let mut cmd = self.p4()?.arg("sync");
        if force {
            cmd = cmd.arg("-f");
        }
        cmd.arg(format!("@{}", change)).current_dir(dir).run_or_fail(console)
    }
}

/// Rewrite each view line so its right-hand side lands in `client`.
fn client_view(view: &str, client: &str) -> Vec<String> {
    view.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut tokens: Vec<&str> = line.split_whitespace().collect();
            let depot = tokens[0];
            let unprefixed = depot.trim_start_matches(['-', '+']);
            let rhs_path = if tokens.len() > 1 {
                let rhs = tokens.pop().unwrap_or_default();
                rhs.trim_start_matches("//").split_once('/').map(|(_, p)| p).unwrap_or("")
            } else {
                unprefixed.trim_start_matches("//").split_once('/').map(|(_, p)| p).unwrap_or("")
            };
            format!("{} //{}/{}", depot, client, rhs_path)
        })
        .collect()
}

/// Parse `p4 -ztag` output into one record per blank-line separated block.
fn parse_ztag(output: &str) -> Vec<ZtagRecord> {
    let mut records = Vec::new();
    let mut current = ZtagRecord::new();
    let mut last_key: Option<String> = None;
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("... ") {
            let (key, value) = rest.split_once(' ').unwrap_or((rest, ""));
            current.insert(key.to_string(), value.to_string());
            last_key = Some(key.to_string());
        } else if line.trim().is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            last_key = None;
        } else if let Some(key) = &last_key {
            // Continuation of a multi-line value such as `desc`.
            if let Some(value) = current.get_mut(key) {
                value.push('\n');
                value.push_str(line);
            }
        }
    }
    if !current.is_empty() {
        records.push(current);
    }
    records
}

fn modification_from_describe(record: &ZtagRecord) -> Result<Modification> {
    let field = |key: &str| {
        record.get(key).cloned().ok_or_else(|| Error::ToolOutput {
            tool: "p4".to_string(),
            message: format!("describe output has no '{}'", key),
        })
    };
    let change = field("change")?;
    let seconds: i64 = field("time")?.trim().parse().map_err(|_| Error::ToolOutput {
        tool: "p4".to_string(),
        message: "non-numeric change time".to_string(),
    })?;
    let modified_time = Utc.timestamp_opt(seconds, 0).single().ok_or_else(|| Error::ToolOutput {
        tool: "p4".to_string(),
        message: format!("change time {} out of range", seconds),
    })?;
    let mut modification = Modification::new(
        Revision::scm(change),
        field("user")?,
        record.get("desc").map(|d| d.trim_end().to_string()).unwrap_or_default(),
        modified_time,
    );
    for index in 0.. {
        let Some(path) = record.get(&format!("depotFile{}", index)) else {
            break;
        };
        let action = match record.get(&format!("action{}", index)).map(String::as_str) {
            Some("add") | Some("branch") | Some("move/add") => ModifiedAction::Added,
            Some("edit") | Some("integrate") => ModifiedAction::Modified,
            Some("delete") | Some("move/delete") | Some("purge") => ModifiedAction::Deleted,
            _ => ModifiedAction::Unknown,
        };
        modification = modification.with_file(path.clone(), action);
    }
    Ok(modification)
}

impl ScmAdapter for P4Adapter {
    fn material(&self) -> &Material {
        &self.material
    }

    fn latest_modification(&self, flyweight: &Path) -> Result<Vec<Modification>> {
        fs::create_dir_all(flyweight)?;
        self.ensure_client(flyweight).map_err(|e| self.connection_error(e))?;
        let scope = self.depot_scope();
        let changes = self.ztag(&["changes", "-m1", "-s", "submitted", scope.as_str()])?;
        match changes.first().and_then(|c| c.get("change")) {
            Some(change) => Ok(vec![self.describe(change)?]),
            None => Ok(Vec::new()),
        }
    }

    fn modifications_since(&self, flyweight: &Path, revision: &Revision) -> Result<Vec<Modification>> {
        fs::create_dir_all(flyweight)?;
        self.ensure_client(flyweight).map_err(|e| self.connection_error(e))?;
        let since: u64 = revision.to_string().parse().map_err(|_| Error::Validation {
            problems: vec![format!("'{}' is not a Perforce change number", revision)],
        })?;
        let scope = format!("{}@{},#head", self.depot_scope(), since + 1);
        self.ztag(&["changes", "-s", "submitted", scope.as_str()])?
            .iter()
            .filter_map(|record| record.get("change"))
            .map(|change| self.describe(change))
            .collect()
    }

    fn checkout(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        fs::create_dir_all(dir)?;
        console.info(&format!(
            "Creating client {} for {} in {}",
            self.client_name(),
            self.material.display_name(),
            dir.display()
        ));
        self.ensure_client(dir)?;
        self.sync(dir, &context.latest.to_string(), true, console)?;
        write_origin_marker(dir, &self.identity())
    }

    fn update(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        self.ensure_client(dir)?;
        self.sync(dir, &context.latest.to_string(), false, console)
    }

    fn check_connection(&self) -> ValidationResult {
        let sink = NullConsole;
        let result = self.login().and_then(|_| self.p4()).and_then(|cmd| cmd.arg("info").run_or_fail(&sink));
        ValidationResult::from_result(result, &self.material)
    }

    fn identity(&self) -> WorkingCopyIdentity {
        WorkingCopyIdentity::new(self.port.clone()).with_branch(self.view.trim().to_string())
    }

    fn recorded_origin(&self, dir: &Path) -> Result<Option<WorkingCopyIdentity>> {
        read_origin_marker(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::DisabledCipher;
    use crate::material::{Credentials, MaterialConfig, P4Attributes};

    fn adapter(use_tickets: bool) -> P4Adapter {
        let config = MaterialConfig::new(MaterialKind::P4(P4Attributes {
            port: "perforce:1666".to_string(),
            view: "//depot/app/... //anything/app/...\n-//depot/app/tmp/... //x/app/tmp/...".to_string(),
            use_tickets,
            credentials: Credentials {
                username: Some("bob".to_string()),
                password: Some("hunter2".to_string()),
                encrypted_password: None,
            },
        }));
        P4Adapter::new(Material::from_config(&config, &DisabledCipher).unwrap(), None)
    }

    #[test]
    fn test_client_view_rewrites_right_hand_side() {
        let lines = client_view("//depot/app/... //anything/app/...\n\n//depot/lib/...", "c1");
        assert_eq!(lines, vec!["//depot/app/... //c1/app/...", "//depot/lib/... //c1/lib/..."]);
    }

    #[test]
    fn test_client_spec_uses_client_name() {
        let adapter = adapter(false);
        let spec = adapter.client_spec(Path::new("/work/app"));
        let name = adapter.client_name();
        assert!(spec.starts_with(&format!("Client: {}\n", name)));
        assert!(spec.contains("Root: /work/app"));
        assert!(spec.contains(&format!("\t-//depot/app/tmp/... //{}/app/tmp/...\n", name)));
    }

    #[test]
    fn test_parse_ztag_blocks() {
        let output = "... change 12\n... user bob\n... desc Fix\nsecond line\n\n... change 11\n... user alice\n";
        let records = parse_ztag(output);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["desc"], "Fix\nsecond line");
        assert_eq!(records[1]["user"], "alice");
    }

    #[test]
    fn test_modification_from_describe() {
        let output = "... change 12\n... user bob\n... time 1709287200\n... desc Fix build\n\n\
                      ... depotFile0 //depot/app/a.c\n... action0 edit\n... depotFile1 //depot/app/b.c\n... action1 add\n";
        let merged: ZtagRecord = parse_ztag(output).into_iter().flatten().collect();
        let modification = modification_from_describe(&merged).unwrap();
        assert_eq!(modification.revision, Revision::scm("12"));
        assert_eq!(modification.comment, "Fix build");
        assert_eq!(modification.modified_time.timestamp(), 1_709_287_200);
        assert_eq!(modification.files.len(), 2);
        assert_eq!(modification.files[1].action, ModifiedAction::Added);
    }

    #[test]
    fn test_password_is_secret_env_without_tickets() {
        let display = adapter(false).p4().unwrap().arg("info").for_display();
        assert!(!display.contains("hunter2"));
    }
}
