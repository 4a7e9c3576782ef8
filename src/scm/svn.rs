use std::fs;
use std::path::Path;
use std::time::Duration;

use super::xml::XmlDoc;
use super::{parse_timestamp, RevisionContext, ScmAdapter, ValidationResult, WorkingCopyIdentity};
use crate::command::CommandLine;
use crate::console::TaggedConsole;
use crate::error::{Error, Result};
use crate::material::{Material, MaterialKind};
use crate::redact::strip_password;
use crate::revision::{Modification, ModifiedAction, Revision};

/// Subversion through the `svn` command line client.
///
/// Polling talks to the repository directly, so no flyweight is kept.
pub struct SvnAdapter {
    material: Material,
    url: String,
    check_externals: bool,
    timeout: Option<Duration>,
}

impl SvnAdapter {
    pub fn new(material: Material, timeout: Option<Duration>) -> Self {
        let (url, check_externals) = match material.kind() {
            MaterialKind::Svn(attrs) => (attrs.url.clone(), attrs.check_externals),
            other => (other.location(), false),
        };
        Self {
            material,
            url,
            check_externals,
            timeout,
        }
    }

    fn svn(&self) -> Result<CommandLine> {
        let mut cmd = CommandLine::new("svn")
            .arg("--non-interactive")
            .timeout(self.timeout)
            .redacting(&self.material.redactor());
        if let Some(username) = self.material.username() {
            cmd = cmd.args(["--username", username]);
        }
        if let Some(password) = self.material.password()? {
            cmd = cmd.args(["--password"]).secret_arg(password).arg("--no-auth-cache");
        }
        Ok(cmd)
    }

    fn log(&self, range: &[&str]) -> Result<Vec<Modification>> {
        let output = self
            .svn()?
            .args(["log", "--xml", "-v"])
            .args(range.iter().copied())
            .arg(&self.url)
            .run_or_bomb()
            .map_err(|e| self.connection_error(e))?;
        parse_log(&output.output())
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
}

fn revision_number(revision: &Revision) -> Result<u64> {
    match revision {
        Revision::Svn(number) => Ok(*number),
        Revision::Scm(raw) => raw.parse().map_err(|_| Error::Validation {
            problems: vec![format!("'{}' is not a Subversion revision", raw)],
        }),
        other => Err(Error::Validation {
            problems: vec![format!("'{}' is not a Subversion revision", other)],
        }),
    }
}

/// Parse `svn log --xml -v` output, newest-first as svn reports it.
fn parse_log(xml: &str) -> Result<Vec<Modification>> {
    let doc = XmlDoc::parse(xml, "svn")?;
    let mut modifications = Vec::new();
    for entry in doc.children(doc.root(), "logentry") {
        let number: u64 = doc
            .required_attribute(entry, "revision")?
            .parse()
            .map_err(|_| Error::ToolOutput {
                tool: "svn".to_string(),
                message: "non-numeric revision".to_string(),
            })?;
        let date = doc.child_text(entry, "date").unwrap_or_default();
        let mut modification = Modification::new(
            Revision::Svn(number),
            doc.child_text(entry, "author").unwrap_or_default(),
            doc.child_text(entry, "msg").unwrap_or_default(),
            parse_timestamp(&date, "svn")?,
        );
        for path in doc.descendants(entry, "path") {
            let action = doc.attribute(path, "action").unwrap_or_default();
            modification = modification.with_file(doc.text(path), ModifiedAction::from_status_letter(&action));
        }
        modifications.push(modification);
    }
    Ok(modifications)
}

/// Parse `svn info --xml` and return the entry URL.
fn parse_info_url(xml: &str) -> Result<String> {
    let doc = XmlDoc::parse(xml, "svn")?;
    doc.child(doc.root(), "entry")
        .and_then(|entry| doc.child_text(entry, "url"))
        .map(|url| url.trim().to_string())
        .ok_or_else(|| Error::ToolOutput {
            tool: "svn".to_string(),
            message: "svn info has no entry url".to_string(),
        })
}

/// Parse `svn propget --xml -R svn:externals` into `(folder, url)` pairs,
/// with folders relative to `base_url`.
fn parse_externals(xml: &str, base_url: &str) -> Result<Vec<(String, String)>> {
    let doc = XmlDoc::parse(xml, "svn")?;
    let base = base_url.trim_end_matches('/');
    let mut externals = Vec::new();
    for target in doc.children(doc.root(), "target") {
        let target_path = doc.attribute(target, "path").unwrap_or_default();
        let prefix = target_path
            .trim_end_matches('/')
            .strip_prefix(base)
            .unwrap_or("")
            .trim_matches('/')
            .to_string();
        for property in doc.children(target, "property") {
            if doc.attribute(property, "name").as_deref() != Some("svn:externals") {
                continue;
            }
            for line in doc.text(property).lines() {
                if let Some((folder, url)) = parse_external_definition(line) {
                    let folder = if prefix.is_empty() {
                        folder
                    } else {
                        format!("{}/{}", prefix, folder)
                    };
                    externals.push((folder, url));
                }
            }
        }
    }
    Ok(externals)
}

/// One `svn:externals` line, in either `dir URL` or `URL dir` form.
fn parse_external_definition(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut tokens = Vec::new();
    let mut words = line.split_whitespace();
    while let Some(word) = words.next() {
        if word == "-r" {
            words.next();
        } else if !word.starts_with("-r") {
            tokens.push(word);
        }
    }
    if tokens.len() < 2 {
        return None;
    }
    let (first, last) = (tokens[0], tokens[tokens.len() - 1]);
    let (folder, url) = if first.contains("://") { (last, first) } else { (first, last) };
    if !url.contains("://") {
        return None;
    }
    // A trailing `@REV` is a peg revision; an `@` before the path is userinfo.
    let url = match url.rsplit_once('@') {
        Some((head, peg)) if !peg.contains('/') => head,
        _ => url,
    };
    Some((folder.to_string(), url.to_string()))
}

impl ScmAdapter for SvnAdapter {
    fn material(&self) -> &Material {
        &self.material
    }

    fn latest_modification(&self, _flyweight: &Path) -> Result<Vec<Modification>> {
        let mut latest = self.log(&["--limit", "1"])?;
        latest.truncate(1);
        Ok(latest)
    }

    fn modifications_since(&self, _flyweight: &Path, revision: &Revision) -> Result<Vec<Modification>> {
        let since = revision_number(revision)?;
        let range = format!("HEAD:{}", since);
        let modifications = self.log(&["-r", &range])?;
        Ok(modifications
            .into_iter()
            .filter(|m| matches!(m.revision, Revision::Svn(n) if n > since))
            .collect())
    }

    fn checkout(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent)?;
        }
        let revision = revision_number(&context.latest)?;
        console.info(&format!("Checking out {} at r{}", self.material.display_name(), revision));
        self.svn()?
            .args(["checkout", "-r"])
            .arg(revision.to_string())
            .arg(&self.url)
            .arg(dir.to_string_lossy())
            .run_or_fail(console)
    }

    fn update(&self, dir: &Path, context: &RevisionContext, console: &TaggedConsole) -> Result<()> {
        let revision = revision_number(&context.latest)?;
        console.info(&format!("Cleaning up and reverting {}", dir.display()));
        self.svn()?.arg("cleanup").arg(dir.to_string_lossy()).run_or_fail(console)?;
        self.svn()?
            .args(["revert", "--recursive"])
            .arg(dir.to_string_lossy())
            .run_or_fail(console)?;
        self.svn()?
            .args(["update", "-r"])
            .arg(revision.to_string())
            .arg(dir.to_string_lossy())
            .run_or_fail(console)
    }

    fn check_connection(&self) -> ValidationResult {
        let result = self
            .svn()
            .and_then(|cmd| cmd.args(["info", "--xml"]).arg(&self.url).run_or_bomb())
            .map(|_| ());
        ValidationResult::from_result(result, &self.material)
    }

    fn identity(&self) -> WorkingCopyIdentity {
        WorkingCopyIdentity::new(strip_password(&self.url))
    }

    fn recorded_origin(&self, dir: &Path) -> Result<Option<WorkingCopyIdentity>> {
        if !dir.join(".svn").exists() {
            return Ok(None);
        }
        match self
            .svn()?
            .args(["info", "--xml"])
            .arg(dir.to_string_lossy())
            .run_or_bomb()
        {
            Ok(output) => {
                let url = parse_info_url(&output.output())?;
                Ok(Some(WorkingCopyIdentity::new(strip_password(&url))))
            }
            Err(Error::Command { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn externals(&self) -> Result<Vec<Material>> {
        if !self.check_externals {
            return Ok(Vec::new());
        }
        let output = self
            .svn()?
            .args(["propget", "--xml", "-R", "svn:externals"])
            .arg(&self.url)
            .run_or_bomb()
            .map_err(|e| self.connection_error(e))?;
        parse_externals(&output.output(), &self.url)?
            .into_iter()
            .map(|(folder, url)| self.material.for_external(&folder, &url))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<log>
<logentry revision="12">
<author>bob</author>
<date>2024-03-01T10:00:00.123456Z</date>
<paths>
<path action="M" kind="file">/trunk/src/main.c</path>
<path action="A" kind="file">/trunk/docs/notes.txt</path>
</paths>
<msg>Fix the thing</msg>
</logentry>
<logentry revision="11">
<author>alice</author>
<date>2024-02-29T09:00:00.000000Z</date>
<paths>
<path action="D" kind="file">/trunk/old.c</path>
</paths>
<msg></msg>
</logentry>
</log>"#;

    #[test]
    fn test_parse_log() {
        let mods = parse_log(LOG).unwrap();
        assert_eq!(mods.len(), 2);
        assert_eq!(mods[0].revision, Revision::Svn(12));
        assert_eq!(mods[0].user_name, "bob");
        assert_eq!(mods[0].comment, "Fix the thing");
        assert_eq!(mods[0].files.len(), 2);
        assert_eq!(mods[0].files[0].path, "/trunk/src/main.c");
        assert_eq!(mods[0].files[1].action, ModifiedAction::Added);
        assert_eq!(mods[1].files[0].action, ModifiedAction::Deleted);
        assert_eq!(mods[1].comment, "");
    }

    #[test]
    fn test_parse_info_url() {
        let xml = r#"<?xml version="1.0"?><info><entry kind="dir" path="." revision="12">
<url>http://host/svn/trunk</url><repository><root>http://host/svn</root></repository></entry></info>"#;
        assert_eq!(parse_info_url(xml).unwrap(), "http://host/svn/trunk");
    }

    #[test]
    fn test_parse_externals_both_formats() {
        let xml = r#"<?xml version="1.0"?>
<properties>
<target path="http://host/svn/trunk">
<property name="svn:externals">lib http://host/svn/lib
http://host/svn/tools@42 build/tools
-r 7 pinned http://host/svn/pinned
# a comment
</property>
</target>
<target path="http://host/svn/trunk/sub">
<property name="svn:externals">vendor http://host/svn/vendor</property>
</target>
</properties>"#;
        let externals = parse_externals(xml, "http://host/svn/trunk").unwrap();
        assert_eq!(
            externals,
            vec![
                ("lib".to_string(), "http://host/svn/lib".to_string()),
                ("build/tools".to_string(), "http://host/svn/tools".to_string()),
                ("pinned".to_string(), "http://host/svn/pinned".to_string()),
                ("sub/vendor".to_string(), "http://host/svn/vendor".to_string()),
            ]
        );
    }

    #[test]
    fn test_relative_externals_are_skipped() {
        assert_eq!(parse_external_definition("lib ^/shared/lib"), None);
        assert_eq!(parse_external_definition(""), None);
    }

    #[test]
    fn test_revision_number() {
        assert_eq!(revision_number(&Revision::Svn(5)).unwrap(), 5);
        assert_eq!(revision_number(&Revision::scm("17")).unwrap(), 17);
        assert!(revision_number(&Revision::scm("abc")).is_err());
    }
}
