//! Shared test utilities for integration and E2E tests.
//!
//! Add `mod common;` to a test file, then `use common::prelude::*;`.
//! Tests that shell out to a real `git` are gated on the
//! `integration-tests` feature:
//!
//! ```bash
//! cargo test --features integration-tests
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;

use assert_fs::prelude::*;

#[allow(unused_imports)]
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::configs;
    #[allow(unused_imports)]
    pub use super::GitRepo;
    pub use super::TestFixture;
}

/// Server configuration snippets.
#[allow(dead_code)]
pub mod configs {
    pub const EMPTY: &str = "pipelines: []\n";

    pub const INVALID_YAML: &str = "pipelines: [unclosed";

    /// Two SCM materials without destination folders.
    pub const MISSING_DESTINATIONS: &str = r#"
pipelines:
  - name: build
    materials:
      - type: git
        url: https://example.com/a.git
        branch: main
      - type: git
        url: https://example.com/b.git
        branch: main
"#;

    /// An upstream-pipeline material; nothing provides pipeline history to
    /// the CLI so its check always fails.
    pub const DEPENDENCY_ONLY: &str = r#"
pipelines:
  - name: deploy
    materials:
      - type: dependency
        pipeline: build
        stage: test
"#;

    /// One pipeline with one git material at `url`.
    pub fn single_git(url: &str) -> String {
        format!(
            "pipelines:\n  - name: build\n    materials:\n      - type: git\n        name: app\n        url: {}\n        branch: main\n",
            url
        )
    }

    /// No pipelines, one config-repo at `url`.
    pub fn config_repo(url: &str) -> String {
        format!(
            "pipelines: []\nconfig_repos:\n  - id: infra\n    material:\n      type: git\n      url: {}\n      branch: main\n",
            url
        )
    }
}

/// Temporary directory holding a `material-tracker.yaml` and a working dir.
#[allow(dead_code)]
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

#[allow(dead_code)]
impl TestFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn with_config(self, content: &str) -> Self {
        self.temp_dir
            .child("material-tracker.yaml")
            .write_str(content)
            .expect("Failed to write config file");
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.temp_dir.path().join("material-tracker.yaml")
    }

    /// Value for `MATERIAL_TRACKER_HOME` so nothing lands in the user's
    /// data directory.
    pub fn home(&self) -> PathBuf {
        self.temp_dir.path().join("home")
    }

    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }
}

/// A local git repository driven through the `git` binary.
#[allow(dead_code)]
pub struct GitRepo {
    dir: PathBuf,
}

#[allow(dead_code)]
impl GitRepo {
    /// Empty repository whose unborn branch is `main`.
    pub fn init(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).expect("Failed to create repository dir");
        let repo = Self { dir: dir.to_path_buf() };
        repo.git(&["init", "-q"]);
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        repo
    }

    pub fn url(&self) -> String {
        self.dir.display().to_string()
    }

    /// Write `files` and commit them; returns the new head.
    pub fn commit(&self, message: &str, files: &[(&str, &str)]) -> String {
        for (path, content) in files {
            let path = self.dir.join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create parent dir");
            }
            std::fs::write(path, content).expect("Failed to write file");
        }
        self.git(&["add", "-A"]);
        self.git(&["commit", "-q", "-m", message]);
        self.head()
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"]).trim().to_string()
    }

    fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.dir)
            .output()
            .expect("Failed to run git");
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).to_string()
    }
}
