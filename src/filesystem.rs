//! In-memory file tree handed to configuration parsers

use crate::error::{Error, Result};
use crate::scm::ORIGIN_MARKER;
use glob::{MatchOptions, Pattern};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Source-control metadata directories never loaded from a working copy.
const SKIP_DIRS: &[&str] = &[".git", ".svn", ".hg", "$tf", ".tf"];

/// A file with content and metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub content: Vec<u8>,
    pub modified_time: SystemTime,
}

impl File {
    pub fn new(content: Vec<u8>) -> Self {
        Self {
            content,
            modified_time: SystemTime::UNIX_EPOCH,
        }
    }

    pub fn from_string(content: &str) -> Self {
        Self::new(content.as_bytes().to_vec())
    }

    /// Content as UTF-8, failing for binary files.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.content).map_err(|e| Error::Filesystem {
            message: format!("File is not valid UTF-8: {}", e),
        })
    }
}

/// In-memory file tree keyed by relative path, iterated in path order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryFS {
    files: BTreeMap<PathBuf, File>,
}

impl MemoryFS {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every regular file under `root`, skipping source-control metadata.
    pub fn load_dir(root: &Path) -> Result<Self> {
        let mut fs = Self::new();
        if !root.is_dir() {
            return Err(Error::Filesystem {
                message: format!("Not a directory: {}", root.display()),
            });
        }
        for entry in walkdir::WalkDir::new(root)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !SKIP_DIRS.contains(&e.file_name().to_str().unwrap_or(""))
            })
        {
            let entry = entry.map_err(|e| Error::Filesystem {
                message: format!("Failed to walk {}: {}", root.display(), e),
            })?;
            if !entry.file_type().is_file() || entry.file_name().to_str() == Some(ORIGIN_MARKER) {
                continue;
            }
            let relative = entry.path().strip_prefix(root).map_err(|_| Error::Filesystem {
                message: format!("Failed to make path relative: {}", entry.path().display()),
            })?;
            let metadata = entry.metadata().map_err(|e| Error::Filesystem {
                message: format!("Failed to stat {}: {}", entry.path().display(), e),
            })?;
            let file = File {
                content: std::fs::read(entry.path())?,
                modified_time: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            };
            fs.add_file(relative, file);
        }
        Ok(fs)
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, path: P, file: File) {
        self.files.insert(path.as_ref().to_path_buf(), file);
    }

    pub fn add_file_string<P: AsRef<Path>>(&mut self, path: P, content: &str) {
        self.add_file(path, File::from_string(content));
    }

    pub fn get_file<P: AsRef<Path>>(&self, path: P) -> Option<&File> {
        self.files.get(path.as_ref())
    }

    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        self.files.contains_key(path.as_ref())
    }

    /// All paths in sorted order
    pub fn list_files(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    /// Paths matching any of the glob patterns, sorted. `*` does not cross
    /// directory separators; use `**/` to match at any depth.
    pub fn list_files_glob(&self, patterns: &[&str]) -> Result<Vec<PathBuf>> {
        let compiled = patterns
            .iter()
            .map(|p| Pattern::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let options = MatchOptions {
            require_literal_separator: true,
            ..MatchOptions::default()
        };
        Ok(self
            .files
            .keys()
            .filter(|path| compiled.iter().any(|p| p.matches_path_with(path, options)))
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &File)> {
        self.files.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_dir_skips_vcs_metadata_and_marker() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        std::fs::create_dir_all(root.join("pipelines")).unwrap();
        std::fs::write(root.join("pipelines/build.pipeline.yaml"), "name: build").unwrap();
        std::fs::write(root.join("README.md"), "hello").unwrap();
        std::fs::write(root.join(ORIGIN_MARKER), "{}").unwrap();

        let fs = MemoryFS::load_dir(root).unwrap();
        assert_eq!(
            fs.list_files(),
            vec![PathBuf::from("README.md"), PathBuf::from("pipelines/build.pipeline.yaml")]
        );
        assert_eq!(fs.get_file("README.md").unwrap().as_str().unwrap(), "hello");
    }

    #[test]
    fn test_load_dir_requires_directory() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            MemoryFS::load_dir(&temp.path().join("missing")),
            Err(Error::Filesystem { .. })
        ));
    }

    #[test]
    fn test_list_files_glob() {
        let mut fs = MemoryFS::new();
        fs.add_file_string("a.pipeline.yaml", "");
        fs.add_file_string("nested/b.pipeline.yml", "");
        fs.add_file_string("nested/prod.env.yaml", "");
        fs.add_file_string("notes.yaml", "");

        let top = fs.list_files_glob(&["*.pipeline.yaml"]).unwrap();
        assert_eq!(top, vec![PathBuf::from("a.pipeline.yaml")]);

        let all = fs
            .list_files_glob(&["**/*.pipeline.yaml", "**/*.pipeline.yml", "**/*.env.yaml"])
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(fs.list_files_glob(&["["]).is_err());
    }
}
