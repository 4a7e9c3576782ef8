//! Path ignore filter
//!
//! Patterns are globs relative to the repository root, with `/` treated as a
//! literal separator so `*.md` only matches top-level files and `**/*.md`
//! matches at any depth. A leading `/` on either the pattern or the path is
//! ignored because Subversion reports repository-absolute paths.

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::Result;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Trigger only on paths the patterns call out, instead of ignoring them.
    #[serde(default)]
    pub invert: bool,
}

impl Filter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignore: patterns.into_iter().map(Into::into).collect(),
            invert: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ignore.is_empty()
    }

    /// Compile the patterns, failing on the first invalid one.
    pub fn compile(&self) -> Result<CompiledFilter> {
        let patterns = self
            .ignore
            .iter()
            .map(|p| Pattern::new(p.trim_start_matches('/')))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(CompiledFilter {
            patterns,
            invert: self.invert,
        })
    }
}

/// A filter whose patterns have been parsed.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    patterns: Vec<Pattern>,
    invert: bool,
}

impl CompiledFilter {
    pub fn matches(&self, path: &str) -> bool {
        let path = path.trim_start_matches('/');
        self.patterns
            .iter()
            .any(|p| p.matches_with(path, MATCH_OPTIONS))
    }

    /// Whether a change touching exactly `paths` should be ignored.
    ///
    /// Without `invert`, the change is ignored when every path matches. With
    /// `invert`, it is ignored when no path matches. An empty path list is
    /// ignored either way.
    pub fn should_ignore(&self, paths: &[&str]) -> bool {
        if self.invert {
            paths.iter().all(|p| !self.matches(p))
        } else {
            paths.iter().all(|p| self.matches(p))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_glob_relative_to_root() {
        let filter = Filter::new(["docs/**", "*.md"]).compile().unwrap();
        assert!(filter.matches("docs/guide/intro.txt"));
        assert!(filter.matches("/docs/a.txt"));
        assert!(filter.matches("README.md"));
        assert!(!filter.matches("src/README.md"));
        assert!(!filter.matches("src/main.rs"));
    }

    #[test]
    fn test_ignore_only_when_every_path_matches() {
        let filter = Filter::new(["docs/**"]).compile().unwrap();
        assert!(filter.should_ignore(&["docs/a.md", "docs/b.md"]));
        assert!(!filter.should_ignore(&["docs/a.md", "src/lib.rs"]));
    }

    #[test]
    fn test_invert_triggers_only_on_called_out_paths() {
        let filter = Filter::new(["docs/**"]).inverted().compile().unwrap();
        assert!(!filter.should_ignore(&["docs/a.md"]));
        assert!(!filter.should_ignore(&["docs/a.md", "src/lib.rs"]));
        assert!(filter.should_ignore(&["src/lib.rs"]));
    }

    #[test]
    fn test_empty_path_list_is_ignored_in_both_modes() {
        let plain = Filter::new(["docs/**"]).compile().unwrap();
        let inverted = Filter::new(["docs/**"]).inverted().compile().unwrap();
        assert!(plain.should_ignore(&[]));
        assert!(inverted.should_ignore(&[]));
    }

    #[test]
    fn test_empty_filter_never_ignores_real_changes() {
        let filter = Filter::default().compile().unwrap();
        assert!(!filter.should_ignore(&["src/lib.rs"]));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(Filter::new(["src/[unclosed"]).compile().is_err());
    }
}
