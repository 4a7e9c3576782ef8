//! In-process cache of config-repo parse results

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::partial::{ParseResult, PartialConfig};
use crate::error::{Error, Result};
use crate::revision::Revision;

/// Parse results keyed by material fingerprint
#[derive(Debug, Clone, Default)]
pub struct ParseResultCache {
    results: Arc<Mutex<HashMap<String, ParseResult>>>,
}

impl ParseResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ParseResult>>> {
        self.results
            .lock()
            .map_err(|_| Error::poisoned("config-repo parse cache"))
    }

    pub fn get(&self, fingerprint: &str) -> Result<Option<ParseResult>> {
        Ok(self.lock()?.get(fingerprint).cloned())
    }

    /// Whether `revision` already parsed successfully for `fingerprint`
    pub fn has_successful_parse(&self, fingerprint: &str, revision: &Revision) -> Result<bool> {
        Ok(self
            .lock()?
            .get(fingerprint)
            .map(|r| r.is_success() && &r.revision == revision)
            .unwrap_or(false))
    }

    pub fn record_success(&self, fingerprint: &str, revision: Revision, partial: PartialConfig) -> Result<ParseResult> {
        let result = ParseResult::success(revision, partial);
        self.lock()?.insert(fingerprint.to_string(), result.clone());
        Ok(result)
    }

    /// Record a failed attempt, carrying over the last good partial
    pub fn record_failure(&self, fingerprint: &str, revision: Revision, error: &str) -> Result<ParseResult> {
        let mut results = self.lock()?;
        let result = ParseResult::failure(results.get(fingerprint), revision, error);
        results.insert(fingerprint.to_string(), result.clone());
        Ok(result)
    }

    /// Last good partial for `fingerprint`, if any parse ever succeeded
    pub fn last_good(&self, fingerprint: &str) -> Result<Option<(Revision, PartialConfig)>> {
        Ok(self.lock()?.get(fingerprint).and_then(|r| r.last_good.clone()))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_repo::partial::PipelineDefinition;

    fn partial(name: &str) -> PartialConfig {
        PartialConfig::new().with_pipeline(PipelineDefinition {
            name: name.to_string(),
            group: None,
            materials: Vec::new(),
            stages: Vec::new(),
        })
    }

    #[test]
    fn test_failure_never_regresses_to_no_config() {
        let cache = ParseResultCache::new();
        cache.record_success("fp", Revision::scm("r1"), partial("build")).unwrap();
        let failed = cache.record_failure("fp", Revision::scm("r2"), "broken").unwrap();

        assert_eq!(failed.error.as_deref(), Some("broken"));
        assert_eq!(cache.last_good("fp").unwrap().unwrap().1, partial("build"));

        // A second failure still carries the original good partial.
        cache.record_failure("fp", Revision::scm("r3"), "still broken").unwrap();
        assert_eq!(cache.last_good("fp").unwrap().unwrap().0, Revision::scm("r1"));
    }

    #[test]
    fn test_has_successful_parse() {
        let cache = ParseResultCache::new();
        assert!(!cache.has_successful_parse("fp", &Revision::scm("r1")).unwrap());
        cache.record_success("fp", Revision::scm("r1"), partial("build")).unwrap();
        assert!(cache.has_successful_parse("fp", &Revision::scm("r1")).unwrap());
        assert!(!cache.has_successful_parse("fp", &Revision::scm("r2")).unwrap());
        cache.record_failure("fp", Revision::scm("r1"), "transient").unwrap();
        assert!(!cache.has_successful_parse("fp", &Revision::scm("r1")).unwrap());
    }

    #[test]
    fn test_cache_operations() {
        let cache = ParseResultCache::default();
        assert!(cache.is_empty().unwrap());
        cache.record_failure("fp", Revision::scm("r1"), "broken").unwrap();
        assert_eq!(cache.len().unwrap(), 1);
        assert!(cache.last_good("fp").unwrap().is_none());
        cache.clear().unwrap();
        assert!(cache.get("fp").unwrap().is_none());
    }
}
