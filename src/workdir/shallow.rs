use crate::console::TaggedConsole;
use crate::error::Result;
use crate::revision::Revision;

/// First deepening step before falling back to the full history.
pub const UNSHALLOW_STEP: usize = 100;

/// Local history of a working copy that may have been cloned shallow.
pub trait ShallowHistory {
    fn is_shallow(&self) -> bool;

    fn contains_revision(&self, revision: &Revision) -> Result<bool>;

    /// Deepen to `depth` commits, or to the full history for `None`.
    fn unshallow(&self, depth: Option<usize>) -> Result<()>;
}

/// Deepen a shallow history until `revision` is reachable.
///
/// Tries [`UNSHALLOW_STEP`] first and only fetches everything if that is not
/// enough.
pub fn ensure_reachable(history: &dyn ShallowHistory, revision: &Revision, console: &TaggedConsole) -> Result<()> {
    if !history.is_shallow() || history.contains_revision(revision)? {
        return Ok(());
    }
    console.info(&format!("Revision {} is not in the shallow history, deepening", revision));
    history.unshallow(Some(UNSHALLOW_STEP))?;
    if history.contains_revision(revision)? {
        return Ok(());
    }
    history.unshallow(None)
}
