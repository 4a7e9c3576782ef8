//! Fresh checkout or incremental update
//!
//! The decision is a pure function of what the working copy says about
//! itself, what the material currently is, and what is on disk. Everything
//! with side effects lives in the engine.

use std::fmt;
use std::path::Path;

use crate::material::same_origin_url;
use crate::scm::WorkingCopyIdentity;

/// What the target directory looks like before an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskState {
    Missing,
    Empty,
    Populated,
}

impl DiskState {
    pub fn of(dir: &Path) -> Self {
        if !dir.exists() {
            return DiskState::Missing;
        }
        match std::fs::read_dir(dir).map(|mut entries| entries.next().is_none()) {
            Ok(true) => DiskState::Empty,
            Ok(false) => DiskState::Populated,
            // Unreadable counts as populated so it gets recreated.
            Err(_) => DiskState::Populated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshReason {
    NoWorkingCopy,
    NotAWorkingCopy,
    UrlChanged,
    BranchChanged,
    DepthChanged,
}

impl fmt::Display for FreshReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FreshReason::NoWorkingCopy => "no working copy yet",
            FreshReason::NotAWorkingCopy => "directory is not a working copy",
            FreshReason::UrlChanged => "source URL changed",
            FreshReason::BranchChanged => "branch changed",
            FreshReason::DepthChanged => "shallow clone is no longer wanted",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutPlan {
    Fresh(FreshReason),
    Incremental,
}

fn mismatch(recorded: &WorkingCopyIdentity, current: &WorkingCopyIdentity) -> Option<FreshReason> {
    if !same_origin_url(&recorded.url, &current.url) {
        return Some(FreshReason::UrlChanged);
    }
    if current.branch.is_some() && recorded.branch != current.branch {
        return Some(FreshReason::BranchChanged);
    }
    // A full clone may serve a shallow material, but not the reverse.
    if recorded.shallow && !current.shallow {
        return Some(FreshReason::DepthChanged);
    }
    None
}

/// Whether a recorded origin can be reused for `current`.
pub fn origin_matches(recorded: &WorkingCopyIdentity, current: &WorkingCopyIdentity) -> bool {
    mismatch(recorded, current).is_none()
}

pub fn decide(
    recorded: Option<&WorkingCopyIdentity>,
    current: &WorkingCopyIdentity,
    disk: DiskState,
) -> CheckoutPlan {
    match (disk, recorded) {
        (DiskState::Missing | DiskState::Empty, _) => CheckoutPlan::Fresh(FreshReason::NoWorkingCopy),
        (DiskState::Populated, None) => CheckoutPlan::Fresh(FreshReason::NotAWorkingCopy),
        (DiskState::Populated, Some(recorded)) => match mismatch(recorded, current) {
            Some(reason) => CheckoutPlan::Fresh(reason),
            None => CheckoutPlan::Incremental,
        },
    }
}
