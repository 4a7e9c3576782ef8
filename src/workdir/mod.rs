//! # Working-Directory Update Engine
//!
//! Materializes a material's working copy at a target revision.
//!
//! 1. The working directory is the pipeline's base directory joined with the
//!    material's destination folder (server-side updates use the base
//!    directory itself).
//! 2. The adapter reports the origin recorded by whatever is on disk, and
//!    [`decide`] compares it with the material's current identity. Any
//!    mismatch, or no working copy at all, means delete and check out fresh.
//!    Otherwise the adapter updates in place, and a failed in-place update
//!    falls back to a fresh checkout with a logged warning.
//! 3. Adapters with shallow history call [`ensure_reachable`] before moving
//!    the working tree so the oldest revision of the trigger snapshot exists
//!    locally.
//!
//! Console output is prefixed with [`console_tag`] and redacted.

mod decision;
mod engine;
mod shallow;

pub use decision::{decide, origin_matches, CheckoutPlan, DiskState, FreshReason};
pub use engine::{console_tag, UpdateEngine, UpdateOutcome};
pub use shallow::{ensure_reachable, ShallowHistory, UNSHALLOW_STEP};
