use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::decision::{decide, CheckoutPlan, DiskState};
use crate::console::{ConsoleSink, TaggedConsole};
use crate::error::{Error, Result};
use crate::material::Material;
use crate::scm::{AdapterRegistry, RevisionContext, ScmAdapter};

/// What an update actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    FreshCheckout,
    Incremental,
    /// The in-place update failed and the copy was recreated.
    RecoveredWithFreshCheckout,
    /// The kind has no working copy (dependency, package).
    NothingToMaterialize,
}

/// Stable prefix for a material's console lines.
pub fn console_tag(material: &Material) -> String {
    let fingerprint = material.fingerprint();
    let short = fingerprint.get(..8).unwrap_or(fingerprint);
    format!("[{} {}]", material.kind().tag(), short)
}

/// Brings a material's working copy to a target revision.
#[derive(Clone)]
pub struct UpdateEngine {
    registry: AdapterRegistry,
    server_side: bool,
}

impl UpdateEngine {
    pub fn new(registry: AdapterRegistry) -> Self {
        Self {
            registry,
            server_side: false,
        }
    }

    /// Server-side updates ignore destination folders.
    pub fn server_side(mut self, server_side: bool) -> Self {
        self.server_side = server_side;
        self
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn working_dir(&self, material: &Material, base_dir: &Path) -> PathBuf {
        match material.destination() {
            Some(dest) if !self.server_side => base_dir.join(dest),
            _ => base_dir.to_path_buf(),
        }
    }

    /// Update `material`'s working copy under `base_dir` to `context.latest`.
    ///
    /// Errors other than unresolved secrets and cipher failures come back as
    /// [`Error::MaterialUpdate`] with a redacted message.
    pub fn update_to(
        &self,
        material: &Material,
        base_dir: &Path,
        context: &RevisionContext,
        sink: &dyn ConsoleSink,
    ) -> Result<UpdateOutcome> {
        let adapter = self
            .registry
            .adapter_for(material)
            .map_err(|e| generic_failure(material, e))?;
        if !adapter.supports_working_copy() {
            return Ok(UpdateOutcome::NothingToMaterialize);
        }
        let dir = self.working_dir(material, base_dir);
        let console = TaggedConsole::new(sink, console_tag(material), material.redactor());
        self.materialize(adapter.as_ref(), &dir, context, &console)
            .map_err(|e| generic_failure(material, e))
    }

    fn materialize(
        &self,
        adapter: &dyn ScmAdapter,
        dir: &Path,
        context: &RevisionContext,
        console: &TaggedConsole,
    ) -> Result<UpdateOutcome> {
        let material = adapter.material();
        let disk = DiskState::of(dir);
        let recorded = if disk == DiskState::Populated {
            adapter.recorded_origin(dir).unwrap_or_else(|e| {
                warn!(
                    "Could not read working copy metadata in {}: {}",
                    dir.display(),
                    console.redactor().redact(&e.to_string())
                );
                None
            })
        } else {
            None
        };

        match decide(recorded.as_ref(), &adapter.identity(), disk) {
            CheckoutPlan::Fresh(reason) => {
                console.info(&format!(
                    "Start updating {} at revision {} ({}, fresh checkout)",
                    material.display_name(),
                    context.latest,
                    reason
                ));
                fresh_checkout(adapter, dir, context, console)?;
                Ok(UpdateOutcome::FreshCheckout)
            }
            CheckoutPlan::Incremental => {
                console.info(&format!(
                    "Start updating {} at revision {}",
                    material.display_name(),
                    context.latest
                ));
                match adapter.update(dir, context, console) {
                    Ok(()) => {
                        debug!("Updated {} in place", dir.display());
                        Ok(UpdateOutcome::Incremental)
                    }
                    Err(e @ (Error::UnresolvedSecret { .. } | Error::Crypto { .. })) => Err(e),
                    Err(e) => {
                        let message = console.redactor().redact(&e.to_string());
                        warn!(
                            "Update of {} in {} failed, recreating it with a fresh checkout: {}",
                            material.display_name(),
                            dir.display(),
                            message
                        );
                        console.info(&format!("Update failed ({}), trying a fresh checkout", message));
                        fresh_checkout(adapter, dir, context, console)?;
                        Ok(UpdateOutcome::RecoveredWithFreshCheckout)
                    }
                }
            }
        }
    }
}

fn fresh_checkout(
    adapter: &dyn ScmAdapter,
    dir: &Path,
    context: &RevisionContext,
    console: &TaggedConsole,
) -> Result<()> {
    if dir.exists() {
        info!("Deleting {} for a fresh checkout", dir.display());
        fs::remove_dir_all(dir)?;
    }
    adapter.checkout(dir, context, console)
}

fn generic_failure(material: &Material, error: Error) -> Error {
    match error {
        Error::UnresolvedSecret { .. } | Error::Crypto { .. } | Error::MaterialUpdate { .. } => error,
        other => Error::MaterialUpdate {
            material: material.display_name(),
            message: material.redactor().redact(&other.to_string()),
        },
    }
}
