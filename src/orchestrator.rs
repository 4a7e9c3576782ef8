//! # Update Orchestration
//!
//! Schedules material updates on a worker pool while guaranteeing that a
//! fingerprint never has two updates in flight.
//!
//! ## Gate
//!
//! [`UpdateGate`] holds the fingerprint → start-time map. `try_begin` is the
//! compare-and-set transition `Idle → InProgress`; `finish` moves back to
//! `Idle`. Reads (`is_in_progress`, `hung`) take a shared lock and can run
//! alongside updates.
//!
//! ## Service
//!
//! [`MaterialUpdateService::request_update`] passes through the gate, then
//! runs the [`MaterialUpdater`] on a `rayon` pool. The gate is released as
//! soon as the updater returns; completion listeners run afterwards as a
//! separate pool task so slow listeners (config-repo parsing) never hold a
//! fingerprint in progress. Skipped work (already in progress, or cancelled
//! before it started) never reaches listeners. Every finished update carries
//! a sequence number taken before the gate is released, so listeners can
//! tell a late event from a newer one for the same fingerprint.
//!
//! A panicking updater is reported as a failed update and a panicking
//! listener is logged; neither leaves a fingerprint stuck in progress.
//!
//! ## Poller
//!
//! A plain thread ticking on `recv_timeout` requests updates for every
//! auto-update material and warns about hung fingerprints. Manual
//! [`MaterialUpdateService::check_now`] uses the same gate.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::material::Material;
use crate::persistence::MaterialRepository;
use crate::revision::Modification;
use crate::revisions::ModificationSource;

/// Fingerprint → in-progress-since map.
#[derive(Debug, Default)]
pub struct UpdateGate {
    in_progress: RwLock<HashMap<String, Instant>>,
}

impl UpdateGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `fingerprint` in progress. `false` if it already was.
    pub fn try_begin(&self, fingerprint: &str) -> Result<bool> {
        let mut map = self
            .in_progress
            .write()
            .map_err(|_| Error::poisoned("update gate"))?;
        if map.contains_key(fingerprint) {
            return Ok(false);
        }
        map.insert(fingerprint.to_string(), Instant::now());
        Ok(true)
    }

    pub fn finish(&self, fingerprint: &str) -> Result<()> {
        self.in_progress
            .write()
            .map_err(|_| Error::poisoned("update gate"))?
            .remove(fingerprint);
        Ok(())
    }

    pub fn is_in_progress(&self, fingerprint: &str) -> bool {
        match self.in_progress.read() {
            Ok(map) => map.contains_key(fingerprint),
            Err(poisoned) => poisoned.into_inner().contains_key(fingerprint),
        }
    }

    pub fn in_progress_count(&self) -> usize {
        match self.in_progress.read() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Fingerprints in progress for longer than `threshold`, sorted.
    pub fn hung(&self, threshold: Duration) -> Vec<String> {
        let now = Instant::now();
        let collect = |map: &HashMap<String, Instant>| {
            let mut hung: Vec<String> = map
                .iter()
                .filter(|(_, started)| now.duration_since(**started) > threshold)
                .map(|(fp, _)| fp.clone())
                .collect();
            hung.sort();
            hung
        };
        match self.in_progress.read() {
            Ok(map) => collect(&map),
            Err(poisoned) => collect(&poisoned.into_inner()),
        }
    }
}

/// What one finished update found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub latest: Option<Modification>,
    pub new_modifications: usize,
}

/// Delivered to listeners once per finished update, successful or not.
#[derive(Debug, Clone)]
pub struct UpdateCompleted {
    pub material: Material,
    /// Completion order across the service; increases per fingerprint.
    pub sequence: u64,
    /// Redacted failure message on error.
    pub result: std::result::Result<UpdateReport, String>,
}

impl UpdateCompleted {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// The unit of work run for one material.
pub trait MaterialUpdater: Send + Sync {
    fn update(&self, material: &Material) -> Result<UpdateReport>;
}

pub trait UpdateListener: Send + Sync {
    fn on_update_completed(&self, event: &UpdateCompleted);
}

/// Polls a material and stores anything new in the repository.
pub struct PollingUpdater {
    source: Arc<dyn ModificationSource>,
    repository: Arc<dyn MaterialRepository>,
}

impl PollingUpdater {
    pub fn new(source: Arc<dyn ModificationSource>, repository: Arc<dyn MaterialRepository>) -> Self {
        Self { source, repository }
    }
}

impl MaterialUpdater for PollingUpdater {
    fn update(&self, material: &Material) -> Result<UpdateReport> {
        self.repository.save_material_instance(material)?;
        let fingerprint = material.fingerprint();
        let found = match self.repository.latest_modification(fingerprint)? {
            Some(known) => self.source.since(material, &known.revision)?,
            None => self.source.latest(material)?,
        };
        let new_modifications = found.len();
        if new_modifications > 0 {
            self.repository.save_modifications(fingerprint, found)?;
        }
        Ok(UpdateReport {
            latest: self.repository.latest_modification(fingerprint)?,
            new_modifications,
        })
    }
}

/// Outcome of a request; neither variant is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateRequest {
    Scheduled,
    AlreadyInProgress,
    ShuttingDown,
}

struct Poller {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Gate plus worker pool plus listeners.
pub struct MaterialUpdateService {
    gate: Arc<UpdateGate>,
    pool: Arc<rayon::ThreadPool>,
    updater: Arc<dyn MaterialUpdater>,
    listeners: Arc<RwLock<Vec<Arc<dyn UpdateListener>>>>,
    cancelled: Arc<AtomicBool>,
    /// Listener tasks spawned but not yet finished.
    notifying: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
    poller: Mutex<Option<Poller>>,
}

impl MaterialUpdateService {
    pub fn new(updater: Arc<dyn MaterialUpdater>, worker_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(worker_threads.max(1))
            .thread_name(|i| format!("material-update-{}", i))
            .build()
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
        Ok(Self {
            gate: Arc::new(UpdateGate::new()),
            pool: Arc::new(pool),
            updater,
            listeners: Arc::new(RwLock::new(Vec::new())),
            cancelled: Arc::new(AtomicBool::new(false)),
            notifying: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
            poller: Mutex::new(None),
        })
    }

    pub fn gate(&self) -> &UpdateGate {
        &self.gate
    }

    pub fn add_listener(&self, listener: Arc<dyn UpdateListener>) -> Result<()> {
        self.listeners
            .write()
            .map_err(|_| Error::poisoned("update listeners"))?
            .push(listener);
        Ok(())
    }

    pub fn is_in_progress(&self, fingerprint: &str) -> bool {
        self.gate.is_in_progress(fingerprint)
    }

    /// Fingerprints whose update has been running longer than `threshold`.
    pub fn hung_updates(&self, threshold: Duration) -> Vec<String> {
        self.gate.hung(threshold)
    }

    /// Schedule an update of `material` unless one is already in flight.
    pub fn request_update(&self, material: &Material) -> Result<UpdateRequest> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(UpdateRequest::ShuttingDown);
        }
        let fingerprint = material.fingerprint().to_string();
        if !self.gate.try_begin(&fingerprint)? {
            debug!("Update of {} already in progress", material.display_name());
            return Ok(UpdateRequest::AlreadyInProgress);
        }

        let gate = Arc::clone(&self.gate);
        let pool = Arc::clone(&self.pool);
        let updater = Arc::clone(&self.updater);
        let listeners = Arc::clone(&self.listeners);
        let cancelled = Arc::clone(&self.cancelled);
        let notifying = Arc::clone(&self.notifying);
        let completed = Arc::clone(&self.completed);
        let material = material.clone();
        self.pool.spawn(move || {
            if cancelled.load(Ordering::SeqCst) {
                debug!("Skipping cancelled update of {}", material.display_name());
                release(&gate, &fingerprint);
                return;
            }
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| updater.update(&material))) {
                Ok(outcome) => outcome.map_err(|e| e.to_string()),
                Err(payload) => Err(format!("update panicked: {}", panic_message(payload.as_ref()))),
            };
            let result = outcome.map_err(|message| {
                let message = material.redactor().redact(&message);
                warn!("Update of {} failed: {}", material.display_name(), message);
                message
            });
            let sequence = completed.fetch_add(1, Ordering::SeqCst) + 1;
            let event = UpdateCompleted {
                material,
                sequence,
                result,
            };
            notifying.fetch_add(1, Ordering::SeqCst);
            release(&gate, &fingerprint);
            pool.spawn(move || {
                notify(&listeners, &event);
                notifying.fetch_sub(1, Ordering::SeqCst);
            });
        });
        Ok(UpdateRequest::Scheduled)
    }

    /// Manual trigger; ignores the material's auto-update setting.
    pub fn check_now(&self, material: &Material) -> Result<UpdateRequest> {
        info!("Manual check requested for {}", material.display_name());
        self.request_update(material)
    }

    /// Request updates for every auto-update material. Returns how many were
    /// scheduled.
    pub fn poll_cycle(&self, materials: &[Material]) -> Result<usize> {
        let mut scheduled = 0;
        for material in materials.iter().filter(|m| m.auto_update()) {
            if self.request_update(material)? == UpdateRequest::Scheduled {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    /// Block until no update is in progress and every listener has run, or
    /// `timeout` passes. `true` if idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.gate.in_progress_count() > 0 || self.notifying.load(Ordering::SeqCst) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        true
    }

    /// Start the background poller over `materials`.
    pub fn start_polling(
        self: &Arc<Self>,
        materials: Vec<Material>,
        interval: Duration,
        hung_threshold: Duration,
    ) -> Result<()> {
        let mut slot = self.poller.lock().map_err(|_| Error::poisoned("poller"))?;
        if slot.is_some() {
            return Ok(());
        }
        let (stop, ticks) = mpsc::channel::<()>();
        let service = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("material-poller".to_string())
            .spawn(move || loop {
                match ticks.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => service.tick(&materials, hung_threshold),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        *slot = Some(Poller { stop, handle });
        Ok(())
    }

    fn tick(&self, materials: &[Material], hung_threshold: Duration) {
        for fingerprint in self.hung_updates(hung_threshold) {
            warn!(
                "Material update for {} has been in progress for more than {}s",
                fingerprint,
                hung_threshold.as_secs()
            );
        }
        match self.poll_cycle(materials) {
            Ok(scheduled) => debug!("Poll cycle scheduled {} updates", scheduled),
            Err(e) => error!("Poll cycle failed: {}", e),
        }
    }

    /// Stop polling and drop queued work that has not started. Running
    /// updates finish normally.
    pub fn shutdown(&self) -> Result<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        let poller = self.poller.lock().map_err(|_| Error::poisoned("poller"))?.take();
        if let Some(poller) = poller {
            // The poller may already have exited; a failed send is fine.
            let _ = poller.stop.send(());
            if poller.handle.join().is_err() {
                error!("Material poller thread panicked");
            }
        }
        Ok(())
    }
}

fn release(gate: &UpdateGate, fingerprint: &str) {
    if let Err(e) = gate.finish(fingerprint) {
        error!("Could not release {}: {}", fingerprint, e);
    }
}

fn notify(listeners: &RwLock<Vec<Arc<dyn UpdateListener>>>, event: &UpdateCompleted) {
    let listeners = match listeners.read() {
        Ok(listeners) => listeners.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    for listener in listeners {
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| listener.on_update_completed(event)));
        if let Err(payload) = delivered {
            error!(
                "Update listener panicked for {}: {}",
                event.material.display_name(),
                event.material.redactor().redact(&panic_message(payload.as_ref()))
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
