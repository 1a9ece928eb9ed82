//! Allocator facade.
//!
//! `ResourceManager` wraps the [`Ledger`] in a single mutex so that every
//! register/request/release/remove/snapshot call is totally ordered. On top
//! of the ledger it keeps per-process lifecycle metadata, the audit log and
//! snapshot persistence.
//!
//! ```text
//!   TaskCoordinator ─┐
//!   collaborators  ──┼─→ ResourceManager ──(Mutex)──→ Ledger
//!   AutosaveService ─┘          │
//!                               └──→ state document (JSON)
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;

use super::events::EventLog;
use super::ledger::Ledger;
use super::persistence::{self, AutosaveService, RestoreReport, RestoreStage};
use super::safety::{SafetyPolicy, SafetyReport};
use super::types::{EventKind, ProcessInfo, ProcessStatus, ResourceVector, SystemState};
use crate::types::{Config, Error, ProcessId, Result};

/// Construction-time options for the facade.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub state_file: PathBuf,
    pub save_interval: Duration,
    pub check_interval: Duration,
    pub history_limit: usize,
    pub snapshot_history: usize,
    /// Rebuild from the initial totals instead of the persisted ones.
    pub reset_on_load: bool,
    /// Restore processes with zero allocation instead of replaying grants.
    pub reset_allocations: bool,
    pub safety: SafetyPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ManagerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            state_file: config.persistence.state_file.clone(),
            save_interval: config.persistence.save_interval,
            check_interval: config.persistence.check_interval,
            history_limit: config.persistence.history_limit,
            snapshot_history: config.persistence.snapshot_history,
            reset_on_load: config.startup.reset_resources,
            reset_allocations: config.startup.reset_allocations,
            safety: config.safety,
        }
    }
}

#[derive(Debug)]
struct ManagerState {
    ledger: Ledger,
    process_info: BTreeMap<ProcessId, ProcessInfo>,
    history: EventLog,
    last_saved: Instant,
}

/// Thread-safe, audited front for the ledger.
#[derive(Debug)]
pub struct ResourceManager {
    state: Mutex<ManagerState>,
    /// Serializes writers of the state file.
    save_lock: Mutex<()>,
    autosave: Mutex<Option<AutosaveService>>,
    initial_resources: ResourceVector,
    options: ManagerOptions,
}

impl ResourceManager {
    pub fn new(resources: ResourceVector, options: ManagerOptions) -> Result<Self> {
        let ledger = Ledger::new(resources.clone(), options.safety)?;
        Ok(Self {
            state: Mutex::new(ManagerState {
                ledger,
                process_info: BTreeMap::new(),
                history: EventLog::new(options.history_limit),
                last_saved: Instant::now(),
            }),
            save_lock: Mutex::new(()),
            autosave: Mutex::new(None),
            initial_resources: resources,
            options,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.resources.totals.clone(),
            ManagerOptions::from_config(config),
        )
    }

    // =========================================================================
    // Process-facing API
    // =========================================================================

    /// Register `pid` with its maximum claim and free-form metadata.
    pub fn register_process(
        &self,
        pid: &ProcessId,
        max_claim: ResourceVector,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let mut state = self.lock();
        let result = state.ledger.register(pid.clone(), max_claim.clone());
        state
            .history
            .record(EventKind::Register, pid, &max_claim, result.is_ok());

        match &result {
            Ok(()) => {
                state
                    .process_info
                    .insert(pid.clone(), ProcessInfo::new(metadata));
                tracing::info!(process = %pid, claim = ?max_claim, "process_registered");
            }
            Err(e) => tracing::debug!(process = %pid, error = %e, "process_registration_rejected"),
        }
        result
    }

    /// Ask for `amounts` on behalf of `pid`. Denials return immediately.
    pub fn request_resources(&self, pid: &ProcessId, amounts: &ResourceVector) -> Result<()> {
        let mut state = self.lock();
        let result = state.ledger.request(pid, amounts);
        state
            .history
            .record(EventKind::Request, pid, amounts, result.is_ok());

        match &result {
            Ok(()) => {
                if let Some(info) = state.process_info.get_mut(pid) {
                    info.status = ProcessStatus::Running;
                }
                tracing::debug!(process = %pid, amounts = ?amounts, "request_granted");
            }
            Err(e) => tracing::info!(process = %pid, error = %e, "request_denied"),
        }
        result
    }

    pub fn release_resources(&self, pid: &ProcessId, amounts: &ResourceVector) -> Result<()> {
        let mut state = self.lock();
        let result = state.ledger.release(pid, amounts);
        state
            .history
            .record(EventKind::Release, pid, amounts, result.is_ok());

        match &result {
            Ok(()) => tracing::debug!(process = %pid, amounts = ?amounts, "resources_released"),
            Err(e) => tracing::info!(process = %pid, error = %e, "release_rejected"),
        }
        result
    }

    /// Remove `pid`, returning its whole allocation to the pool.
    pub fn remove_process(&self, pid: &ProcessId) -> Result<()> {
        let mut state = self.lock();
        let result = state.ledger.remove(pid);
        let returned = result
            .as_ref()
            .map(|record| record.allocation.clone())
            .unwrap_or_default();
        state
            .history
            .record(EventKind::Remove, pid, &returned, result.is_ok());

        match result {
            Ok(_) => {
                state.process_info.remove(pid);
                tracing::info!(process = %pid, returned = ?returned, "process_removed");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(process = %pid, error = %e, "process_remove_rejected");
                Err(e)
            }
        }
    }

    /// Record a lifecycle status reported by the owner of `pid`.
    pub fn update_process_status(&self, pid: &ProcessId, status: ProcessStatus) -> Result<()> {
        let mut state = self.lock();
        let info = state
            .process_info
            .get_mut(pid)
            .ok_or_else(|| Error::not_found(format!("unknown process: {}", pid)))?;
        info.status = status;
        Ok(())
    }

    // =========================================================================
    // Read API
    // =========================================================================

    /// Atomic view of the ledger, process metadata and recent history.
    pub fn get_system_state(&self) -> SystemState {
        let state = self.lock();
        SystemState {
            ledger: state.ledger.snapshot(),
            process_info: state.process_info.clone(),
            request_history: state.history.recent(self.options.snapshot_history),
            saved_at: None,
        }
    }

    pub fn check_safety(&self) -> SafetyReport {
        self.lock().ledger.check_safety()
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.lock().ledger.check_invariants()
    }

    pub fn utilization(&self) -> BTreeMap<String, f64> {
        self.lock().ledger.utilization()
    }

    pub fn available(&self) -> ResourceVector {
        self.lock().ledger.available().clone()
    }

    pub fn contains_process(&self, pid: &ProcessId) -> bool {
        self.lock().ledger.contains(pid)
    }

    pub fn process_count(&self) -> usize {
        self.lock().ledger.process_count()
    }

    pub fn initial_resources(&self) -> &ResourceVector {
        &self.initial_resources
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write the current state to the configured state file.
    ///
    /// The snapshot is taken under the state lock; the write happens after
    /// releasing it.
    pub fn save_state(&self) -> Result<()> {
        let _writer = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut document = self.get_system_state();
        document.saved_at = Some(Utc::now());

        let path = &self.options.state_file;
        if let Err(e) = persistence::write_document(path, &document) {
            tracing::error!(path = %path.display(), error = %e, "state_save_failed");
            return Err(e);
        }

        self.lock().last_saved = Instant::now();
        tracing::debug!(path = %path.display(), "state_saved");
        Ok(())
    }

    /// Rebuild the ledger from the configured state file.
    ///
    /// On read or parse failure the in-memory state is unchanged.
    pub fn load_state(&self) -> Result<RestoreReport> {
        let path = &self.options.state_file;
        let document = persistence::read_document(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "state_load_failed");
            e
        })?;
        self.restore_state(&document)
    }

    /// Rebuild the ledger from an in-memory document.
    ///
    /// Registration and replay rejections are reported, not fatal; a process
    /// keeps whatever part of its allocation could be re-granted.
    pub fn restore_state(&self, document: &SystemState) -> Result<RestoreReport> {
        let totals = if self.options.reset_on_load {
            self.initial_resources.clone()
        } else {
            document.ledger.implied_totals().map_err(|e| {
                tracing::error!(error = %e, "state_document_rejected");
                e
            })?
        };

        let mut ledger = Ledger::new(totals, self.options.safety)?;
        let mut report = RestoreReport::default();

        for (pid, claim) in &document.ledger.max_claim {
            match ledger.register(pid.clone(), claim.clone()) {
                Ok(()) => report.registered += 1,
                Err(e) => report.reject(pid, RestoreStage::Register, &e),
            }
        }

        if !self.options.reset_allocations {
            for (pid, allocation) in &document.ledger.allocation {
                if !ledger.contains(pid) {
                    continue;
                }
                for (resource, &amount) in allocation.iter().filter(|(_, &a)| a > 0) {
                    let grant = ResourceVector::from([(resource.clone(), amount)]);
                    match ledger.request(pid, &grant) {
                        Ok(()) => report.replayed += 1,
                        Err(e) => report.reject(pid, RestoreStage::Replay, &e),
                    }
                }
            }
        }

        let mut process_info = BTreeMap::new();
        for pid in ledger.process_ids() {
            let mut info = document
                .process_info
                .get(pid)
                .cloned()
                .unwrap_or_else(|| ProcessInfo::new(serde_json::Map::new()));
            let holds = ledger.get(pid).is_some_and(|r| r.holds_anything());
            if !holds && info.status == ProcessStatus::Running {
                info.status = ProcessStatus::Registered;
            }
            process_info.insert(pid.clone(), info);
        }

        let mut history = EventLog::new(self.options.history_limit);
        for event in &document.request_history {
            history.push(event.clone());
        }

        {
            let mut state = self.lock();
            state.ledger = ledger;
            state.process_info = process_info;
            state.history = history;
        }

        tracing::info!(
            registered = report.registered,
            replayed = report.replayed,
            issues = report.issues.len(),
            "state_restored"
        );
        Ok(report)
    }

    /// Drop every process and restore the initial totals.
    pub fn reset_resources(&self) -> Result<()> {
        let ledger = Ledger::new(self.initial_resources.clone(), self.options.safety)?;
        let mut state = self.lock();
        let dropped = state.ledger.process_count();
        state.ledger = ledger;
        state.process_info.clear();
        state.history.clear();
        tracing::info!(dropped, "resources_reset");
        Ok(())
    }

    /// Start the periodic autosave loop on the ambient tokio runtime.
    ///
    /// Calling it again while the loop is running is a no-op.
    pub fn start_autosave(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.autosave.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }
        let service = AutosaveService::start(Arc::downgrade(self), self.options.check_interval)?;
        *slot = Some(service);
        tracing::info!(
            interval = ?self.options.save_interval,
            path = %self.options.state_file.display(),
            "autosave_started"
        );
        Ok(())
    }

    /// Stop autosave and write a final snapshot.
    pub fn shutdown(&self) -> Result<()> {
        let service = self
            .autosave
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut service) = service {
            service.stop();
        }
        self.save_state()?;
        tracing::info!("resource_manager_shutdown");
        Ok(())
    }

    /// True once `save_interval` has elapsed since the last successful save.
    pub(crate) fn save_due(&self) -> bool {
        self.lock().last_saved.elapsed() >= self.options.save_interval
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        // A panic while holding the lock cannot leave the ledger half-written:
        // every mutation validates before it writes.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
