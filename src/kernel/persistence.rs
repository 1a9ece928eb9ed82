//! Snapshot persistence: the on-disk state document and the autosave loop.
//!
//! The document is the [`SystemState`] serialized as pretty JSON. Writes go
//! to a sibling temp file first and are renamed into place, so a crash
//! mid-write leaves the previous snapshot intact.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Weak;
use std::time::Duration;
use tokio::time::interval;

use super::manager::ResourceManager;
use super::types::SystemState;
use crate::types::{Error, ProcessId, Result};

/// Write `state` to `path`, creating parent directories as needed.
pub fn write_document(path: &Path, state: &SystemState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let raw = serde_json::to_vec_pretty(state)?;
    let tmp = temp_path(path);
    std::fs::write(&tmp, raw)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a state document previously written by [`write_document`].
pub fn read_document(path: &Path) -> Result<SystemState> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Which restore step rejected a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStage {
    Register,
    Replay,
}

/// A non-fatal problem met while rebuilding the ledger from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreIssue {
    pub process_id: ProcessId,
    pub stage: RestoreStage,
    pub reason: String,
}

/// Summary of a load/restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Processes re-registered.
    pub registered: usize,
    /// Per-resource allocations re-granted.
    pub replayed: usize,
    pub issues: Vec<RestoreIssue>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub(crate) fn reject(&mut self, process_id: &ProcessId, stage: RestoreStage, err: &Error) {
        tracing::warn!(
            process = %process_id,
            stage = ?stage,
            error = %err,
            "restore_rejected"
        );
        self.issues.push(RestoreIssue {
            process_id: process_id.clone(),
            stage,
            reason: err.to_string(),
        });
    }
}

/// Background loop that saves the manager's state when a save is due.
///
/// Holds only a weak reference, so dropping the last manager handle also
/// ends the loop.
#[derive(Debug)]
pub struct AutosaveService {
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl AutosaveService {
    /// Spawn the loop on the ambient tokio runtime.
    pub fn start(manager: Weak<ResourceManager>, check_interval: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::internal(format!("autosave requires a tokio runtime: {}", e)))?;
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();

        let handle = runtime.spawn(async move {
            let mut ticker = interval(check_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            tracing::debug!("autosave_manager_dropped");
                            break;
                        };
                        if !manager.save_due() {
                            continue;
                        }
                        // File I/O and the state lock are blocking.
                        let outcome = tokio::task::spawn_blocking(move || manager.save_state()).await;
                        match outcome {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => tracing::error!("autosave_failed: {}", e),
                            Err(e) => tracing::error!("autosave_task_panicked: {}", e),
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("autosave_stopped");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signal the loop to stop. Returns the task handle for callers that
    /// want to await completion.
    pub fn stop(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.handle.take()
    }
}
