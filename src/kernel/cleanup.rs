//! Background cleanup for the task table.
//!
//! Terminal tasks stay queryable after they finish; `TaskCleanupService`
//! forgets the ones older than the configured retention so long-running
//! coordinators do not grow without bound. Ledger state is never touched
//! here: every task's process was already removed when it terminated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::interval;

use super::coordinator::TaskCoordinator;
use crate::types::CleanupConfig;

/// Statistics from a cleanup cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupStats {
    /// Number of terminal tasks forgotten
    pub tasks_removed: usize,
    /// When cleanup cycle completed
    pub completed_at: Option<DateTime<Utc>>,
}

/// Periodic sweeper over a [`TaskCoordinator`].
#[derive(Debug)]
pub struct TaskCleanupService {
    coordinator: TaskCoordinator,
    config: CleanupConfig,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TaskCleanupService {
    pub fn new(coordinator: TaskCoordinator, config: CleanupConfig) -> Self {
        Self {
            coordinator,
            config,
            stop_tx: None,
        }
    }

    /// Start the cleanup loop in the background.
    /// Returns immediately; cleanup runs in a spawned task.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        let config = self.config.clone();
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::spawn(async move {
            let mut ticker = interval(config.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let coordinator = coordinator.clone();
                        let retention = config.task_retention;
                        let cycle = tokio::task::spawn_blocking(move || {
                            Self::run_cleanup_cycle(&coordinator, retention)
                        })
                        .await;
                        if let Err(e) = cycle {
                            tracing::error!("cleanup_cycle_failed: {}", e);
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("cleanup_service_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the cleanup loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Run a single cleanup cycle.
    pub fn run_cleanup_cycle(
        coordinator: &TaskCoordinator,
        retention: std::time::Duration,
    ) -> CleanupStats {
        let tasks_removed = coordinator.cleanup_completed_tasks(retention);
        tracing::debug!("cleanup_cycle_completed: tasks={}", tasks_removed);
        CleanupStats {
            tasks_removed,
            completed_at: Some(Utc::now()),
        }
    }
}
