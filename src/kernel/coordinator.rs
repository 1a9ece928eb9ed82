//! Task coordinator - runs units of work bound to ledger processes.
//!
//! Each submitted task is registered as a ledger process under its own id,
//! gets a dedicated OS thread, acquires one unit of every declared resource
//! before its work starts, and is removed from the ledger on every terminal
//! transition.
//!
//! State machine:
//! ```text
//! PENDING → STARTING → ACQUIRING_RESOURCES → RUNNING → {COMPLETED | FAILED}
//!              │               │                │
//!              └───────────────┴────────────────┴──→ CANCELLED
//! ```
//!
//! Cancellation is cooperative. The thread is never interrupted; cancelling
//! removes the process (so its capacity is back in the pool at once) and
//! raises a flag the work can poll through [`TaskContext::is_cancelled`].
//! The work may keep running after that point, and its result is discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use super::manager::ResourceManager;
use super::recovery::with_recovery;
use super::types::ResourceVector;
use crate::types::{Error, ProcessId, Result, TaskId};

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Starting,
    AcquiringResources,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Pending, Starting) | (Pending, Failed) => true,
            (Starting, AcquiringResources) => true,
            (AcquiringResources, Running) | (AcquiringResources, Failed) => true,
            (Running, Completed) | (Running, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Read-only view of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub process_id: ProcessId,
    pub name: String,
    pub max_resources: ResourceVector,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskSnapshot {
    fn new(id: TaskId, name: String, max_resources: ResourceVector) -> Self {
        Self {
            process_id: ProcessId::from(&id),
            id,
            name,
            max_resources,
            status: TaskStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }

    fn transition(&mut self, to: TaskStatus) -> bool {
        if !self.status.can_transition_to(to) {
            return false;
        }
        self.status = to;
        match to {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        true
    }
}

#[derive(Debug)]
struct TaskEntry {
    snapshot: TaskSnapshot,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

type TaskTable = Arc<Mutex<HashMap<TaskId, TaskEntry>>>;

/// Handle given to a unit of work.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: TaskId,
    process_id: ProcessId,
    manager: Arc<ResourceManager>,
    cancelled: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.process_id
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    /// Request more units for this task's process.
    pub fn request(&self, amounts: &ResourceVector) -> Result<()> {
        self.manager.request_resources(&self.process_id, amounts)
    }

    /// Return units early.
    pub fn release(&self, amounts: &ResourceVector) -> Result<()> {
        self.manager.release_resources(&self.process_id, amounts)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the task has been cancelled.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::cancelled(format!("task {} was cancelled", self.task_id)));
        }
        Ok(())
    }
}

/// Runs tasks on their own threads against a shared [`ResourceManager`].
///
/// Cloning yields another handle to the same task table.
#[derive(Debug, Clone)]
pub struct TaskCoordinator {
    manager: Arc<ResourceManager>,
    tasks: TaskTable,
}

impl TaskCoordinator {
    pub fn new(manager: Arc<ResourceManager>) -> Self {
        Self {
            manager,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn manager(&self) -> &Arc<ResourceManager> {
        &self.manager
    }

    /// Register a task and start its thread.
    ///
    /// A task whose registration is rejected is recorded as `failed` and
    /// never gets a thread; its id is still returned so the reason can be
    /// read back. `Err` means the thread itself could not be spawned.
    pub fn submit_task<F>(
        &self,
        name: impl Into<String>,
        max_resources: ResourceVector,
        work: F,
    ) -> Result<TaskId>
    where
        F: FnOnce(&TaskContext) -> Result<serde_json::Value> + Send + 'static,
    {
        let name = name.into();
        let task_id = TaskId::new();
        let mut snapshot = TaskSnapshot::new(task_id.clone(), name.clone(), max_resources.clone());
        let pid = snapshot.process_id.clone();

        let mut metadata = serde_json::Map::new();
        metadata.insert("type".to_string(), serde_json::json!("task"));
        metadata.insert("function".to_string(), serde_json::json!(name));

        let mut tasks = lock(&self.tasks);

        if let Err(e) = self
            .manager
            .register_process(&pid, max_resources.clone(), metadata)
        {
            tracing::warn!(task = %task_id, error = %e, "task_registration_failed");
            snapshot.transition(TaskStatus::Failed);
            snapshot.error = Some(e.to_string());
            tasks.insert(
                task_id.clone(),
                TaskEntry {
                    snapshot,
                    cancelled: Arc::new(AtomicBool::new(false)),
                    thread: None,
                },
            );
            return Ok(task_id);
        }

        snapshot.transition(TaskStatus::Starting);
        let cancelled = Arc::new(AtomicBool::new(false));
        let ctx = TaskContext {
            task_id: task_id.clone(),
            process_id: pid.clone(),
            manager: Arc::clone(&self.manager),
            cancelled: Arc::clone(&cancelled),
        };
        let initial: ResourceVector = max_resources
            .iter()
            .filter(|(_, &max)| max > 0)
            .map(|(resource, _)| (resource.clone(), 1))
            .collect();
        let table = Arc::clone(&self.tasks);

        // The thread blocks on the table lock until this entry is in place.
        let spawned = std::thread::Builder::new()
            .name(task_id.to_string())
            .spawn(move || run_task(table, ctx, initial, work));

        match spawned {
            Ok(handle) => {
                tasks.insert(
                    task_id.clone(),
                    TaskEntry {
                        snapshot,
                        cancelled,
                        thread: Some(handle),
                    },
                );
                tracing::info!(task = %task_id, name = %name, "task_submitted");
                Ok(task_id)
            }
            Err(e) => {
                if let Err(remove_err) = self.manager.remove_process(&pid) {
                    tracing::warn!(task = %task_id, error = %remove_err, "task_spawn_cleanup_failed");
                }
                Err(Error::Io(e))
            }
        }
    }

    pub fn get_task_status(&self, task_id: &TaskId) -> Option<TaskSnapshot> {
        lock(&self.tasks)
            .get(task_id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Every known task, oldest submission first.
    pub fn get_all_tasks(&self) -> Vec<TaskSnapshot> {
        let mut all: Vec<TaskSnapshot> = lock(&self.tasks)
            .values()
            .map(|entry| entry.snapshot.clone())
            .collect();
        all.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        all
    }

    /// Cancel a non-terminal task and reclaim its resources immediately.
    pub fn cancel_task(&self, task_id: &TaskId) -> Result<()> {
        let mut tasks = lock(&self.tasks);
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::not_found(format!("unknown task: {}", task_id)))?;

        if entry.snapshot.status.is_terminal() {
            return Err(Error::state_transition(format!(
                "cannot cancel task {}: already {:?}",
                task_id, entry.snapshot.status
            )));
        }

        entry.cancelled.store(true, Ordering::Release);
        reclaim(&self.manager, &entry.snapshot.process_id, TaskStatus::Cancelled);
        entry.snapshot.transition(TaskStatus::Cancelled);

        tracing::info!(task = %task_id, "task_cancelled");
        Ok(())
    }

    /// Block until the task's thread exits, then return its final view.
    pub fn wait_task(&self, task_id: &TaskId) -> Result<TaskSnapshot> {
        let handle = lock(&self.tasks)
            .get_mut(task_id)
            .ok_or_else(|| Error::not_found(format!("unknown task: {}", task_id)))?
            .thread
            .take();

        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| Error::internal(format!("task thread {} panicked", task_id)))?;
        }

        self.get_task_status(task_id)
            .ok_or_else(|| Error::not_found(format!("unknown task: {}", task_id)))
    }

    /// Forget terminal tasks that finished more than `max_age` ago.
    ///
    /// Ledger state was already reclaimed at termination; this only trims
    /// the coordinator's own table.
    pub fn cleanup_completed_tasks(&self, max_age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let mut tasks = lock(&self.tasks);
        let before = tasks.len();
        tasks.retain(|_, entry| {
            let snapshot = &entry.snapshot;
            !(snapshot.status.is_terminal()
                && snapshot.finished_at.is_some_and(|at| at <= cutoff))
        });
        let removed = before - tasks.len();

        if removed > 0 {
            tracing::debug!(removed, "terminal_tasks_cleaned");
        }
        removed
    }

    pub fn task_count(&self) -> usize {
        lock(&self.tasks).len()
    }
}

fn lock(tasks: &TaskTable) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
    tasks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Remove the task's process from the ledger. A missing process is
/// expected when cancellation already removed it.
fn reclaim(manager: &ResourceManager, pid: &ProcessId, outcome: TaskStatus) {
    match manager.remove_process(pid) {
        Ok(()) => tracing::debug!(process = %pid, outcome = ?outcome, "task_process_reclaimed"),
        Err(e) => tracing::debug!(process = %pid, error = %e, "task_process_already_removed"),
    }
}

/// Move a task forward unless it was cancelled meanwhile.
fn advance(table: &TaskTable, task_id: &TaskId, to: TaskStatus) -> bool {
    lock(table)
        .get_mut(task_id)
        .is_some_and(|entry| entry.snapshot.transition(to))
}

fn run_task<F>(table: TaskTable, ctx: TaskContext, initial: ResourceVector, work: F)
where
    F: FnOnce(&TaskContext) -> Result<serde_json::Value>,
{
    if !advance(&table, &ctx.task_id, TaskStatus::AcquiringResources) {
        return;
    }

    if let Err(e) = ctx.request(&initial) {
        let reason = Error::task_failed(format!("failed to acquire initial resources: {}", e));
        finish(&table, &ctx, Err(reason));
        return;
    }

    if !advance(&table, &ctx.task_id, TaskStatus::Running) {
        return;
    }
    tracing::debug!(task = %ctx.task_id, "task_running");

    let outcome = with_recovery(|| work(&ctx), ctx.task_id.as_str());
    finish(&table, &ctx, outcome);
}

/// Record a terminal outcome. The process is removed before the terminal
/// status becomes visible, so observers never see a finished task that
/// still holds capacity.
fn finish(table: &TaskTable, ctx: &TaskContext, outcome: Result<serde_json::Value>) {
    let mut tasks = lock(table);
    let status = if outcome.is_ok() {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };
    reclaim(&ctx.manager, &ctx.process_id, status);

    let Some(entry) = tasks.get_mut(&ctx.task_id) else {
        return;
    };
    if entry.snapshot.status.is_terminal() {
        tracing::debug!(task = %ctx.task_id, "task_outcome_discarded_after_cancel");
        return;
    }

    match outcome {
        Ok(value) => {
            entry.snapshot.transition(TaskStatus::Completed);
            entry.snapshot.result = Some(value);
            tracing::info!(task = %ctx.task_id, "task_completed");
        }
        Err(e) => {
            entry.snapshot.transition(TaskStatus::Failed);
            entry.snapshot.error = Some(e.to_string());
            tracing::warn!(task = %ctx.task_id, error = %e, "task_failed");
        }
    }
}
