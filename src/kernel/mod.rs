//! Kernel - deadlock-avoiding allocation of a fixed resource pool.
//!
//! Layers, bottom up:
//! - [`Ledger`]: the pool and per-process claim/allocation/need bookkeeping,
//!   with a Banker's-algorithm safety check on every grant.
//! - [`ResourceManager`]: the thread-safe facade. One mutex orders every
//!   ledger call; it adds process metadata, an audit log and snapshots.
//! - [`TaskCoordinator`]: runs work on dedicated threads, each bound to a
//!   ledger process that is removed whatever the outcome.

pub mod cleanup;
pub mod coordinator;
pub mod events;
pub mod ledger;
pub mod manager;
pub mod persistence;
pub mod recovery;
pub mod safety;
pub mod types;

pub use cleanup::{CleanupStats, TaskCleanupService};
pub use coordinator::{TaskContext, TaskCoordinator, TaskSnapshot, TaskStatus};
pub use events::EventLog;
pub use ledger::Ledger;
pub use manager::{ManagerOptions, ResourceManager};
pub use persistence::{AutosaveService, RestoreIssue, RestoreReport, RestoreStage};
pub use recovery::with_recovery;
pub use safety::{SafetyPolicy, SafetyReport};
pub use types::{
    Event, EventKind, LedgerSnapshot, ProcessInfo, ProcessRecord, ProcessStatus, ProcessTable,
    ResourceVector, SystemState,
};
