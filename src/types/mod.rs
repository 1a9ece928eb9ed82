//! Core types for the ResGuard allocator.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ProcessId, TaskId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for resources, persistence and startup

mod config;
mod errors;
mod ids;

pub use config::{
    CleanupConfig, Config, ObservabilityConfig, PersistenceConfig, ResourcesConfig,
    StartupConfig,
};
pub use errors::{Error, Result};
pub use ids::{ProcessId, TaskId};
