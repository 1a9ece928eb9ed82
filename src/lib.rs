//! # resguard-core - Deadlock-avoiding resource allocation
//!
//! A fixed pool of named resource types is shared between processes that
//! declare their maximum claim up front. Every grant is checked with the
//! Banker's algorithm, so the pool never enters a state from which some
//! process could be unable to finish.
//!
//! ## Architecture
//!
//! ```text
//!   submit_task ──→ TaskCoordinator ── thread per task ──┐
//!                          │                             │
//!                          ▼                             ▼
//!                   ResourceManager (one lock) ◄── TaskContext
//!                     │        │        │
//!                  Ledger   EventLog  state file ◄── AutosaveService
//! ```
//!
//! Denied requests fail immediately; nothing queues or blocks waiting for
//! capacity.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod kernel;
pub mod types;

// Internal utilities
pub mod observability;
pub mod validation;

pub use types::{Config, Error, Result};
