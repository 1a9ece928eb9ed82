//! Banker's safety check and the admission policy built on top of it.
//!
//! A state is safe when some ordering lets every process acquire its full
//! remaining need, finish, and return its allocation:
//!
//! ```text
//! work = available
//! loop:
//!   pick an unfinished p with need[p] <= work   (every resource type)
//!   work += allocation[p]; finished[p] = true
//! until no such p
//! safe  <=>  every process finished
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{ProcessRecord, ResourceVector};
use crate::types::ProcessId;

/// Outcome of one safety scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub safe: bool,
    /// Completion order found by the scan.
    pub sequence: Vec<ProcessId>,
    /// Processes that could not finish; empty when safe.
    pub unfinished: Vec<ProcessId>,
}

/// Run the classical safety scan over `processes` starting from `available`.
///
/// Processes are scanned in id order and the scan restarts after every
/// selection, so the reported sequence is deterministic.
pub fn evaluate(
    available: &ResourceVector,
    processes: &BTreeMap<ProcessId, ProcessRecord>,
) -> SafetyReport {
    let mut work = available.clone();
    let mut finished: BTreeMap<&ProcessId, bool> =
        processes.keys().map(|pid| (pid, false)).collect();
    let mut sequence = Vec::with_capacity(processes.len());

    loop {
        let candidate = processes.iter().find(|(pid, record)| {
            !finished[pid] && fits(&record.need, &work)
        });

        let Some((pid, record)) = candidate else {
            break;
        };

        for (resource, held) in &record.allocation {
            *work.entry(resource.clone()).or_insert(0) += held;
        }
        finished.insert(pid, true);
        sequence.push(pid.clone());
    }

    let unfinished: Vec<ProcessId> = finished
        .into_iter()
        .filter(|(_, done)| !done)
        .map(|(pid, _)| pid.clone())
        .collect();

    SafetyReport {
        safe: unfinished.is_empty(),
        sequence,
        unfinished,
    }
}

fn fits(need: &ResourceVector, work: &ResourceVector) -> bool {
    need.iter()
        .all(|(resource, &n)| n <= work.get(resource).copied().unwrap_or(0))
}

/// How the ledger treats a request whose result fails the safety scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SafetyPolicy {
    /// Reject every unsafe state.
    #[default]
    Strict,

    /// Admit an unsafe state when the system is small and lightly used:
    /// at most `max_processes` registered and every resource type at or below
    /// `max_utilization_percent` in use. Admitted states can deadlock.
    RiskTolerant {
        max_processes: usize,
        max_utilization_percent: u8,
    },
}

impl SafetyPolicy {
    /// Whether an unsafe state may still be admitted.
    ///
    /// `utilization` is the percentage of each pool in use after the
    /// tentative grant.
    pub fn admits_unsafe(&self, process_count: usize, utilization: &BTreeMap<String, f64>) -> bool {
        match *self {
            SafetyPolicy::Strict => false,
            SafetyPolicy::RiskTolerant {
                max_processes,
                max_utilization_percent,
            } => {
                process_count <= max_processes
                    && utilization
                        .values()
                        .all(|&used| used <= f64::from(max_utilization_percent))
            }
        }
    }
}
