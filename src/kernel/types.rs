//! Kernel types: resource vectors, process records, snapshots and events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Error, ProcessId, Result};

/// Quantity per resource type. Ordered so snapshots compare and serialize
/// deterministically.
pub type ResourceVector = BTreeMap<String, u64>;

/// Per-process view keyed by process id.
pub type ProcessTable = BTreeMap<ProcessId, ResourceVector>;

/// Lifecycle status of a registered process.
///
/// ```text
/// REGISTERED → RUNNING → {COMPLETED | FAILED | CANCELLED}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    #[default]
    Registered,
    Running,
    Cancelled,
    Completed,
    Failed,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessStatus::Cancelled | ProcessStatus::Completed | ProcessStatus::Failed
        )
    }
}

/// Lifecycle metadata the facade keeps next to each ledger record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub status: ProcessStatus,
}

impl ProcessInfo {
    pub fn new(metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            registered_at: Utc::now(),
            metadata,
            status: ProcessStatus::Registered,
        }
    }
}

/// A process as the ledger sees it.
///
/// `need` is stored rather than derived so the safety scan can read it
/// directly; the ledger keeps `need == max_claim - allocation` on every write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessRecord {
    pub max_claim: ResourceVector,
    pub allocation: ResourceVector,
    pub need: ResourceVector,
}

impl ProcessRecord {
    /// Fresh record with zero allocation over every claimed resource type.
    pub fn new(max_claim: ResourceVector) -> Self {
        let allocation = max_claim.keys().map(|r| (r.clone(), 0)).collect();
        let need = max_claim.clone();
        Self {
            max_claim,
            allocation,
            need,
        }
    }

    /// Units of `resource` currently held.
    pub fn held(&self, resource: &str) -> u64 {
        self.allocation.get(resource).copied().unwrap_or(0)
    }

    /// Units of `resource` still claimable.
    pub fn remaining(&self, resource: &str) -> u64 {
        self.need.get(resource).copied().unwrap_or(0)
    }

    pub fn holds_anything(&self) -> bool {
        self.allocation.values().any(|&v| v > 0)
    }
}

/// Immutable copy of the ledger state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct LedgerSnapshot {
    pub total: ResourceVector,
    pub available: ResourceVector,
    pub max_claim: ProcessTable,
    pub allocation: ProcessTable,
    pub need: ProcessTable,
}

impl LedgerSnapshot {
    /// Pool totals implied by the snapshot: available plus everything allocated.
    ///
    /// Fails when the sum overflows or disagrees with a recorded `total`,
    /// which only happens for damaged or hand-edited documents.
    pub fn implied_totals(&self) -> Result<ResourceVector> {
        let mut totals = self.available.clone();
        for (pid, alloc) in &self.allocation {
            for (resource, &amount) in alloc {
                let slot = totals.entry(resource.clone()).or_insert(0);
                *slot = slot.checked_add(amount).ok_or_else(|| {
                    Error::validation(format!(
                        "allocation of {} {} to {} overflows the pool",
                        amount, resource, pid
                    ))
                })?;
            }
        }

        if !self.total.is_empty() && self.total != totals {
            return Err(Error::validation(format!(
                "recorded totals {:?} differ from available plus allocated {:?}",
                self.total, totals
            )));
        }
        Ok(totals)
    }
}

/// Kind of ledger mutation recorded in the event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Register,
    Request,
    Release,
    Remove,
}

/// One attempted mutation, successful or not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub process_id: ProcessId,
    pub resources: ResourceVector,
    pub success: bool,
}

/// Full state handed to collaborators and written to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemState {
    #[serde(flatten)]
    pub ledger: LedgerSnapshot,
    #[serde(default)]
    pub process_info: BTreeMap<ProcessId, ProcessInfo>,
    #[serde(default)]
    pub request_history: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(pairs: &[(&str, u64)]) -> ResourceVector {
        pairs.iter().map(|(r, v)| (r.to_string(), *v)).collect()
    }

    #[test]
    fn test_new_record_needs_full_claim() {
        let record = ProcessRecord::new(vector(&[("cpu", 4), ("memory", 8)]));
        assert_eq!(record.held("cpu"), 0);
        assert_eq!(record.remaining("memory"), 8);
        assert_eq!(record.remaining("gpu"), 0);
        assert!(!record.holds_anything());
    }

    #[test]
    fn test_implied_totals_add_allocations() {
        let mut snapshot = LedgerSnapshot {
            available: vector(&[("cpu", 3)]),
            ..Default::default()
        };
        snapshot
            .allocation
            .insert(ProcessId::try_from("p1").unwrap(), vector(&[("cpu", 2)]));
        snapshot
            .allocation
            .insert(ProcessId::try_from("p2").unwrap(), vector(&[("cpu", 5)]));
        assert_eq!(snapshot.implied_totals().unwrap(), vector(&[("cpu", 10)]));

        snapshot.total = vector(&[("cpu", 10)]);
        assert_eq!(snapshot.implied_totals().unwrap(), vector(&[("cpu", 10)]));
    }

    #[test]
    fn test_implied_totals_rejects_overflow() {
        let mut snapshot = LedgerSnapshot {
            available: vector(&[("A", u64::MAX)]),
            ..Default::default()
        };
        snapshot
            .allocation
            .insert(ProcessId::try_from("p1").unwrap(), vector(&[("A", 1)]));
        assert!(matches!(
            snapshot.implied_totals(),
            Err(Error::Validation(msg)) if msg.contains("overflows")
        ));
    }

    #[test]
    fn test_implied_totals_rejects_mismatched_total() {
        let mut snapshot = LedgerSnapshot {
            total: vector(&[("cpu", 12)]),
            available: vector(&[("cpu", 3)]),
            ..Default::default()
        };
        snapshot
            .allocation
            .insert(ProcessId::try_from("p1").unwrap(), vector(&[("cpu", 2)]));
        assert!(matches!(snapshot.implied_totals(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ProcessStatus::Registered.is_terminal());
        assert!(!ProcessStatus::Running.is_terminal());
        assert!(ProcessStatus::Cancelled.is_terminal());
        assert!(ProcessStatus::Completed.is_terminal());
        assert!(ProcessStatus::Failed.is_terminal());
    }
}
