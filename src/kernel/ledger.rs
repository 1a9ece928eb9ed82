//! Resource ledger - the Banker's algorithm state.
//!
//! Holds the pool totals, the available vector and one [`ProcessRecord`] per
//! registered process. Every grant is checked with [`safety::evaluate`] before
//! it is committed; an unsafe grant is rolled back.
//!
//! NOT thread-safe on its own - owned by [`super::ResourceManager`] and called
//! via &mut self under its lock.

use std::collections::BTreeMap;

use super::safety::{self, SafetyPolicy, SafetyReport};
use super::types::{LedgerSnapshot, ProcessRecord, ResourceVector};
use crate::types::{Error, ProcessId, Result};
use crate::validation::validate_non_empty;

#[derive(Debug, Clone)]
pub struct Ledger {
    total: ResourceVector,
    available: ResourceVector,
    processes: BTreeMap<ProcessId, ProcessRecord>,
    policy: SafetyPolicy,
}

impl Ledger {
    /// Create a ledger whose whole pool is available.
    pub fn new(total: ResourceVector, policy: SafetyPolicy) -> Result<Self> {
        for name in total.keys() {
            validate_non_empty(name, "resource name")?;
        }
        Ok(Self {
            available: total.clone(),
            total,
            processes: BTreeMap::new(),
            policy,
        })
    }

    /// Register a process with its maximum claim.
    ///
    /// The claim must name exactly the known resource types. A claim above
    /// a pool total is also refused here rather than left for the safety
    /// scan: such a process could never finish.
    pub fn register(&mut self, pid: ProcessId, max_claim: ResourceVector) -> Result<()> {
        if self.processes.contains_key(&pid) {
            return Err(Error::validation(format!(
                "process {} is already registered",
                pid
            )));
        }

        let missing: Vec<&str> = self
            .total
            .keys()
            .filter(|r| !max_claim.contains_key(*r))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(Error::validation(format!(
                "max claim for {} is missing resource types: {}",
                pid,
                missing.join(", ")
            )));
        }

        if let Some(unknown) = max_claim.keys().find(|r| !self.total.contains_key(*r)) {
            return Err(Error::validation(format!(
                "max claim for {} names unknown resource type {}",
                pid, unknown
            )));
        }

        for (resource, &claim) in &max_claim {
            let total = self.total[resource];
            if claim > total {
                return Err(Error::validation(format!(
                    "max claim for {} exceeds pool: {} {} > {}",
                    pid, resource, claim, total
                )));
            }
        }

        self.processes.insert(pid, ProcessRecord::new(max_claim));
        debug_assert!(self.check_invariants().is_ok());
        Ok(())
    }

    /// Grant `amounts` to `pid` if the result is safe.
    ///
    /// Zero amounts are no-ops. On any failure the ledger is unchanged.
    pub fn request(&mut self, pid: &ProcessId, amounts: &ResourceVector) -> Result<()> {
        let record = self
            .processes
            .get(pid)
            .ok_or_else(|| Error::not_found(format!("unknown process: {}", pid)))?;

        for (resource, &amount) in nonzero(amounts) {
            let need = record.remaining(resource);
            if amount > need {
                return Err(Error::validation(format!(
                    "process {} requested {} {} but only needs {}",
                    pid, amount, resource, need
                )));
            }
        }

        for (resource, &amount) in nonzero(amounts) {
            let available = self.available.get(resource).copied().unwrap_or(0);
            if amount > available {
                return Err(Error::quota_exceeded(format!(
                    "process {} requested {} {} but only {} available",
                    pid, amount, resource, available
                )));
            }
        }

        // Only `available` and this record change, so they are the whole rollback.
        let saved_available = self.available.clone();
        let saved_record = record.clone();

        self.apply_grant(pid, amounts);

        let report = self.check_safety();
        if report.safe {
            debug_assert!(self.check_invariants().is_ok());
            return Ok(());
        }

        if self
            .policy
            .admits_unsafe(self.processes.len(), &self.utilization())
        {
            tracing::warn!(
                process = %pid,
                blocked = ?report.unfinished,
                "unsafe_grant_admitted_by_policy"
            );
            debug_assert!(self.check_invariants().is_ok());
            return Ok(());
        }

        self.available = saved_available;
        self.processes.insert(pid.clone(), saved_record);

        Err(Error::unsafe_state(
            pid.as_str(),
            report
                .unfinished
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        ))
    }

    /// Return `amounts` from `pid` to the pool.
    pub fn release(&mut self, pid: &ProcessId, amounts: &ResourceVector) -> Result<()> {
        let record = self
            .processes
            .get_mut(pid)
            .ok_or_else(|| Error::not_found(format!("unknown process: {}", pid)))?;

        for (resource, &amount) in nonzero(amounts) {
            let held = record.held(resource);
            if amount > held {
                return Err(Error::validation(format!(
                    "process {} released {} {} but holds {}",
                    pid, amount, resource, held
                )));
            }
        }

        for (resource, &amount) in nonzero(amounts) {
            *record.allocation.entry(resource.clone()).or_insert(0) -= amount;
            *record.need.entry(resource.clone()).or_insert(0) += amount;
            *self.available.entry(resource.clone()).or_insert(0) += amount;
        }

        debug_assert!(self.check_invariants().is_ok());
        Ok(())
    }

    /// Delete `pid`, returning everything it held to the pool.
    pub fn remove(&mut self, pid: &ProcessId) -> Result<ProcessRecord> {
        let record = self
            .processes
            .remove(pid)
            .ok_or_else(|| Error::not_found(format!("unknown process: {}", pid)))?;

        for (resource, &held) in &record.allocation {
            *self.available.entry(resource.clone()).or_insert(0) += held;
        }

        debug_assert!(self.check_invariants().is_ok());
        Ok(record)
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot {
            total: self.total.clone(),
            available: self.available.clone(),
            ..Default::default()
        };
        for (pid, record) in &self.processes {
            snapshot
                .max_claim
                .insert(pid.clone(), record.max_claim.clone());
            snapshot
                .allocation
                .insert(pid.clone(), record.allocation.clone());
            snapshot.need.insert(pid.clone(), record.need.clone());
        }
        snapshot
    }

    /// Run the safety scan over the current state.
    pub fn check_safety(&self) -> SafetyReport {
        safety::evaluate(&self.available, &self.processes)
    }

    /// Verify conservation and per-process bounds.
    pub fn check_invariants(&self) -> Result<()> {
        for (resource, &total) in &self.total {
            let available = self.available.get(resource).copied().unwrap_or(0);
            let allocated: u64 = self.processes.values().map(|p| p.held(resource)).sum();
            if available + allocated != total {
                return Err(Error::internal(format!(
                    "conservation violated for {}: available {} + allocated {} != total {}",
                    resource, available, allocated, total
                )));
            }
        }

        for (pid, record) in &self.processes {
            for (resource, &claim) in &record.max_claim {
                let held = record.held(resource);
                if held > claim {
                    return Err(Error::internal(format!(
                        "process {} holds {} {} above its claim {}",
                        pid, held, resource, claim
                    )));
                }
                if record.remaining(resource) != claim - held {
                    return Err(Error::internal(format!(
                        "process {} need for {} out of sync with claim and allocation",
                        pid, resource
                    )));
                }
            }
        }

        Ok(())
    }

    /// Percentage of each pool currently allocated.
    pub fn utilization(&self) -> BTreeMap<String, f64> {
        self.total
            .iter()
            .map(|(resource, &total)| {
                let available = self.available.get(resource).copied().unwrap_or(0);
                let used = if total == 0 {
                    0.0
                } else {
                    (total - available) as f64 / total as f64 * 100.0
                };
                (resource.clone(), used)
            })
            .collect()
    }

    pub fn total(&self) -> &ResourceVector {
        &self.total
    }

    pub fn available(&self) -> &ResourceVector {
        &self.available
    }

    pub fn policy(&self) -> SafetyPolicy {
        self.policy
    }

    pub fn get(&self, pid: &ProcessId) -> Option<&ProcessRecord> {
        self.processes.get(pid)
    }

    pub fn contains(&self, pid: &ProcessId) -> bool {
        self.processes.contains_key(pid)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn process_ids(&self) -> impl Iterator<Item = &ProcessId> {
        self.processes.keys()
    }

    fn apply_grant(&mut self, pid: &ProcessId, amounts: &ResourceVector) {
        let Some(record) = self.processes.get_mut(pid) else {
            return;
        };
        for (resource, &amount) in nonzero(amounts) {
            *self.available.entry(resource.clone()).or_insert(0) -= amount;
            *record.allocation.entry(resource.clone()).or_insert(0) += amount;
            *record.need.entry(resource.clone()).or_insert(0) -= amount;
        }
    }
}

fn nonzero(amounts: &ResourceVector) -> impl Iterator<Item = (&String, &u64)> {
    amounts.iter().filter(|(_, &amount)| amount > 0)
}
