//! Audit trail of ledger mutations.
//!
//! Bounded ring buffer: once `capacity` events are stored the oldest is
//! dropped for every new one.

use chrono::Utc;
use std::collections::VecDeque;

use super::types::{Event, EventKind, ResourceVector};
use crate::types::ProcessId;

#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<Event>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append an attempt, evicting the oldest entry when full.
    pub fn record(
        &mut self,
        kind: EventKind,
        process_id: &ProcessId,
        resources: &ResourceVector,
        success: bool,
    ) {
        self.push(Event {
            timestamp: Utc::now(),
            kind,
            process_id: process_id.clone(),
            resources: resources.clone(),
            success,
        });
    }

    /// Append an already-built event (used when restoring history).
    pub fn push(&mut self, event: Event) {
        while self.events.len() >= self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// The `n` most recent events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Event> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: usize) -> ProcessId {
        ProcessId::from_string(format!("p{}", n)).unwrap()
    }

    #[test]
    fn test_oldest_dropped_first() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.record(EventKind::Request, &pid(i), &ResourceVector::new(), i % 2 == 0);
        }

        assert_eq!(log.len(), 3);
        let ids: Vec<String> = log
            .recent(10)
            .into_iter()
            .map(|e| e.process_id.to_string())
            .collect();
        assert_eq!(ids, vec!["p2", "p3", "p4"]);
    }

    #[test]
    fn test_recent_returns_tail_in_order() {
        let mut log = EventLog::new(1000);
        for i in 0..150 {
            log.record(EventKind::Register, &pid(i), &ResourceVector::new(), true);
        }
        let tail = log.recent(100);
        assert_eq!(tail.len(), 100);
        assert_eq!(tail[0].process_id, pid(50));
        assert_eq!(tail[99].process_id, pid(149));
    }

    #[test]
    fn test_failures_are_recorded() {
        let mut log = EventLog::new(10);
        log.record(EventKind::Release, &pid(1), &ResourceVector::new(), false);
        assert!(!log.recent(1)[0].success);
        log.clear();
        assert!(log.is_empty());
    }
}
