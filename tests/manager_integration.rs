//! Facade integration tests: allocation scenarios, concurrency and
//! snapshot round trips through the state file.

use pretty_assertions::assert_eq;
use resguard_core::kernel::{ManagerOptions, ResourceManager, ResourceVector, SafetyPolicy};
use resguard_core::types::ProcessId;
use resguard_core::{Config, Error};
use std::sync::Arc;

fn vector(pairs: &[(&str, u64)]) -> ResourceVector {
    pairs.iter().map(|(r, v)| (r.to_string(), *v)).collect()
}

fn pid(s: &str) -> ProcessId {
    ProcessId::try_from(s).unwrap()
}

fn manager(totals: &[(&str, u64)], options: ManagerOptions) -> ResourceManager {
    ResourceManager::new(vector(totals), options).unwrap()
}

#[test]
fn test_safe_request_granted_after_lookahead() {
    let m = manager(&[("A", 10)], ManagerOptions::default());
    m.register_process(&pid("P1"), vector(&[("A", 7)]), Default::default())
        .unwrap();
    m.register_process(&pid("P2"), vector(&[("A", 6)]), Default::default())
        .unwrap();

    m.request_resources(&pid("P1"), &vector(&[("A", 3)])).unwrap();
    assert_eq!(m.available(), vector(&[("A", 7)]));

    // P2 can finish immediately and hand back enough for P1.
    m.request_resources(&pid("P2"), &vector(&[("A", 6)])).unwrap();
    assert_eq!(m.available(), vector(&[("A", 1)]));
    assert_eq!(m.check_safety().sequence, vec![pid("P2"), pid("P1")]);
}

#[test]
fn test_unsafe_request_rejected_without_side_effects() {
    let m = manager(&[("A", 10)], ManagerOptions::default());
    m.register_process(&pid("P1"), vector(&[("A", 7)]), Default::default())
        .unwrap();
    m.register_process(&pid("P2"), vector(&[("A", 6)]), Default::default())
        .unwrap();
    m.request_resources(&pid("P1"), &vector(&[("A", 5)])).unwrap();
    let before = m.get_system_state().ledger;

    // available would drop to 1 with both processes still needing 2.
    let err = m
        .request_resources(&pid("P2"), &vector(&[("A", 4)]))
        .unwrap_err();
    assert!(matches!(err, Error::UnsafeState { .. }));
    assert_eq!(m.get_system_state().ledger, before);
}

#[test]
fn test_strict_policy_refuses_all_holding_one() {
    let m = manager(&[("A", 3)], ManagerOptions::default());
    for p in ["P1", "P2", "P3"] {
        m.register_process(&pid(p), vector(&[("A", 2)]), Default::default())
            .unwrap();
    }
    m.request_resources(&pid("P1"), &vector(&[("A", 1)])).unwrap();
    m.request_resources(&pid("P2"), &vector(&[("A", 1)])).unwrap();

    let err = m
        .request_resources(&pid("P3"), &vector(&[("A", 1)]))
        .unwrap_err();
    match err {
        Error::UnsafeState { process, blocked } => {
            assert_eq!(process, "P3");
            assert_eq!(blocked, vec!["P1", "P2", "P3"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(m.available(), vector(&[("A", 1)]));
}

#[test]
fn test_risk_tolerant_policy_admits_then_pool_runs_dry() {
    let mut config = Config::default();
    config.resources.totals = vector(&[("A", 3)]);
    config.safety = SafetyPolicy::RiskTolerant {
        max_processes: 3,
        max_utilization_percent: 100,
    };
    config.validate().unwrap();
    let m = ResourceManager::from_config(&config).unwrap();
    for p in ["P1", "P2", "P3"] {
        m.register_process(&pid(p), vector(&[("A", 2)]), Default::default())
            .unwrap();
        m.request_resources(&pid(p), &vector(&[("A", 1)])).unwrap();
    }

    assert!(!m.check_safety().safe);
    let err = m
        .request_resources(&pid("P1"), &vector(&[("A", 1)]))
        .unwrap_err();
    assert!(matches!(err, Error::QuotaExceeded(_)));
}

#[test]
fn test_concurrent_clients_conserve_pool() {
    let m = Arc::new(manager(&[("cpu", 16), ("memory", 64)], ManagerOptions::default()));
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let m = Arc::clone(&m);
            std::thread::spawn(move || {
                let p = pid(&format!("worker-{i}"));
                m.register_process(&p, vector(&[("cpu", 4), ("memory", 16)]), Default::default())
                    .unwrap();
                for _ in 0..50 {
                    if m
                        .request_resources(&p, &vector(&[("cpu", 2), ("memory", 8)]))
                        .is_ok()
                    {
                        m.release_resources(&p, &vector(&[("cpu", 2), ("memory", 8)]))
                            .unwrap();
                    }
                }
                m.remove_process(&p).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    m.check_invariants().unwrap();
    assert_eq!(m.process_count(), 0);
    assert_eq!(m.available(), vector(&[("cpu", 16), ("memory", 64)]));
}

#[test]
fn test_persisted_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.resources.totals = vector(&[("cpu", 8), ("memory", 32)]);
    config.persistence.state_file = dir.path().join("states").join("current_state.json");
    config.startup.reset_resources = false;
    config.startup.reset_allocations = false;

    let first = ResourceManager::from_config(&config).unwrap();
    let mut metadata = serde_json::Map::new();
    metadata.insert("owner".to_string(), serde_json::json!("nightly"));
    first
        .register_process(&pid("etl"), vector(&[("cpu", 4), ("memory", 16)]), metadata)
        .unwrap();
    first
        .request_resources(&pid("etl"), &vector(&[("cpu", 2), ("memory", 10)]))
        .unwrap();
    first.shutdown().unwrap();
    let saved = first.get_system_state();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&config.persistence.state_file).unwrap()).unwrap();
    assert_eq!(raw["total"]["cpu"], 8);
    assert_eq!(raw["allocation"]["etl"]["memory"], 10);
    assert!(raw["saved_at"].is_string());

    let second = ResourceManager::from_config(&config).unwrap();
    let report = second.load_state().unwrap();
    assert!(report.is_clean());

    let restored = second.get_system_state();
    assert_eq!(restored.ledger, saved.ledger);
    assert_eq!(restored.process_info, saved.process_info);
    assert_eq!(
        restored.process_info[&pid("etl")].metadata["owner"],
        "nightly"
    );
}

#[test]
fn test_reset_on_load_uses_configured_totals() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let keep = ManagerOptions {
        state_file: state_file.clone(),
        reset_on_load: false,
        reset_allocations: false,
        ..Default::default()
    };

    let old = manager(&[("cpu", 8)], keep);
    old.register_process(&pid("a"), vector(&[("cpu", 6)]), Default::default())
        .unwrap();
    old.request_resources(&pid("a"), &vector(&[("cpu", 6)])).unwrap();
    old.save_state().unwrap();

    let shrunk = manager(
        &[("cpu", 4)],
        ManagerOptions {
            state_file,
            reset_on_load: true,
            reset_allocations: false,
            ..Default::default()
        },
    );
    let report = shrunk.load_state().unwrap();

    // The claim no longer fits the smaller pool.
    assert_eq!(report.registered, 0);
    assert_eq!(report.issues.len(), 1);
    assert_eq!(shrunk.available(), vector(&[("cpu", 4)]));
}
