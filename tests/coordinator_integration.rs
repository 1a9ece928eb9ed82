//! Coordinator integration tests: every task outcome hands its capacity
//! back to the pool.

use resguard_core::kernel::{
    ManagerOptions, ResourceManager, ResourceVector, TaskCoordinator, TaskStatus,
};
use resguard_core::Error;
use serde_json::json;
use std::sync::{mpsc, Arc};
use std::time::Duration;

fn vector(pairs: &[(&str, u64)]) -> ResourceVector {
    pairs.iter().map(|(r, v)| (r.to_string(), *v)).collect()
}

fn pool() -> ResourceVector {
    vector(&[("cpu", 8), ("memory", 16)])
}

fn coordinator() -> TaskCoordinator {
    let manager = ResourceManager::new(pool(), ManagerOptions::default()).unwrap();
    TaskCoordinator::new(Arc::new(manager))
}

fn assert_released(c: &TaskCoordinator) {
    assert_eq!(c.manager().process_count(), 0);
    assert_eq!(c.manager().available(), pool());
    c.manager().check_invariants().unwrap();
}

#[test]
fn test_every_outcome_releases() {
    let c = coordinator();
    let claim = vector(&[("cpu", 2), ("memory", 4)]);

    let ok = c
        .submit_task("ok", claim.clone(), |ctx| {
            ctx.request(&vector(&[("cpu", 1), ("memory", 3)]))?;
            Ok(json!("done"))
        })
        .unwrap();
    let err = c
        .submit_task("err", claim.clone(), |ctx| {
            ctx.request(&vector(&[("memory", 2)]))?;
            Err(Error::task_failed("gave up"))
        })
        .unwrap();
    let panicked = c
        .submit_task("panic", claim.clone(), |_| panic!("unexpected state"))
        .unwrap();
    let rejected = c
        .submit_task("over", vector(&[("cpu", 99), ("memory", 1)]), |_| {
            Ok(json!(null))
        })
        .unwrap();

    assert_eq!(c.wait_task(&ok).unwrap().status, TaskStatus::Completed);
    assert_eq!(c.wait_task(&err).unwrap().status, TaskStatus::Failed);
    assert_eq!(c.wait_task(&panicked).unwrap().status, TaskStatus::Failed);
    assert_eq!(c.wait_task(&rejected).unwrap().status, TaskStatus::Failed);

    assert_released(&c);
    assert_eq!(c.get_all_tasks().len(), 4);
}

#[test]
fn test_over_claim_inside_work_fails_task() {
    let c = coordinator();
    let id = c
        .submit_task("greedy", vector(&[("cpu", 2), ("memory", 2)]), |ctx| {
            ctx.request(&vector(&[("cpu", 5)]))?;
            Ok(json!(null))
        })
        .unwrap();

    let done = c.wait_task(&id).unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.unwrap().contains("validation"));
    assert_released(&c);
}

#[test]
fn test_cancelled_task_observes_flag() {
    let c = coordinator();
    let (started_tx, started_rx) = mpsc::channel();

    let id = c
        .submit_task("poller", vector(&[("cpu", 4), ("memory", 4)]), move |ctx| {
            started_tx.send(()).ok();
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            ctx.ensure_active()?;
            Ok(json!("unreachable"))
        })
        .unwrap();

    started_rx.recv().unwrap();
    c.cancel_task(&id).unwrap();
    assert_released(&c);

    let done = c.wait_task(&id).unwrap();
    assert_eq!(done.status, TaskStatus::Cancelled);
    assert!(done.finished_at.is_some());
    assert_released(&c);
}

#[test]
fn test_many_tasks_share_the_pool() {
    let c = coordinator();
    let ids: Vec<_> = (0..16)
        .map(|i| {
            c.submit_task(
                format!("job-{i}"),
                vector(&[("cpu", 2), ("memory", 2)]),
                move |ctx| {
                    // Extra units may be refused under contention.
                    let _ = ctx.request(&vector(&[("memory", 1)]));
                    Ok(json!(i))
                },
            )
            .unwrap()
        })
        .collect();

    for id in &ids {
        let done = c.wait_task(id).unwrap();
        assert!(done.status.is_terminal());
    }
    assert_released(&c);
}

#[test]
fn test_snapshot_serializes_status_in_snake_case() {
    let c = coordinator();
    let id = c
        .submit_task("report", vector(&[("cpu", 1), ("memory", 1)]), |_| {
            Ok(json!({"rows": 3}))
        })
        .unwrap();

    let done = c.wait_task(&id).unwrap();
    let value = serde_json::to_value(&done).unwrap();
    assert_eq!(value["status"], "completed");
    assert_eq!(value["result"]["rows"], 3);
    assert_eq!(value["process_id"], value["id"]);
    assert!(value.get("error").is_none());
}
