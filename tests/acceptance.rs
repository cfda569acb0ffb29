//! End-to-end scenarios for the scheduling engine (§8). The dialog-gate
//! scenario lives in `intent_processor`'s own unit tests since it needs no
//! persistence; these exercise `SchedulerService` against a real
//! `SqliteStore`.

use chrono::{Duration, Utc};
use pulse_scheduler_core::config::SchedulerConfig;
use pulse_scheduler_core::deterministic::validate_no_thrash;
use pulse_scheduler_core::invariant_checker::InvariantChecker;
use pulse_scheduler_core::models::{BusyEvent, BusyEventSource, Preferences, Task, TaskKind};
use pulse_scheduler_core::repository::{BusyEventRepository, SqliteStore, TaskRepository};
use pulse_scheduler_core::scheduler_service::{ScheduleOptions, SchedulerService};
use std::collections::HashSet;

fn task(id: &str, estimated_minutes: u32, min_block: u32, max_block: u32, deadline_in: Option<Duration>) -> Task {
    Task {
        id: id.to_string(),
        owner_id: "u1".into(),
        title: id.to_string(),
        kind: TaskKind::Study,
        estimated_minutes,
        min_block_minutes: min_block,
        max_block_minutes: max_block,
        deadline: deadline_in.map(|d| Utc::now() + d),
        earliest_start: None,
        weight: 1.0,
        prerequisites: HashSet::new(),
        preferred_windows: Vec::new(),
        avoid_windows: Vec::new(),
        course_id: None,
        tags: Vec::new(),
    }
}

fn busy_event(id: &str, start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>, hard: bool) -> BusyEvent {
    BusyEvent { id: id.to_string(), source: BusyEventSource::Pulse, start, end, title: "conflict".into(), hard, movable: false }
}

fn check_invariants(tasks: &[Task], events: &[BusyEvent], prefs: &Preferences, granularity: u32, solution: &pulse_scheduler_core::models::ScheduleSolution) {
    let checker = InvariantChecker { tasks, events, prefs, granularity_minutes: granularity, unscheduled_tasks: &solution.unscheduled_tasks };
    let violations = checker.check(&solution.blocks);
    assert!(violations.is_empty(), "invariant violations: {violations:?}");
}

/// Scenario 1: basic feasible schedule.
#[test]
fn scenario_basic_feasible_schedule() {
    let store = SqliteStore::in_memory().unwrap();
    store.upsert_task(&task("t1", 60, 30, 60, Some(Duration::hours(24)))).unwrap();
    let service = SchedulerService::new(store, SchedulerConfig::default());

    let solution = service.schedule("u1", 2, &ScheduleOptions::default()).unwrap();

    assert!(solution.feasible);
    assert_eq!(solution.blocks.len(), 1);
    assert_eq!(solution.blocks[0].duration_minutes(), 60);

    let prefs = Preferences::default();
    check_invariants(&[task("t1", 60, 30, 60, Some(Duration::hours(24)))], &[], &prefs, 30, &solution);
}

/// Scenario 2: impossible deadline for one task must not break the rest.
#[test]
fn scenario_impossible_deadline_does_not_corrupt_other_work() {
    let store = SqliteStore::in_memory().unwrap();
    store.upsert_task(&task("impossible", 480, 30, 480, Some(Duration::hours(1)))).unwrap();
    store.upsert_task(&task("ok", 60, 30, 60, Some(Duration::hours(48)))).unwrap();
    let service = SchedulerService::new(store, SchedulerConfig::default());

    let solution = service.schedule("u1", 3, &ScheduleOptions::default()).unwrap();

    if solution.feasible {
        assert!(solution.unscheduled_tasks.contains(&"impossible".to_string()) || solution.blocks.iter().any(|b| b.task_id == "impossible"));
    } else {
        assert!(solution.blocks.iter().any(|b| b.task_id == "ok") || !solution.unscheduled_tasks.is_empty());
    }
}

/// Scenario 3: reshuffling the input task order must not change the solution.
#[test]
fn scenario_reshuffle_determinism() {
    let tasks = vec![
        task("a", 60, 30, 60, Some(Duration::hours(24))),
        task("b", 60, 30, 60, Some(Duration::hours(24))),
        task("c", 60, 30, 60, Some(Duration::hours(24))),
    ];

    let solve_in_order = |order: Vec<Task>| {
        let store = SqliteStore::in_memory().unwrap();
        for t in &order {
            store.upsert_task(t).unwrap();
        }
        let service = SchedulerService::new(store, SchedulerConfig::default());
        let mut solution = service.schedule("u1", 2, &ScheduleOptions::default()).unwrap();
        solution.sort_blocks();
        solution
    };

    let forward = solve_in_order(tasks.clone());
    let mut reversed = tasks.clone();
    reversed.reverse();
    let backward = solve_in_order(reversed);

    assert_eq!(forward.blocks.len(), backward.blocks.len());
    for (a, b) in forward.blocks.iter().zip(backward.blocks.iter()) {
        assert_eq!(a.task_id, b.task_id);
        assert_eq!(a.start, b.start);
        assert_eq!(a.end, b.end);
    }
}

/// Scenario 4: a small conflicting busy event should move only the
/// affected block, not thrash the whole schedule.
#[test]
fn scenario_no_thrash_on_small_conflict() {
    let store = SqliteStore::in_memory().unwrap();
    for (id, hours_out) in [("t1", 24), ("t2", 48), ("t3", 72)] {
        store.upsert_task(&task(id, 60, 30, 60, Some(Duration::hours(hours_out)))).unwrap();
    }
    let service = SchedulerService::new(store, SchedulerConfig::default());

    let first = service.schedule("u1", 4, &ScheduleOptions::default()).unwrap();
    assert!(first.feasible);

    // Reopen the store through the same service's repo handle to seed a
    // conflicting busy event, then re-solve with lockExisting=true.
    let repo = service.repo();
    if let Some(second_block) = first.blocks.get(1) {
        let conflict = busy_event("conflict1", second_block.start, second_block.start + Duration::hours(1), true);
        repo.upsert_busy_event("u1", &conflict).unwrap();
    }

    let options = ScheduleOptions { dry_run: false, lock_existing: true, extra: Default::default() };
    let second = service.schedule("u1", 4, &options).unwrap();
    assert!(second.feasible);

    let outcome = validate_no_thrash(&first.blocks, &second.blocks, Utc::now(), 0.4, 0);
    assert!(outcome.moved_ratio <= 0.4, "moved_ratio={}", outcome.moved_ratio);
}

/// Scenario 6: an unreasonably short solver time limit still returns a
/// feasible (possibly fallback) schedule with invariants intact.
#[test]
fn scenario_fallback_under_tight_time_limit() {
    let store = SqliteStore::in_memory().unwrap();
    for id in ["t1", "t2", "t3"] {
        store.upsert_task(&task(id, 60, 30, 60, Some(Duration::hours(24)))).unwrap();
    }
    let mut config = SchedulerConfig::default();
    config.solver.time_limit_seconds = 0.001;
    let service = SchedulerService::new(store, config);

    let solution = service.schedule("u1", 2, &ScheduleOptions::default()).unwrap();
    assert!(solution.feasible || !solution.blocks.is_empty());

    let prefs = Preferences::default();
    let tasks: Vec<Task> = ["t1", "t2", "t3"].iter().map(|id| task(id, 60, 30, 60, Some(Duration::hours(24)))).collect();
    check_invariants(&tasks, &[], &prefs, 30, &solution);
}

#[test]
fn scenario_idempotent_non_dry_run_requests_share_one_solve() {
    let store = SqliteStore::in_memory().unwrap();
    store.upsert_task(&task("t1", 60, 30, 60, Some(Duration::hours(24)))).unwrap();
    let service = SchedulerService::new(store, SchedulerConfig::default());

    let first = service.schedule("u1", 5, &ScheduleOptions::default()).unwrap();
    let second = service.schedule("u1", 5, &ScheduleOptions::default()).unwrap();

    assert_eq!(first.blocks.len(), second.blocks.len());
    for (a, b) in first.blocks.iter().zip(second.blocks.iter()) {
        assert_eq!(a.task_id, b.task_id);
        assert_eq!(a.start, b.start);
    }
}
