//! Solver hot-path benchmarks across small/medium/large task loads.
//! Repurposed from the teacher's `pattern_matching` bench (same
//! small/medium/large scaling shape, same `criterion` harness).

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pulse_scheduler_core::config::SolverConfig;
use pulse_scheduler_core::models::{PenaltyParams, Preferences, Task, TaskKind};
use pulse_scheduler_core::scheduler_solver::SchedulerSolver;
use pulse_scheduler_core::time_index::TimeIndex;
use std::collections::{HashMap, HashSet};

fn make_tasks(n: usize) -> Vec<Task> {
    (0..n)
        .map(|i| Task {
            id: format!("t{i}"),
            owner_id: "bench-user".to_string(),
            title: format!("task {i}"),
            kind: TaskKind::Study,
            estimated_minutes: 60,
            min_block_minutes: 30,
            max_block_minutes: 60,
            deadline: None,
            earliest_start: None,
            weight: 1.0,
            prerequisites: HashSet::new(),
            preferred_windows: Vec::new(),
            avoid_windows: Vec::new(),
            course_id: None,
            tags: Vec::new(),
        })
        .collect()
}

fn bench_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_solve");
    let prefs = Preferences::default();
    let penalties = PenaltyParams::default();
    let weights = HashMap::new();
    let config = SolverConfig::default();

    for size in [10usize, 100, 500] {
        let tasks = make_tasks(size);
        let now = Utc::now();
        let index = TimeIndex::new(&prefs.timezone, now, now + chrono::Duration::days(7), config.granularity_minutes).unwrap();
        let solver = SchedulerSolver::new(&config, &weights, &penalties);

        group.bench_with_input(BenchmarkId::new("tasks", size), &size, |b, _| {
            b.iter(|| {
                let solution = solver.solve(black_box(&tasks), &[], &prefs, &index, &[], &HashMap::new());
                black_box(solution)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_solve);
criterion_main!(benches);
