//! Four contracts that together guarantee determinism and schedule stability
//! (§4.7): seeded RNG, stable task ordering, canonical request hashing, and
//! the no-thrash acceptance gate.

use crate::models::{BusyEvent, ScheduleBlock, Task};
use rand::{rngs::StdRng, SeedableRng};
use sha2::{Digest, Sha256};

pub const DEFAULT_MAX_MOVE_RATIO_THRESHOLD: f64 = 0.2;
pub const DEFAULT_FROZEN_WINDOW_HOURS: i64 = 12;
pub const DEFAULT_INERTIA_PENALTY_WEIGHT: f64 = 5.0;
const MOVE_THRESHOLD_MINUTES: i64 = 15;

/// All pseudo-random generators downstream of a solve are seeded from this
/// single config value; no wall-clock input may influence it.
pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Orders tasks by `(deadline asc with null-last, -weight, courseId, id)`,
/// stably.
pub fn stable_sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        let deadline_cmp = match (a.deadline, b.deadline) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        deadline_cmp
            .then_with(|| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.course_id.cmp(&b.course_id))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// An order-independent, canonical hash over tasks and events: sort by id
/// first, then hash, so reordering the input list never changes the hash.
pub fn create_request_hash(tasks: &[Task], events: &[BusyEvent], horizon_days: u32, user_id: &str) -> String {
    let mut task_ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    task_ids.sort_unstable();

    let mut event_ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    event_ids.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(horizon_days.to_le_bytes());
    for id in &task_ids {
        hasher.update(id.as_bytes());
        hasher.update([0u8]); // separator, avoids id concatenation collisions
    }
    for id in &event_ids {
        hasher.update(id.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct NoThrashOutcome {
    pub accepted: bool,
    pub moved_ratio: f64,
    pub frozen_window_violations: Vec<String>,
}

/// Compares a previous accepted solution against a freshly solved one and
/// decides whether the new solution may be accepted as-is.
pub fn validate_no_thrash(
    previous: &[ScheduleBlock],
    proposed: &[ScheduleBlock],
    now: chrono::DateTime<chrono::Utc>,
    max_move_ratio_threshold: f64,
    frozen_window_hours: i64,
) -> NoThrashOutcome {
    let frozen_until = now + chrono::Duration::hours(frozen_window_hours);
    let mut moved = 0usize;
    let mut frozen_violations = Vec::new();

    for prev_block in previous {
        let Some(new_block) = proposed.iter().find(|b| b.task_id == prev_block.task_id) else {
            continue;
        };
        let shift_minutes = (new_block.start - prev_block.start).num_minutes().abs();
        let did_move = shift_minutes > MOVE_THRESHOLD_MINUTES;

        if did_move {
            moved += 1;
        }

        if prev_block.start < frozen_until && did_move {
            frozen_violations.push(prev_block.task_id.clone());
        }
        if (prev_block.locked || prev_block.manual) && shift_minutes > 0 {
            frozen_violations.push(prev_block.task_id.clone());
        }
    }

    let moved_ratio = moved as f64 / (previous.len().max(1) as f64);
    let accepted = moved_ratio <= max_move_ratio_threshold && frozen_violations.is_empty();

    NoThrashOutcome { accepted, moved_ratio, frozen_window_violations: frozen_violations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BusyEventSource, TaskKind};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn task(id: &str, deadline_hours: Option<i64>, weight: f64) -> Task {
        Task {
            id: id.to_string(),
            owner_id: "u1".into(),
            title: id.to_string(),
            kind: TaskKind::Study,
            estimated_minutes: 60,
            min_block_minutes: 30,
            max_block_minutes: 60,
            deadline: deadline_hours.map(|h| Utc::now() + chrono::Duration::hours(h)),
            earliest_start: None,
            weight,
            prerequisites: HashSet::new(),
            preferred_windows: Vec::new(),
            avoid_windows: Vec::new(),
            course_id: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn test_stable_sort_deadline_then_weight() {
        let mut tasks = vec![task("b", Some(48), 1.0), task("a", Some(24), 1.0), task("c", None, 1.0)];
        stable_sort_tasks(&mut tasks);
        assert_eq!(tasks[0].id, "a");
        assert_eq!(tasks[1].id, "b");
        assert_eq!(tasks[2].id, "c"); // null deadline sorts last
    }

    #[test]
    fn test_request_hash_order_independent() {
        let t1 = task("t1", None, 1.0);
        let t2 = task("t2", None, 1.0);
        let h1 = create_request_hash(&[t1.clone(), t2.clone()], &[], 7, "u1");
        let h2 = create_request_hash(&[t2, t1], &[], 7, "u1");
        assert_eq!(h1, h2);
    }

    fn block(task_id: &str, start: chrono::DateTime<Utc>, locked: bool) -> ScheduleBlock {
        ScheduleBlock {
            task_id: task_id.to_string(),
            start,
            end: start + chrono::Duration::minutes(30),
            utility_score: None,
            estimated_completion_probability: None,
            locked,
            manual: false,
        }
    }

    #[test]
    fn test_no_thrash_accepts_small_perturbation() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let previous = vec![
            block("t1", now + chrono::Duration::hours(1), false),
            block("t2", now + chrono::Duration::hours(2), false),
            block("t3", now + chrono::Duration::hours(3), false),
        ];
        let mut proposed = previous.clone();
        proposed[1].start += chrono::Duration::hours(1); // only t2 moves, outside frozen window

        let outcome = validate_no_thrash(&previous, &proposed, now, 0.2, 0);
        assert!(outcome.accepted);
        assert!(outcome.moved_ratio <= 0.34);
    }

    #[test]
    fn test_no_thrash_rejects_locked_block_move() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let previous = vec![block("t1", now + chrono::Duration::hours(1), true)];
        let mut proposed = previous.clone();
        proposed[0].start += chrono::Duration::minutes(30);

        let outcome = validate_no_thrash(&previous, &proposed, now, 1.0, 12);
        assert!(!outcome.accepted);
        assert!(outcome.frozen_window_violations.contains(&"t1".to_string()));
    }
}
