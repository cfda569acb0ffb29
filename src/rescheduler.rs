//! Handles missed blocks (§4.9): boosts the weight of tasks that missed their
//! scheduled slot, drops past blocks, and re-solves forward with existing
//! future blocks locked in place, subject to the no-thrash gate.

use crate::config::SolverConfig;
use crate::deterministic::{validate_no_thrash, DEFAULT_FROZEN_WINDOW_HOURS, DEFAULT_MAX_MOVE_RATIO_THRESHOLD};
use crate::models::{BusyEvent, CompletionEvent, PenaltyParams, Preferences, ScheduleBlock, ScheduleSolution, Task};
use crate::scheduler_solver::SchedulerSolver;
use crate::time_index::TimeIndex;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

const WEIGHT_BOOST_FACTOR: f64 = 1.5;
const MAX_WEIGHT: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct RescheduleOutcome {
    pub solution: ScheduleSolution,
    pub boosted_task_ids: Vec<String>,
    pub accepted: bool,
}

pub struct Rescheduler<'a> {
    pub solver_config: &'a SolverConfig,
    pub weights: &'a HashMap<String, f64>,
    pub penalties: &'a PenaltyParams,
}

impl<'a> Rescheduler<'a> {
    pub fn new(solver_config: &'a SolverConfig, weights: &'a HashMap<String, f64>, penalties: &'a PenaltyParams) -> Self {
        Self { solver_config, weights, penalties }
    }

    /// Finds blocks whose scheduled slot has passed with no matching
    /// completion event, boosts the owning task's weight, clears past blocks
    /// from the accepted solution, then re-solves with future blocks locked.
    pub fn reschedule_missed(
        &self,
        tasks: &[Task],
        previous_blocks: &[ScheduleBlock],
        completion_events: &[CompletionEvent],
        events: &[BusyEvent],
        prefs: &Preferences,
        index: &TimeIndex,
        now: DateTime<Utc>,
    ) -> RescheduleOutcome {
        let missed_task_ids = find_missed(previous_blocks, completion_events, now);

        let mut boosted = Vec::new();
        let mut tasks: Vec<Task> = tasks.to_vec();
        for task in &mut tasks {
            if missed_task_ids.contains(task.id.as_str()) {
                task.weight = (task.weight * WEIGHT_BOOST_FACTOR).min(MAX_WEIGHT);
                boosted.push(task.id.clone());
            }
        }

        let future_blocks: Vec<ScheduleBlock> = previous_blocks
            .iter()
            .filter(|b| b.start >= now)
            .cloned()
            .collect();

        let solver = SchedulerSolver::new(self.solver_config, self.weights, self.penalties);
        let solution = solver.solve(&tasks, events, prefs, index, &future_blocks, &HashMap::new());

        let no_thrash = validate_no_thrash(
            previous_blocks,
            &solution.blocks,
            now,
            DEFAULT_MAX_MOVE_RATIO_THRESHOLD,
            DEFAULT_FROZEN_WINDOW_HOURS,
        );

        RescheduleOutcome { solution, boosted_task_ids: boosted, accepted: no_thrash.accepted }
    }
}

/// A block is "missed" when its end has already passed and no completion
/// event with a matching task/slot exists, or the matching event itself
/// reports `missed()`.
fn find_missed<'b>(blocks: &'b [ScheduleBlock], completion_events: &[CompletionEvent], now: DateTime<Utc>) -> HashSet<&'b str> {
    let mut by_task: HashMap<&str, Vec<&CompletionEvent>> = HashMap::new();
    for event in completion_events {
        by_task.entry(event.task_id.as_str()).or_default().push(event);
    }

    blocks
        .iter()
        .filter(|b| b.end < now && !b.locked)
        .filter(|b| {
            let matching = by_task.get(b.task_id.as_str());
            match matching {
                None => true,
                Some(events) => events.iter().any(|e| e.scheduled_slot == b.start && e.missed()),
            }
        })
        .map(|b| b.task_id.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultWeights;
    use crate::models::TaskKind;
    use chrono::TimeZone;
    use std::collections::HashSet as HSet;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            owner_id: "u1".into(),
            title: id.to_string(),
            kind: TaskKind::Study,
            estimated_minutes: 30,
            min_block_minutes: 30,
            max_block_minutes: 30,
            deadline: None,
            earliest_start: None,
            weight: 1.0,
            prerequisites: HSet::new(),
            preferred_windows: Vec::new(),
            avoid_windows: Vec::new(),
            course_id: None,
            tags: Vec::new(),
        }
    }

    fn block(task_id: &str, start: DateTime<Utc>, locked: bool) -> ScheduleBlock {
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
    fn test_find_missed_without_completion_event() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let blocks = vec![block("t1", now - chrono::Duration::hours(1), false)];
        let missed = find_missed(&blocks, &[], now);
        assert!(missed.contains("t1"));
    }

    #[test]
    fn test_locked_blocks_never_missed() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap();
        let blocks = vec![block("t1", now - chrono::Duration::hours(1), true)];
        let missed = find_missed(&blocks, &[], now);
        assert!(missed.is_empty());
    }

    #[test]
    fn test_reschedule_boosts_missed_task_weight() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let start = now - chrono::Duration::days(1);
        let end = now + chrono::Duration::days(2);
        let index = TimeIndex::new("UTC", start, end, 30).unwrap();
        let prefs = Preferences::default();
        let config = crate::config::SolverConfig::default();
        let weights = DefaultWeights::default().as_map();
        let penalties = PenaltyParams::default();

        let previous = vec![block("t1", now - chrono::Duration::hours(2), false)];
        let rescheduler = Rescheduler::new(&config, &weights, &penalties);
        let outcome = rescheduler.reschedule_missed(&[task("t1")], &previous, &[], &[], &prefs, &index, now);

        assert_eq!(outcome.boosted_task_ids, vec!["t1".to_string()]);
    }
}
