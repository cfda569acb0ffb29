//! The fallback placement strategy (§4.6), used when the primary solver
//! reports infeasible/error or exceeds its time budget with no adaptive
//! rescheduling in play. Simpler and faster: a single deadline/weight-ordered
//! pass over the free-slot gaps, no local search.

use crate::deterministic::stable_sort_tasks;
use crate::models::{BusyEvent, Preferences, ScheduleBlock, ScheduleSolution, SolverStatus, Task};
use crate::time_index::TimeIndex;
use std::collections::HashMap;

pub fn solve_greedy(tasks: &[Task], events: &[BusyEvent], prefs: &Preferences, index: &TimeIndex) -> ScheduleSolution {
    let started = std::time::Instant::now();
    let granularity = index.granularity_minutes;

    let mut available = vec![false; index.len()];
    for (s, e) in index.get_free_slots(events, prefs) {
        for i in s..e {
            available[i] = true;
        }
    }

    let mut ordered = tasks.to_vec();
    stable_sort_tasks(&mut ordered);

    let mut blocks = Vec::new();
    let mut unscheduled = Vec::new();
    let mut daily_minutes: HashMap<chrono::NaiveDate, i64> = HashMap::new();

    for task in &ordered {
        let slots_per_min_block = (task.min_block_minutes / granularity).max(1) as usize;
        let slots_needed = ((task.estimated_minutes + granularity - 1) / granularity) as usize;
        let max_end_slot = task.deadline.and_then(|d| index.datetime_to_index(d)).unwrap_or(index.len());
        let earliest_slot = task.earliest_start.and_then(|s| index.datetime_to_index(s)).unwrap_or(0);

        let mut remaining = slots_needed;
        let mut cursor = earliest_slot;

        while remaining > 0 && cursor < max_end_slot.min(index.len()) {
            if !available[cursor] {
                cursor += 1;
                continue;
            }
            let mut run_len = 0usize;
            while cursor + run_len < max_end_slot.min(index.len()) && available[cursor + run_len] {
                run_len += 1;
            }
            if run_len < slots_per_min_block {
                cursor += run_len.max(1);
                continue;
            }

            let day = index
                .index_to_datetime(cursor)
                .map(|dt| dt.date_naive())
                .unwrap_or_default();
            let already_today = *daily_minutes.get(&day).unwrap_or(&0);
            let room_slots = (((prefs.max_daily_effort_minutes as i64 - already_today).max(0)) / granularity as i64) as usize;
            let take = run_len.min(remaining).min(room_slots.max(0));

            if take < slots_per_min_block {
                cursor += run_len;
                continue;
            }

            let Some(start) = index.index_to_datetime(cursor) else { break };
            let Some(end) = index.slot_end(cursor + take - 1) else { break };
            blocks.push(ScheduleBlock {
                task_id: task.id.clone(),
                start,
                end,
                utility_score: None,
                estimated_completion_probability: None,
                locked: false,
                manual: false,
            });
            for i in cursor..cursor + take {
                available[i] = false;
            }
            *daily_minutes.entry(day).or_insert(0) += take as i64 * granularity as i64;
            remaining = remaining.saturating_sub(take);
            cursor += take;
        }

        if remaining > 0 {
            unscheduled.push(task.id.clone());
        }
    }

    let status = if unscheduled.is_empty() { SolverStatus::Fallback } else { SolverStatus::FallbackError };
    let mut solution = ScheduleSolution {
        feasible: unscheduled.is_empty(),
        blocks,
        solver_status: status,
        solve_time_ms: started.elapsed().as_millis() as u64,
        objective_value: 0.0,
        unscheduled_tasks: unscheduled,
        diagnostics: HashMap::new(),
    };
    solution.sort_blocks();
    solution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskKind;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn task(id: &str, minutes: u32) -> Task {
        Task {
            id: id.to_string(),
            owner_id: "u1".into(),
            title: id.to_string(),
            kind: TaskKind::Study,
            estimated_minutes: minutes,
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
        }
    }

    #[test]
    fn test_greedy_places_task_within_horizon() {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::days(2);
        let index = TimeIndex::new("UTC", start, end, 30).unwrap();
        let prefs = Preferences::default();
        let solution = solve_greedy(&[task("t1", 60)], &[], &prefs, &index);
        assert_eq!(solution.solver_status, SolverStatus::Fallback);
        assert!(solution.unscheduled_tasks.is_empty());
    }

    #[test]
    fn test_greedy_reports_unscheduled_when_no_capacity() {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let end = start + chrono::Duration::hours(1);
        let index = TimeIndex::new("UTC", start, end, 30).unwrap();
        let prefs = Preferences::default();
        let solution = solve_greedy(&[task("t1", 600)], &[], &prefs, &index);
        assert_eq!(solution.solver_status, SolverStatus::FallbackError);
        assert!(!solution.unscheduled_tasks.is_empty());
    }
}
