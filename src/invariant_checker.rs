//! Post-solve validation of hard invariants (§4.8). Any violation is fatal:
//! callers must surface `solverStatus = error` and decline to persist.

use crate::models::{BusyEvent, Preferences, ScheduleBlock, Task};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invariant {
    NonOverlap,
    GridAlignment,
    Duration,
    TaskCompleteness,
    Deadline,
    HardBusy,
    WorkdayNoStudy,
    DailyCap,
    PrerequisiteOrder,
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub invariant: Invariant,
    pub detail: String,
}

pub struct InvariantChecker<'a> {
    pub tasks: &'a [Task],
    pub events: &'a [BusyEvent],
    pub prefs: &'a Preferences,
    pub granularity_minutes: u32,
    pub unscheduled_tasks: &'a [String],
}

impl<'a> InvariantChecker<'a> {
    pub fn check(&self, blocks: &[ScheduleBlock]) -> Vec<Violation> {
        let mut violations = Vec::new();
        self.check_non_overlap(blocks, &mut violations);
        self.check_grid_alignment(blocks, &mut violations);
        self.check_duration(blocks, &mut violations);
        self.check_task_completeness(blocks, &mut violations);
        self.check_deadline(blocks, &mut violations);
        self.check_hard_busy(blocks, &mut violations);
        self.check_workday_no_study(blocks, &mut violations);
        self.check_daily_cap(blocks, &mut violations);
        self.check_prerequisite_order(blocks, &mut violations);
        violations
    }

    fn check_non_overlap(&self, blocks: &[ScheduleBlock], out: &mut Vec<Violation>) {
        for (i, a) in blocks.iter().enumerate() {
            for b in &blocks[i + 1..] {
                if a.overlaps(b) {
                    out.push(Violation {
                        invariant: Invariant::NonOverlap,
                        detail: format!("{} overlaps {}", a.task_id, b.task_id),
                    });
                }
            }
        }
    }

    fn check_grid_alignment(&self, blocks: &[ScheduleBlock], out: &mut Vec<Violation>) {
        let g = self.granularity_minutes as i64;
        for b in blocks {
            if b.start.timestamp() % (g * 60) != 0 || b.end.timestamp() % (g * 60) != 0 {
                out.push(Violation {
                    invariant: Invariant::GridAlignment,
                    detail: format!("{} not aligned to {}-minute grid", b.task_id, g),
                });
            }
        }
    }

    fn check_duration(&self, blocks: &[ScheduleBlock], out: &mut Vec<Violation>) {
        let tasks_by_id: HashMap<&str, &Task> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        for b in blocks {
            let Some(task) = tasks_by_id.get(b.task_id.as_str()) else { continue };
            let duration = b.duration_minutes();
            if duration < task.min_block_minutes as i64 || duration > task.max_block_minutes as i64 {
                out.push(Violation {
                    invariant: Invariant::Duration,
                    detail: format!(
                        "{} block duration {}min outside [{}, {}]",
                        b.task_id, duration, task.min_block_minutes, task.max_block_minutes
                    ),
                });
            }
        }
    }

    fn check_task_completeness(&self, blocks: &[ScheduleBlock], out: &mut Vec<Violation>) {
        let unscheduled: HashSet<&str> = self.unscheduled_tasks.iter().map(|s| s.as_str()).collect();
        let g = self.granularity_minutes as i64;
        for task in self.tasks {
            if unscheduled.contains(task.id.as_str()) {
                continue;
            }
            let total: i64 = blocks.iter().filter(|b| b.task_id == task.id).map(|b| b.duration_minutes()).sum();
            let required = ((task.estimated_minutes as i64 + g - 1) / g) * g;
            if total != required && total != 0 {
                out.push(Violation {
                    invariant: Invariant::TaskCompleteness,
                    detail: format!("{} scheduled {}min, expected {}min", task.id, total, required),
                });
            } else if total == 0 {
                out.push(Violation {
                    invariant: Invariant::TaskCompleteness,
                    detail: format!("{} has no blocks and is not in unscheduledTasks", task.id),
                });
            }
        }
    }

    fn check_deadline(&self, blocks: &[ScheduleBlock], out: &mut Vec<Violation>) {
        let tasks_by_id: HashMap<&str, &Task> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        for b in blocks {
            if let Some(task) = tasks_by_id.get(b.task_id.as_str()) {
                if let Some(deadline) = task.deadline {
                    if b.end > deadline {
                        out.push(Violation {
                            invariant: Invariant::Deadline,
                            detail: format!("{} ends after deadline", b.task_id),
                        });
                    }
                }
            }
        }
    }

    fn check_hard_busy(&self, blocks: &[ScheduleBlock], out: &mut Vec<Violation>) {
        for b in blocks {
            for event in self.events.iter().filter(|e| e.hard) {
                if b.start < event.end && event.start < b.end {
                    out.push(Violation {
                        invariant: Invariant::HardBusy,
                        detail: format!("{} intersects hard event {}", b.task_id, event.id),
                    });
                }
            }
        }
    }

    fn check_workday_no_study(&self, blocks: &[ScheduleBlock], out: &mut Vec<Violation>) {
        let Ok(tz): Result<Tz, _> = self.prefs.timezone.parse() else { return };
        use chrono::{Datelike, Timelike};
        for b in blocks {
            let local = b.start.with_timezone(&tz);
            let dow = local.weekday().num_days_from_monday() as u8;
            let time = local.time();
            let hits = self.prefs.no_study_windows.iter().any(|w| {
                w.day_of_week == dow
                    && chrono::NaiveTime::parse_from_str(&w.start_hhmm, "%H:%M").map_or(false, |s| time >= s)
                    && chrono::NaiveTime::parse_from_str(&w.end_hhmm, "%H:%M").map_or(false, |e| time < e)
            });
            if hits {
                out.push(Violation {
                    invariant: Invariant::WorkdayNoStudy,
                    detail: format!("{} intersects a no-study window", b.task_id),
                });
            }
        }
    }

    fn check_daily_cap(&self, blocks: &[ScheduleBlock], out: &mut Vec<Violation>) {
        let Ok(tz): Result<Tz, _> = self.prefs.timezone.parse() else { return };
        let mut per_day: HashMap<chrono::NaiveDate, i64> = HashMap::new();
        for b in blocks {
            let day = b.start.with_timezone(&tz).date_naive();
            *per_day.entry(day).or_insert(0) += b.duration_minutes();
        }
        for (day, minutes) in per_day {
            if minutes > self.prefs.max_daily_effort_minutes as i64 {
                out.push(Violation {
                    invariant: Invariant::DailyCap,
                    detail: format!("{} has {}min scheduled, cap is {}min", day, minutes, self.prefs.max_daily_effort_minutes),
                });
            }
        }
    }

    fn check_prerequisite_order(&self, blocks: &[ScheduleBlock], out: &mut Vec<Violation>) {
        let mut last_end: HashMap<&str, chrono::DateTime<chrono::Utc>> = HashMap::new();
        let mut first_start: HashMap<&str, chrono::DateTime<chrono::Utc>> = HashMap::new();
        for b in blocks {
            last_end.entry(b.task_id.as_str())
                .and_modify(|e| *e = (*e).max(b.end))
                .or_insert(b.end);
            first_start.entry(b.task_id.as_str())
                .and_modify(|s| *s = (*s).min(b.start))
                .or_insert(b.start);
        }
        for task in self.tasks {
            for prereq in &task.prerequisites {
                if let (Some(prereq_end), Some(task_start)) = (last_end.get(prereq.as_str()), first_start.get(task.id.as_str())) {
                    if prereq_end > task_start {
                        out.push(Violation {
                            invariant: Invariant::PrerequisiteOrder,
                            detail: format!("{} starts before prerequisite {} finishes", task.id, prereq),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskKind;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

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
            prerequisites: HashSet::new(),
            preferred_windows: Vec::new(),
            avoid_windows: Vec::new(),
            course_id: None,
            tags: Vec::new(),
        }
    }

    fn block(task_id: &str, start: chrono::DateTime<Utc>) -> ScheduleBlock {
        ScheduleBlock {
            task_id: task_id.to_string(),
            start,
            end: start + chrono::Duration::minutes(30),
            utility_score: None,
            estimated_completion_probability: None,
            locked: false,
            manual: false,
        }
    }

    #[test]
    fn test_non_overlap_detects_violation() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let tasks = vec![task("t1"), task("t2")];
        let blocks = vec![block("t1", now), block("t2", now)];
        let checker = InvariantChecker {
            tasks: &tasks,
            events: &[],
            prefs: &Preferences::default(),
            granularity_minutes: 30,
            unscheduled_tasks: &[],
        };
        let violations = checker.check(&blocks);
        assert!(violations.iter().any(|v| v.invariant == Invariant::NonOverlap));
    }

    #[test]
    fn test_clean_schedule_has_no_violations() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let tasks = vec![task("t1")];
        let blocks = vec![block("t1", now)];
        let checker = InvariantChecker {
            tasks: &tasks,
            events: &[],
            prefs: &Preferences::default(),
            granularity_minutes: 30,
            unscheduled_tasks: &[],
        };
        assert!(checker.check(&blocks).is_empty());
    }

    #[test]
    fn test_prerequisite_violation() {
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 10, 0, 0).unwrap();
        let mut dependent = task("t2");
        dependent.prerequisites.insert("t1".to_string());
        let tasks = vec![task("t1"), dependent];
        let blocks = vec![block("t2", now), block("t1", now + chrono::Duration::hours(1))];
        let checker = InvariantChecker {
            tasks: &tasks,
            events: &[],
            prefs: &Preferences::default(),
            granularity_minutes: 30,
            unscheduled_tasks: &[],
        };
        let violations = checker.check(&blocks);
        assert!(violations.iter().any(|v| v.invariant == Invariant::PrerequisiteOrder));
    }
}
