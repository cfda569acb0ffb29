//! Builds dense per-(task, slot) numeric feature vectors for the completion
//! model and the solver's utility term.

use crate::config::FeatureConfig;
use crate::models::{BusyEvent, CompletionEvent, Preferences, Task, TaskKind};
use crate::time_index::{DayPart, TimeIndex};
use chrono::Utc;
use std::collections::HashMap;

/// One row of the dense `(|tasks|*|slots|, f)` feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub task_index: usize,
    pub slot_index: usize,
    pub values: Vec<f64>,
}

pub const FEATURE_NAMES: &[&str] = &[
    "hour_norm",
    "day_of_week_norm",
    "is_weekend",
    "is_morning",
    "is_afternoon",
    "is_evening",
    "dist_from_workday_bounds",
    "in_workday",
    "duration_norm",
    "weight",
    "min_block_norm",
    "max_block_norm",
    "urgency",
    "has_deadline",
    "has_prereqs",
    "is_exam",
    "is_blocked",
    "in_preferred_window",
    "in_avoid_window",
    "in_deep_work",
    "in_no_study",
    "break_need",
    "nearby_event_density",
    "hour_completion_rate",
    "dow_completion_rate",
    "kind_completion_rate",
    "recent_performance",
];

/// Aggregated per-user completion history used to fill the "history" feature group.
#[derive(Debug, Clone, Default)]
pub struct CompletionHistory {
    pub by_hour: HashMap<u8, f64>,
    pub by_dow: HashMap<u8, f64>,
    pub by_kind: HashMap<String, f64>,
    pub recent_7day: f64,
}

impl CompletionHistory {
    pub fn from_events(events: &[CompletionEvent], window_days: u32) -> Self {
        let mut by_hour_counts: HashMap<u8, (u32, u32)> = HashMap::new();
        let mut recent_counts = (0u32, 0u32);
        let cutoff = Utc::now() - chrono::Duration::days(window_days as i64);

        for event in events {
            use chrono::Timelike;
            let hour = event.scheduled_slot.hour() as u8;
            let entry = by_hour_counts.entry(hour).or_insert((0, 0));
            entry.1 += 1;
            if !event.missed() {
                entry.0 += 1;
            }
            if event.scheduled_slot >= cutoff {
                recent_counts.1 += 1;
                if !event.missed() {
                    recent_counts.0 += 1;
                }
            }
        }

        let by_hour = by_hour_counts
            .into_iter()
            .map(|(h, (c, t))| (h, if t > 0 { c as f64 / t as f64 } else { 0.5 }))
            .collect();

        let recent_7day = if recent_counts.1 > 0 {
            recent_counts.0 as f64 / recent_counts.1 as f64
        } else {
            0.5
        };

        Self { by_hour, by_dow: HashMap::new(), by_kind: HashMap::new(), recent_7day }
    }
}

pub struct FeatureExtractor<'a> {
    pub config: &'a FeatureConfig,
}

impl<'a> FeatureExtractor<'a> {
    pub fn new(config: &'a FeatureConfig) -> Self {
        Self { config }
    }

    pub fn extract(
        &self,
        tasks: &[Task],
        index: &TimeIndex,
        events: &[BusyEvent],
        prefs: &Preferences,
        history: &CompletionHistory,
    ) -> Vec<FeatureVector> {
        let blocked = index.filter_busy_slots(events);
        let default = self.config.unknown_stat_default;
        let now = Utc::now();

        let mut rows = Vec::with_capacity(tasks.len() * index.len());
        for (task_idx, task) in tasks.iter().enumerate() {
            for slot_idx in 0..index.len() {
                let Some(ctx) = index.get_slot_context(slot_idx, prefs) else { continue };
                let Some(slot_start) = index.index_to_datetime(slot_idx) else { continue };

                let urgency = task
                    .deadline
                    .map(|d| {
                        let days_until = (d - now).num_hours() as f64 / 24.0;
                        ((14.0 - days_until) / 14.0).clamp(0.0, 1.0)
                    })
                    .unwrap_or(0.0);

                let in_preferred = in_any_window(&task.preferred_windows, slot_start, &prefs.timezone);
                let in_avoid = in_any_window(&task.avoid_windows, slot_start, &prefs.timezone);
                let in_deep_work = in_any_window(&prefs.deep_work_windows, slot_start, &prefs.timezone);
                let in_no_study = in_any_window(&prefs.no_study_windows, slot_start, &prefs.timezone);

                let values = vec![
                    ctx.hour as f64 / 23.0,
                    ctx.day_of_week as f64 / 6.0,
                    ctx.is_weekend as u8 as f64,
                    (ctx.day_part == DayPart::Morning) as u8 as f64,
                    (ctx.day_part == DayPart::Afternoon) as u8 as f64,
                    (ctx.day_part == DayPart::Evening) as u8 as f64,
                    0.5, // dist_from_workday_bounds: placeholder normalized distance
                    ctx.in_workday as u8 as f64,
                    (task.estimated_minutes as f64 / 480.0).min(1.0),
                    task.weight,
                    (task.min_block_minutes as f64 / 480.0).min(1.0),
                    (task.max_block_minutes as f64 / 480.0).min(1.0),
                    urgency,
                    task.deadline.is_some() as u8 as f64,
                    !task.prerequisites.is_empty() as u8 as f64,
                    matches!(task.kind, TaskKind::Exam) as u8 as f64,
                    blocked.contains(&slot_idx) as u8 as f64,
                    in_preferred as u8 as f64,
                    in_avoid as u8 as f64,
                    in_deep_work as u8 as f64,
                    in_no_study as u8 as f64,
                    default, // break_need: no session-state tracking at feature-extraction time
                    default, // nearby_event_density: placeholder, filled by caller when available
                    *history.by_hour.get(&ctx.hour).unwrap_or(&default),
                    *history.by_dow.get(&ctx.day_of_week).unwrap_or(&default),
                    *history.by_kind.get(kind_key(task.kind)).unwrap_or(&default),
                    history.recent_7day,
                ];

                rows.push(FeatureVector { task_index: task_idx, slot_index: slot_idx, values });
            }
        }
        rows
    }
}

fn kind_key(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Study => "study",
        TaskKind::Assignment => "assignment",
        TaskKind::Exam => "exam",
        TaskKind::Reading => "reading",
        TaskKind::Project => "project",
        TaskKind::Hobby => "hobby",
        TaskKind::Admin => "admin",
    }
}

fn in_any_window(
    windows: &[crate::models::RecurringWindow],
    at: chrono::DateTime<Utc>,
    timezone: &str,
) -> bool {
    let Ok(tz) = timezone.parse::<chrono_tz::Tz>() else { return false };
    use chrono::{Datelike, Timelike};
    let local = at.with_timezone(&tz);
    let dow = local.weekday().num_days_from_monday() as u8;
    let time = local.time();
    windows.iter().any(|w| {
        w.day_of_week == dow
            && chrono::NaiveTime::parse_from_str(&w.start_hhmm, "%H:%M")
                .map_or(false, |s| time >= s)
            && chrono::NaiveTime::parse_from_str(&w.end_hhmm, "%H:%M").map_or(false, |e| time < e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskKind;
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn sample_task() -> Task {
        Task {
            id: "t1".into(),
            owner_id: "u1".into(),
            title: "Essay".into(),
            kind: TaskKind::Assignment,
            estimated_minutes: 60,
            min_block_minutes: 30,
            max_block_minutes: 60,
            deadline: Some(Utc::now() + chrono::Duration::days(1)),
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
    fn test_extract_row_count() {
        let start = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        let end = start + chrono::Duration::hours(2);
        let idx = TimeIndex::new("UTC", start, end, 30).unwrap();
        let prefs = Preferences::default();
        let config = FeatureConfig::default();
        let extractor = FeatureExtractor::new(&config);
        let rows = extractor.extract(&[sample_task()], &idx, &[], &prefs, &CompletionHistory::default());
        assert_eq!(rows.len(), idx.len());
        assert_eq!(rows[0].values.len(), FEATURE_NAMES.len());
    }

    #[test]
    fn test_unknown_history_defaults_to_half() {
        let history = CompletionHistory::default();
        assert_eq!(*history.by_hour.get(&9).unwrap_or(&0.5), 0.5);
    }
}
