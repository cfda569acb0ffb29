//! Orchestrates a single request end to end (§4.10): load state, pick
//! weights, solve (falling back to the greedy placer when the primary
//! solver can't produce a feasible plan), validate invariants, persist, and
//! cache the result under a deterministic idempotency key.

use crate::config::SchedulerConfig;
use crate::deterministic::create_request_hash;
use crate::error::{Error, Result};
use crate::greedy_fallback::solve_greedy;
use crate::invariant_checker::InvariantChecker;
use crate::models::{CompletionEvent, ScheduleSolution, SolverStatus};
use crate::repository::{BusyEventRepository, PreferenceRepository, ScheduleBlockRepository, TaskRepository};
use crate::rescheduler::Rescheduler;
use crate::scheduler_solver::SchedulerSolver;
use crate::time_index::TimeIndex;
use crate::weight_tuner::WeightTuner;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    pub dry_run: bool,
    pub lock_existing: bool,
    pub extra: HashMap<String, String>,
}

struct CacheEntry {
    inserted_at: Instant,
    solution: ScheduleSolution,
}

pub struct SchedulerService<R> {
    repo: R,
    config: SchedulerConfig,
    tuner: WeightTuner,
    idempotency_cache: Mutex<HashMap<String, CacheEntry>>,
}

impl<R> SchedulerService<R>
where
    R: TaskRepository + BusyEventRepository + PreferenceRepository + ScheduleBlockRepository,
{
    pub fn new(repo: R, config: SchedulerConfig) -> Self {
        let tuner = WeightTuner::new(config.learning.clone(), config.default_weights.clone());
        Self { repo, config, tuner, idempotency_cache: Mutex::new(HashMap::new()) }
    }

    /// `schedule` / `schedulePreview` per §4.10 — the only difference is
    /// whether the result is persisted (`dry_run`).
    pub fn schedule(&self, user_id: &str, horizon_days: u32, options: &ScheduleOptions) -> Result<ScheduleSolution> {
        if horizon_days == 0 || horizon_days > self.config.max_horizon_days {
            return Err(Error::Validation(format!(
                "horizonDays must be in 1..{}, got {}",
                self.config.max_horizon_days, horizon_days
            )));
        }

        let tasks = self.repo.list_tasks(user_id)?;
        let events = self.repo.list_busy_events(user_id)?;
        let prefs = self.repo.get_preferences(user_id)?;

        let cache_key = self.cache_key(user_id, horizon_days, options, &tasks, &events);
        if let Some(cached) = self.lookup_cache(&cache_key) {
            return Ok(cached);
        }

        let now = Utc::now();
        let horizon_end = now + chrono::Duration::days(horizon_days as i64);
        let index = TimeIndex::new(&prefs.timezone, now, horizon_end, self.config.time_granularity_minutes)?;

        let existing_blocks = if options.lock_existing {
            self.repo.list_schedule_blocks(user_id)?
        } else {
            Vec::new()
        };

        let weights = self.tuner.suggest_weights(&HashMap::new());
        let solver = SchedulerSolver::new(&self.config.solver, &weights, &prefs.penalties);
        let mut solution = solver.solve(&tasks, &events, &prefs, &index, &existing_blocks, &HashMap::new());

        if !solution.feasible && self.config.enable_fallback_solver {
            solution = solve_greedy(&tasks, &events, &prefs, &index);
        }

        if solution.feasible {
            let checker = InvariantChecker {
                tasks: &tasks,
                events: &events,
                prefs: &prefs,
                granularity_minutes: self.config.time_granularity_minutes,
                unscheduled_tasks: &solution.unscheduled_tasks,
            };
            let violations = checker.check(&solution.blocks);
            if !violations.is_empty() {
                let detail = violations
                    .iter()
                    .map(|v| v.detail.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(Error::Invariant(detail));
            }
        }

        if !options.dry_run && matches!(solution.solver_status, SolverStatus::Optimal | SolverStatus::Feasible | SolverStatus::Fallback) {
            self.repo.replace_schedule_blocks(user_id, &solution.blocks)?;
        }

        self.store_cache(cache_key, solution.clone());
        Ok(solution)
    }

    pub fn schedule_preview(&self, user_id: &str, horizon_days: u32, options: &ScheduleOptions) -> Result<ScheduleSolution> {
        let mut preview_options = options.clone();
        preview_options.dry_run = true;
        self.schedule(user_id, horizon_days, &preview_options)
    }

    pub fn reschedule_missed(&self, user_id: &str, horizon_days: u32) -> Result<ScheduleSolution> {
        let tasks = self.repo.list_tasks(user_id)?;
        let events = self.repo.list_busy_events(user_id)?;
        let prefs = self.repo.get_preferences(user_id)?;
        let previous_blocks = self.repo.list_schedule_blocks(user_id)?;
        let completion_events: Vec<CompletionEvent> = self.repo.list_completion_events(user_id)?;

        let now = Utc::now();
        let horizon_end = now + chrono::Duration::days(horizon_days as i64);
        let index = TimeIndex::new(&prefs.timezone, now, horizon_end, self.config.time_granularity_minutes)?;

        let weights = self.tuner.suggest_weights(&HashMap::new());
        let rescheduler = Rescheduler::new(&self.config.solver, &weights, &prefs.penalties);
        let outcome = rescheduler.reschedule_missed(&tasks, &previous_blocks, &completion_events, &events, &prefs, &index, now);

        if outcome.accepted {
            self.repo.replace_schedule_blocks(user_id, &outcome.solution.blocks)?;
        }
        Ok(outcome.solution)
    }

    /// Feeds a completed schedule's reward signal back into the bandit.
    pub fn update_learning(&self, weights_used: &HashMap<String, f64>, reward: f64) {
        self.tuner.update(weights_used, reward);
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    fn cache_key(
        &self,
        user_id: &str,
        horizon_days: u32,
        options: &ScheduleOptions,
        tasks: &[crate::models::Task],
        events: &[crate::models::BusyEvent],
    ) -> String {
        let hash = create_request_hash(tasks, events, horizon_days, user_id);
        let time_bucket = Utc::now().timestamp() / 3600;
        format!("{hash}:{}:{}:{}", options.dry_run, options.lock_existing, time_bucket)
    }

    fn lookup_cache(&self, key: &str) -> Option<ScheduleSolution> {
        let mut cache = self.idempotency_cache.lock().unwrap();
        let ttl = std::time::Duration::from_secs((self.config.cache.idempotency_ttl_minutes.max(0) as u64) * 60);
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < ttl {
                return Some(entry.solution.clone());
            }
        }
        cache.remove(key);
        None
    }

    fn store_cache(&self, key: String, solution: ScheduleSolution) {
        let mut cache = self.idempotency_cache.lock().unwrap();
        cache.insert(key, CacheEntry { inserted_at: Instant::now(), solution });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::models::{Task, TaskKind};
    use crate::repository::SqliteStore;
    use std::collections::HashSet;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            owner_id: "u1".into(),
            title: id.to_string(),
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
        }
    }

    #[test]
    fn test_schedule_persists_by_default() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_task(&task("t1")).unwrap();
        let service = SchedulerService::new(store, SchedulerConfig::default());
        let solution = service.schedule("u1", 7, &ScheduleOptions::default()).unwrap();
        assert!(solution.feasible);
        let persisted = service.repo.list_schedule_blocks("u1").unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[test]
    fn test_schedule_preview_does_not_persist() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_task(&task("t1")).unwrap();
        let service = SchedulerService::new(store, SchedulerConfig::default());
        let solution = service.schedule_preview("u1", 7, &ScheduleOptions::default()).unwrap();
        assert!(solution.feasible);
        let persisted = service.repo.list_schedule_blocks("u1").unwrap();
        assert!(persisted.is_empty());
    }

    #[test]
    fn test_invalid_horizon_rejected() {
        let store = SqliteStore::in_memory().unwrap();
        let service = SchedulerService::new(store, SchedulerConfig::default());
        let result = service.schedule("u1", 0, &ScheduleOptions::default());
        assert!(result.is_err());
    }
}
