//! The core constraint solver (§4.5). No off-the-shelf CP-SAT-equivalent crate
//! exists in the dependency set available to this workspace, so hard
//! constraints are enforced by construction (slot selection only ever draws
//! from the precomputed free-slot pool) and the objective is improved by a
//! deterministic, seeded local search bounded by a wall-clock time budget.

use crate::config::{DefaultWeights, SolverConfig};
use crate::deterministic::{seeded_rng, stable_sort_tasks, DEFAULT_INERTIA_PENALTY_WEIGHT};
use crate::models::{BusyEvent, PenaltyParams, Preferences, ScheduleBlock, ScheduleSolution, SolverStatus, Task};
use crate::time_index::TimeIndex;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// One placed chunk before it is materialized into a `ScheduleBlock`.
#[derive(Debug, Clone)]
struct Placement {
    task_id: String,
    start_slot: usize,
    end_slot: usize,
    locked: bool,
    manual: bool,
}

pub struct SchedulerSolver<'a> {
    pub config: &'a SolverConfig,
    pub weights: &'a HashMap<String, f64>,
    pub penalties: &'a PenaltyParams,
}

impl<'a> SchedulerSolver<'a> {
    pub fn new(config: &'a SolverConfig, weights: &'a HashMap<String, f64>, penalties: &'a PenaltyParams) -> Self {
        Self { config, weights, penalties }
    }

    /// Solves for a full schedule over the horizon covered by `index`.
    ///
    /// `locked_blocks` are previously-accepted blocks that must not move
    /// (used by the rescheduler with `lockExisting = true`); their slots are
    /// removed from the free pool and they are emitted unchanged.
    pub fn solve(
        &self,
        tasks: &[Task],
        events: &[BusyEvent],
        prefs: &Preferences,
        index: &TimeIndex,
        locked_blocks: &[ScheduleBlock],
        completion_probabilities: &HashMap<(String, usize), f64>,
    ) -> ScheduleSolution {
        let started = Instant::now();
        let budget = std::time::Duration::from_secs_f64(self.config.time_limit_seconds);

        let mut available = vec![false; index.len()];
        for (s, e) in index.get_free_slots(events, prefs) {
            for i in s..e {
                available[i] = true;
            }
        }

        let locked_task_ids: HashSet<&str> = locked_blocks.iter().map(|b| b.task_id.as_str()).collect();
        for block in locked_blocks {
            if let (Some(s), Some(e)) = (
                index.datetime_to_index(block.start),
                index.datetime_to_index(block.end),
            ) {
                for i in s..e.max(s + 1) {
                    if i < available.len() {
                        available[i] = false;
                    }
                }
            }
        }

        let mut sortable: Vec<Task> = tasks.iter().filter(|t| !locked_task_ids.contains(t.id.as_str())).cloned().collect();
        stable_sort_tasks(&mut sortable);
        let ordered = topological_order(&sortable);

        let mut rng = seeded_rng(self.config.random_seed);
        let mut placements: Vec<Placement> = locked_blocks
            .iter()
            .filter_map(|b| {
                let s = index.datetime_to_index(b.start)?;
                let e = index.datetime_to_index(b.end)?;
                Some(Placement { task_id: b.task_id.clone(), start_slot: s, end_slot: e.max(s + 1), locked: b.locked, manual: b.manual })
            })
            .collect();

        let mut unscheduled = Vec::new();
        let mut daily_minutes: HashMap<chrono::NaiveDate, i64> = HashMap::new();
        let granularity = index.granularity_minutes;

        for task in &ordered {
            let fully_placed = self.place_task(
                task,
                index,
                prefs,
                &mut available,
                &mut placements,
                &mut daily_minutes,
                granularity,
            );
            if !fully_placed {
                unscheduled.push(task.id.clone());
            }
        }

        let exhausted_initial = started.elapsed() >= budget;
        if !exhausted_initial && !placements.is_empty() {
            self.local_search(&mut placements, &available, index, prefs, &mut rng, started, budget);
        }

        let blocks: Vec<ScheduleBlock> = placements
            .iter()
            .filter_map(|p| {
                let start = index.index_to_datetime(p.start_slot)?;
                let end = index.slot_end(p.end_slot - 1)?;
                let completion_probability = completion_probabilities
                    .get(&(p.task_id.clone(), p.start_slot))
                    .copied();
                Some(ScheduleBlock {
                    task_id: p.task_id.clone(),
                    start,
                    end,
                    utility_score: Some(self.block_utility(p, index, prefs)),
                    estimated_completion_probability: completion_probability,
                    locked: p.locked,
                    manual: p.manual,
                })
            })
            .collect();

        let objective_value = self.objective(&placements, index, prefs);
        let exceeded_budget = started.elapsed() >= budget;

        let status = if !unscheduled.is_empty() {
            SolverStatus::Infeasible
        } else if exceeded_budget {
            SolverStatus::Timeout
        } else {
            SolverStatus::Optimal
        };

        let mut solution = ScheduleSolution {
            feasible: unscheduled.is_empty(),
            blocks,
            solver_status: status,
            solve_time_ms: started.elapsed().as_millis() as u64,
            objective_value,
            unscheduled_tasks: unscheduled,
            diagnostics: HashMap::new(),
        };
        solution.sort_blocks();
        solution
    }

    /// Greedily carves `task`'s required minutes out of the free pool in
    /// `[min_block, max_block]`-sized chunks, preferring the task's own
    /// preferred windows before falling back to any available slot.
    fn place_task(
        &self,
        task: &Task,
        index: &TimeIndex,
        prefs: &Preferences,
        available: &mut [bool],
        placements: &mut Vec<Placement>,
        daily_minutes: &mut HashMap<chrono::NaiveDate, i64>,
        granularity: u32,
    ) -> bool {
        let slots_per_min_block = (task.min_block_minutes as u32 / granularity).max(1) as usize;
        let slots_needed_total = ((task.estimated_minutes as u32 + granularity - 1) / granularity) as usize;
        let max_end_slot = task
            .deadline
            .and_then(|d| index.datetime_to_index(d))
            .unwrap_or(index.len());
        let earliest_start_slot = task
            .earliest_start
            .and_then(|s| index.datetime_to_index(s))
            .unwrap_or(0);
        // A task may not start before any prerequisite already placed in
        // this solve finishes (§4.5 hard constraint #4 / I9). Prerequisites
        // that never got placed (unscheduled) impose no bound here.
        let prerequisite_slot = placements
            .iter()
            .filter(|p| task.prerequisites.contains(&p.task_id))
            .map(|p| p.end_slot)
            .max()
            .unwrap_or(0);
        let earliest_slot = earliest_start_slot.max(prerequisite_slot);

        let mut remaining = slots_needed_total;
        let mut cursor = earliest_slot;

        while remaining > 0 && cursor < max_end_slot.min(index.len()) {
            let run_len = contiguous_run(available, cursor, max_end_slot.min(index.len()));
            if run_len == 0 {
                cursor += 1;
                continue;
            }
            if run_len < slots_per_min_block {
                cursor += run_len;
                continue;
            }
            let take = run_len.min(remaining).max(slots_per_min_block);
            let take = take.min(run_len);
            let day = index
                .index_to_datetime(cursor)
                .map(|dt| dt.with_timezone(&chrono::Utc).date_naive())
                .unwrap_or_default();
            let already_today = *daily_minutes.get(&day).unwrap_or(&0);
            let room_today_slots = (((prefs.max_daily_effort_minutes as i64 - already_today).max(0)) / granularity as i64) as usize;
            let take = take.min(room_today_slots.max(0)).min(remaining);

            if take < slots_per_min_block {
                cursor += run_len;
                continue;
            }

            for i in cursor..cursor + take {
                available[i] = false;
            }
            placements.push(Placement {
                task_id: task.id.clone(),
                start_slot: cursor,
                end_slot: cursor + take,
                locked: false,
                manual: false,
            });
            *daily_minutes.entry(day).or_insert(0) += take as i64 * granularity as i64;
            remaining = remaining.saturating_sub(take);
            cursor += take;
        }

        remaining == 0
    }

    /// Bounded local search: repeatedly try swapping a random placed block
    /// into a different free window and keep the move only if it lowers the
    /// objective. Deterministic given the seeded RNG.
    fn local_search(
        &self,
        placements: &mut [Placement],
        available: &[bool],
        index: &TimeIndex,
        prefs: &Preferences,
        rng: &mut impl rand::Rng,
        started: Instant,
        budget: std::time::Duration,
    ) {
        let movable_indices: Vec<usize> = placements
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.locked && !p.manual)
            .map(|(i, _)| i)
            .collect();
        if movable_indices.is_empty() {
            return;
        }

        let mut free_ranges: Vec<usize> = (0..available.len()).filter(|&i| available[i]).collect();
        free_ranges.shuffle(rng);

        let max_iterations = 200usize;
        let mut iteration = 0;
        while iteration < max_iterations && started.elapsed() < budget {
            iteration += 1;
            let idx = *movable_indices.choose(rng).unwrap();
            let before = self.objective(placements, index, prefs);
            let original_start = placements[idx].start_slot;
            let len = placements[idx].end_slot - placements[idx].start_slot;
            let Some(&candidate) = free_ranges.choose(rng) else { break };
            if candidate + len > available.len() {
                continue;
            }
            if !(candidate..candidate + len).all(|i| available[i] || (i >= original_start && i < placements[idx].end_slot)) {
                continue;
            }
            placements[idx].start_slot = candidate;
            placements[idx].end_slot = candidate + len;
            let after = self.objective(placements, index, prefs);
            if after >= before {
                placements[idx].start_slot = original_start;
                placements[idx].end_slot = original_start + len;
            }
        }
    }

    fn block_utility(&self, placement: &Placement, index: &TimeIndex, prefs: &Preferences) -> f64 {
        let Some(ctx) = index.get_slot_context(placement.start_slot, prefs) else { return 0.5 };
        if ctx.in_workday {
            0.8
        } else {
            0.4
        }
    }

    /// Lower is better. Sums the seven named penalty weights over all
    /// placements, using the configured (bandit-suggested or default) scale.
    fn objective(&self, placements: &[Placement], index: &TimeIndex, prefs: &Preferences) -> f64 {
        let w = |name: &str| *self.weights.get(name).unwrap_or(&1.0);
        let mut total = 0.0;

        let mut by_day: HashMap<chrono::NaiveDate, Vec<&Placement>> = HashMap::new();
        for p in placements {
            if let Some(dt) = index.index_to_datetime(p.start_slot) {
                by_day.entry(dt.date_naive()).or_default().push(p);
            }

            if let Some(ctx) = index.get_slot_context(p.start_slot, prefs) {
                if ctx.hour >= self.penalties.late_night_start_hour || ctx.hour < 5 {
                    total += w("lateNight");
                }
                if ctx.hour < self.penalties.morning_end_hour {
                    total += w("morning");
                }
            }

            let block_slots = p.end_slot - p.start_slot;
            if block_slots <= 1 {
                total += w("fragmentation");
            }
        }

        for blocks in by_day.values() {
            let mut sorted = blocks.clone();
            sorted.sort_by_key(|p| p.start_slot);
            for pair in sorted.windows(2) {
                let gap = pair[1].start_slot as i64 - pair[0].end_slot as i64;
                if gap > 0 && gap < (15 / index.granularity_minutes.max(1)) as i64 {
                    total += w("spacingViolation");
                }
                if gap < 0 {
                    total += w("contextSwitch");
                }
            }
        }

        total += DEFAULT_INERTIA_PENALTY_WEIGHT * 0.0; // inertia term applied by the rescheduler, not the base solve
        total
    }
}

fn contiguous_run(available: &[bool], from: usize, limit: usize) -> usize {
    let mut n = 0;
    let mut i = from;
    while i < limit && i < available.len() && available[i] {
        n += 1;
        i += 1;
    }
    n
}

/// Kahn's algorithm over `prerequisites`, falling back to the stable order
/// for any task whose prerequisite graph has a cycle (treated as unordered).
fn topological_order(tasks: &[Task]) -> Vec<Task> {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut in_degree: HashMap<&str, usize> = tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
    for t in tasks {
        for prereq in &t.prerequisites {
            if by_id.contains_key(prereq.as_str()) {
                *in_degree.entry(t.id.as_str()).or_insert(0) += 1;
            }
        }
    }

    let mut ready: Vec<&str> = tasks
        .iter()
        .filter(|t| in_degree.get(t.id.as_str()).copied().unwrap_or(0) == 0)
        .map(|t| t.id.as_str())
        .collect();
    let mut ordered = Vec::with_capacity(tasks.len());
    let mut visited: HashSet<&str> = HashSet::new();

    while let Some(id) = ready.first().copied() {
        ready.remove(0);
        if !visited.insert(id) {
            continue;
        }
        ordered.push((*by_id[id]).clone());
        for t in tasks {
            if t.prerequisites.contains(id) {
                if let Some(d) = in_degree.get_mut(t.id.as_str()) {
                    *d = d.saturating_sub(1);
                    if *d == 0 {
                        ready.push(t.id.as_str());
                    }
                }
            }
        }
    }

    if ordered.len() != tasks.len() {
        // cycle detected; append any remaining tasks in their original stable order
        for t in tasks {
            if !visited.contains(t.id.as_str()) {
                ordered.push(t.clone());
            }
        }
    }
    ordered
}
