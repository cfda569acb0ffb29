//! The user-facing, progress-tracked lifecycle object for an agent operation
//! (§4.13). `activeTasks` is a process-wide map of per-card locks: updates
//! serialize per task id, reads are concurrent-safe.

use crate::error::{Error, Result};
use crate::models::{AgentTaskCard, AgentTaskStatus, StepStatus, TaskStep};
use crate::repository::AgentTaskRepository;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

const COMPLETE_CLEANUP_DELAY: Duration = Duration::from_secs(60);
const FAIL_CLEANUP_DELAY: Duration = Duration::from_secs(120);
const TRANSIENT_MARKERS: &[&str] = &["5xx", "server error", "gateway", "timeout", "connection", "network"];
const RETRY_BACKOFFS_SECONDS: &[u64] = &[1, 2, 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventType {
    Created,
    Progress,
    StepCompleted,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrudOperation {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrudOutcome {
    Success,
    Failure,
}

/// A short-lived, progress-free event carrying the result of a direct CRUD
/// action (§4.13 "CRUD success/failure cards").
#[derive(Debug, Clone)]
pub struct CrudEventCard {
    pub operation: CrudOperation,
    pub entity_type: String,
    pub entity_title: String,
    pub entity_id: Option<String>,
    pub details: HashMap<String, String>,
    pub acknowledgement_message: Option<String>,
}

/// The websocket emission boundary this manager writes through (§4.16
/// provides the concrete implementation). Kept synchronous: a real sender
/// enqueues onto a non-blocking channel rather than awaiting the network.
pub trait TaskEventSink: Send + Sync {
    fn emit_task_event(&self, user_id: &str, conversation_id: Option<&str>, event: TaskEventType, card: &AgentTaskCard) -> bool;
    fn emit_crud_event(&self, user_id: &str, conversation_id: Option<&str>, outcome: CrudOutcome, card: &CrudEventCard) -> bool;
}

fn is_transient(err: &Error) -> bool {
    match err {
        Error::Infrastructure(msg) => {
            let lower = msg.to_lowercase();
            TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
        }
        _ => false,
    }
}

pub struct AgentTaskManager<R, N> {
    repo: R,
    sink: N,
    active_tasks: Arc<RwLock<HashMap<String, Arc<Mutex<AgentTaskCard>>>>>,
}

impl<R, N> AgentTaskManager<R, N>
where
    R: AgentTaskRepository,
    N: TaskEventSink,
{
    pub fn new(repo: R, sink: N) -> Self {
        Self { repo, sink, active_tasks: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn create_workflow_task(
        &self,
        id: String,
        user_id: &str,
        conversation_id: Option<String>,
        task_type: &str,
        title: &str,
        description: &str,
        step_names: &[&str],
        can_cancel: bool,
        workflow_type: Option<String>,
        workflow_id: Option<String>,
    ) -> Result<AgentTaskCard> {
        let now = Utc::now();
        let card = AgentTaskCard {
            id,
            user_id: user_id.to_string(),
            conversation_id,
            task_type: task_type.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: AgentTaskStatus::Pending,
            progress: 0,
            steps: step_names
                .iter()
                .map(|name| TaskStep { name: name.to_string(), description: String::new(), status: StepStatus::Pending, timestamp: now, details: None })
                .collect(),
            result: None,
            error_message: None,
            workflow_type,
            workflow_id,
            can_cancel,
            estimated_duration_seconds: None,
            created_at: now,
            started_at: Some(now),
            updated_at: now,
            completed_at: None,
        };

        self.persist_with_retry(&card);
        self.insert_active(card.clone());
        self.sink.emit_task_event(&card.user_id, card.conversation_id.as_deref(), TaskEventType::Created, &card);
        Ok(card)
    }

    pub fn update_task_progress(
        &self,
        task_id: &str,
        progress: Option<u8>,
        current_step: Option<&str>,
        status: Option<AgentTaskStatus>,
    ) -> Result<AgentTaskCard> {
        let lock = self.get_active(task_id)?;
        let snapshot = {
            let mut card = lock.lock().unwrap();
            if let Some(step_name) = current_step {
                if let Some(step) = card.steps.iter_mut().find(|s| s.name == step_name) {
                    if step.status == StepStatus::Pending {
                        step.status = StepStatus::InProgress;
                        step.timestamp = Utc::now();
                    }
                }
            }
            if let Some(p) = progress {
                card.progress = p.min(100);
            }
            if let Some(s) = status {
                card.status = s;
            }
            card.updated_at = Utc::now();
            card.clone()
        };
        self.persist_with_retry(&snapshot);
        self.sink.emit_task_event(&snapshot.user_id, snapshot.conversation_id.as_deref(), TaskEventType::Progress, &snapshot);
        Ok(snapshot)
    }

    pub fn complete_task_step(&self, task_id: &str, step_name: &str, result: Option<serde_json::Value>) -> Result<AgentTaskCard> {
        let lock = self.get_active(task_id)?;
        let snapshot = {
            let mut card = lock.lock().unwrap();
            if let Some(step) = card.steps.iter_mut().find(|s| s.name == step_name) {
                step.status = StepStatus::Completed;
                step.timestamp = Utc::now();
                if let Some(r) = &result {
                    step.details = Some(r.to_string());
                }
            }
            let total = card.steps.len().max(1);
            let completed = card.steps.iter().filter(|s| s.status == StepStatus::Completed).count();
            card.progress = ((completed * 100) / total) as u8;
            if card.status == AgentTaskStatus::Pending {
                card.status = AgentTaskStatus::InProgress;
            }
            card.updated_at = Utc::now();
            card.clone()
        };
        self.persist_with_retry(&snapshot);
        self.sink.emit_task_event(&snapshot.user_id, snapshot.conversation_id.as_deref(), TaskEventType::StepCompleted, &snapshot);
        Ok(snapshot)
    }

    pub fn complete_task(&self, task_id: &str, result: Option<serde_json::Value>) -> Result<AgentTaskCard> {
        let lock = self.get_active(task_id)?;
        let snapshot = {
            let mut card = lock.lock().unwrap();
            let now = Utc::now();
            for step in &mut card.steps {
                step.status = StepStatus::Completed;
                step.timestamp = now;
            }
            card.status = AgentTaskStatus::Completed;
            card.progress = 100;
            card.completed_at = Some(now);
            card.updated_at = now;
            card.result = result;
            card.clone()
        };
        self.persist_with_retry(&snapshot);
        self.sink.emit_task_event(&snapshot.user_id, snapshot.conversation_id.as_deref(), TaskEventType::Completed, &snapshot);
        self.schedule_cleanup(task_id.to_string(), COMPLETE_CLEANUP_DELAY);
        Ok(snapshot)
    }

    pub fn fail_task(&self, task_id: &str, error_message: &str) -> Result<AgentTaskCard> {
        let lock = self.get_active(task_id)?;
        let snapshot = {
            let mut card = lock.lock().unwrap();
            card.status = AgentTaskStatus::Failed;
            card.error_message = Some(error_message.to_string());
            card.updated_at = Utc::now();
            card.clone()
        };
        self.persist_with_retry(&snapshot);
        self.sink.emit_task_event(&snapshot.user_id, snapshot.conversation_id.as_deref(), TaskEventType::Failed, &snapshot);
        self.schedule_cleanup(task_id.to_string(), FAIL_CLEANUP_DELAY);
        Ok(snapshot)
    }

    pub fn cancel_task(&self, task_id: &str, reason: &str) -> Result<AgentTaskCard> {
        let lock = self.get_active(task_id)?;
        let can_cancel = lock.lock().unwrap().can_cancel;
        if !can_cancel {
            return Err(Error::Validation(format!("task {task_id} cannot be cancelled")));
        }
        let snapshot = {
            let mut card = lock.lock().unwrap();
            card.status = AgentTaskStatus::Cancelled;
            card.error_message = Some(reason.to_string());
            card.updated_at = Utc::now();
            card.clone()
        };
        self.persist_with_retry(&snapshot);
        self.sink.emit_task_event(&snapshot.user_id, snapshot.conversation_id.as_deref(), TaskEventType::Cancelled, &snapshot);
        self.active_tasks.write().unwrap().remove(task_id);
        Ok(snapshot)
    }

    pub fn emit_crud_success(&self, user_id: &str, conversation_id: Option<&str>, card: CrudEventCard) {
        self.sink.emit_crud_event(user_id, conversation_id, CrudOutcome::Success, &card);
    }

    pub fn emit_crud_failure(&self, user_id: &str, conversation_id: Option<&str>, card: CrudEventCard) {
        self.sink.emit_crud_event(user_id, conversation_id, CrudOutcome::Failure, &card);
    }

    /// `upsert` with retry/backoff on transient errors (§4.13 "Persistence").
    /// Non-transient errors are logged and swallowed: the card stays valid in
    /// memory regardless of persistence outcome.
    fn persist_with_retry(&self, card: &AgentTaskCard) {
        let mut attempt = 0;
        loop {
            match self.repo.upsert_agent_task(card) {
                Ok(()) => return,
                Err(e) if is_transient(&e) && attempt < RETRY_BACKOFFS_SECONDS.len() => {
                    tracing::warn!(task_id = %card.id, attempt, error = %e, "transient agent task write failure, retrying");
                    std::thread::sleep(Duration::from_secs(RETRY_BACKOFFS_SECONDS[attempt]));
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(task_id = %card.id, error = %e, "agent task write failed, keeping in-memory card");
                    return;
                }
            }
        }
    }

    fn insert_active(&self, card: AgentTaskCard) {
        self.active_tasks.write().unwrap().insert(card.id.clone(), Arc::new(Mutex::new(card)));
    }

    fn get_active(&self, task_id: &str) -> Result<Arc<Mutex<AgentTaskCard>>> {
        if let Some(existing) = self.active_tasks.read().unwrap().get(task_id) {
            return Ok(existing.clone());
        }
        let card = self
            .repo
            .get_agent_task(task_id)?
            .ok_or_else(|| Error::Validation(format!("unknown task {task_id}")))?;
        let arc = Arc::new(Mutex::new(card));
        self.active_tasks.write().unwrap().insert(task_id.to_string(), arc.clone());
        Ok(arc)
    }

    fn schedule_cleanup(&self, task_id: String, delay: Duration) {
        let active = self.active_tasks.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                active.write().unwrap().remove(&task_id);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SqliteStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        events: AtomicUsize,
    }
    impl TaskEventSink for CountingSink {
        fn emit_task_event(&self, _user_id: &str, _conversation_id: Option<&str>, _event: TaskEventType, _card: &AgentTaskCard) -> bool {
            self.events.fetch_add(1, Ordering::SeqCst);
            true
        }
        fn emit_crud_event(&self, _user_id: &str, _conversation_id: Option<&str>, _outcome: CrudOutcome, _card: &CrudEventCard) -> bool {
            true
        }
    }

    #[test]
    fn test_create_workflow_task_starts_pending() {
        let manager = AgentTaskManager::new(SqliteStore::in_memory().unwrap(), CountingSink::default());
        let card = manager
            .create_workflow_task("t1".into(), "u1", None, "tasks", "Create task", "desc", &["extract", "create"], true, None, None)
            .unwrap();
        assert_eq!(card.status, AgentTaskStatus::Pending);
        assert_eq!(card.steps.len(), 2);
    }

    #[test]
    fn test_complete_task_step_recomputes_progress() {
        let manager = AgentTaskManager::new(SqliteStore::in_memory().unwrap(), CountingSink::default());
        manager
            .create_workflow_task("t1".into(), "u1", None, "tasks", "Create task", "desc", &["extract", "create"], true, None, None)
            .unwrap();
        let card = manager.complete_task_step("t1", "extract", None).unwrap();
        assert_eq!(card.progress, 50);
        assert_eq!(card.status, AgentTaskStatus::InProgress);
    }

    #[test]
    fn test_complete_task_sets_status_and_progress() {
        let manager = AgentTaskManager::new(SqliteStore::in_memory().unwrap(), CountingSink::default());
        manager.create_workflow_task("t1".into(), "u1", None, "tasks", "Create task", "desc", &["extract"], true, None, None).unwrap();
        let card = manager.complete_task("t1", None).unwrap();
        assert_eq!(card.status, AgentTaskStatus::Completed);
        assert_eq!(card.progress, 100);
        assert!(card.completed_at.is_some());
    }

    #[test]
    fn test_cancel_task_rejected_when_not_cancellable() {
        let manager = AgentTaskManager::new(SqliteStore::in_memory().unwrap(), CountingSink::default());
        manager.create_workflow_task("t1".into(), "u1", None, "tasks", "Create task", "desc", &[], false, None, None).unwrap();
        let result = manager.cancel_task("t1", "user changed their mind");
        assert!(result.is_err());
    }

    #[test]
    fn test_cancel_task_removes_from_active_set_immediately() {
        let manager = AgentTaskManager::new(SqliteStore::in_memory().unwrap(), CountingSink::default());
        manager.create_workflow_task("t1".into(), "u1", None, "tasks", "Create task", "desc", &[], true, None, None).unwrap();
        manager.cancel_task("t1", "user changed their mind").unwrap();
        assert!(manager.active_tasks.read().unwrap().get("t1").is_none());
    }
}
