//! Core data model shared by the scheduling engine and the agent orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Study,
    Assignment,
    Exam,
    Reading,
    Project,
    Hobby,
    Admin,
}

/// A weekly recurring interval: day-of-week (0 = Monday .. 6 = Sunday) plus
/// HH:MM local start/end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringWindow {
    pub day_of_week: u8,
    pub start_hhmm: String,
    pub end_hhmm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub kind: TaskKind,
    pub estimated_minutes: u32,
    pub min_block_minutes: u32,
    pub max_block_minutes: u32,
    pub deadline: Option<DateTime<Utc>>,
    pub earliest_start: Option<DateTime<Utc>>,
    pub weight: f64,
    pub prerequisites: HashSet<String>,
    pub preferred_windows: Vec<RecurringWindow>,
    pub avoid_windows: Vec<RecurringWindow>,
    pub course_id: Option<String>,
    pub tags: Vec<String>,
}

impl Task {
    /// Normalizes `minBlockMinutes`/`maxBlockMinutes` so `min <= max <= estimated`,
    /// per spec §3, and validates the `estimatedMinutes > 0` invariant.
    pub fn normalize(&mut self) -> crate::error::Result<()> {
        if self.estimated_minutes == 0 {
            return Err(crate::error::Error::Validation(format!(
                "task {}: estimatedMinutes must be > 0",
                self.id
            )));
        }
        if self.max_block_minutes == 0 || self.max_block_minutes > self.estimated_minutes {
            self.max_block_minutes = self.estimated_minutes;
        }
        if self.min_block_minutes == 0 || self.min_block_minutes > self.max_block_minutes {
            self.min_block_minutes = self.max_block_minutes.min(self.min_block_minutes.max(1));
        }
        if self.min_block_minutes > self.max_block_minutes {
            self.min_block_minutes = self.max_block_minutes;
        }
        Ok(())
    }

    pub fn max_blocks(&self) -> u32 {
        if self.min_block_minutes == 0 {
            1
        } else {
            (self.estimated_minutes + self.min_block_minutes - 1) / self.min_block_minutes
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusyEventSource {
    Google,
    Microsoft,
    Pulse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyEvent {
    pub id: String,
    pub source: BusyEventSource,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub title: String,
    pub hard: bool,
    pub movable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyParams {
    pub late_night_start_hour: u8,
    pub morning_end_hour: u8,
}

impl Default for PenaltyParams {
    fn default() -> Self {
        Self { late_night_start_hour: 22, morning_end_hour: 9 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub timezone: String,
    pub workday_start: String,
    pub workday_end: String,
    pub max_daily_effort_minutes: u32,
    pub session_granularity_minutes: u32,
    pub break_every_minutes: u32,
    pub break_duration_minutes: u32,
    pub deep_work_windows: Vec<RecurringWindow>,
    pub no_study_windows: Vec<RecurringWindow>,
    pub min_gap_between_blocks_minutes: u32,
    pub penalties: PenaltyParams,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            workday_start: "09:00".to_string(),
            workday_end: "17:00".to_string(),
            max_daily_effort_minutes: 240,
            session_granularity_minutes: 30,
            break_every_minutes: 90,
            break_duration_minutes: 10,
            deep_work_windows: Vec::new(),
            no_study_windows: Vec::new(),
            min_gap_between_blocks_minutes: 15,
            penalties: PenaltyParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleBlock {
    pub task_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub utility_score: Option<f64>,
    pub estimated_completion_probability: Option<f64>,
    pub locked: bool,
    pub manual: bool,
}

impl ScheduleBlock {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &ScheduleBlock) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Optimal,
    Feasible,
    Infeasible,
    Timeout,
    Error,
    NoSolver,
    FallbackError,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSolution {
    pub feasible: bool,
    pub blocks: Vec<ScheduleBlock>,
    pub solver_status: SolverStatus,
    pub solve_time_ms: u64,
    pub objective_value: f64,
    pub unscheduled_tasks: Vec<String>,
    pub diagnostics: std::collections::HashMap<String, String>,
}

impl ScheduleSolution {
    /// Sorts blocks by `(start, taskId)` per the tie-breaking rule in §4.5.
    pub fn sort_blocks(&mut self) {
        self.blocks.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.task_id.cmp(&b.task_id)));
    }
}

/// Body of `POST /schedule/feedback` (§6): a reward signal for the weights
/// a prior schedule was solved with, fed back into the bandit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub weights_used: std::collections::HashMap<String, f64>,
    pub reward: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub task_id: String,
    pub scheduled_slot: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: std::collections::HashMap<String, String>,
}

impl CompletionEvent {
    pub fn missed(&self) -> bool {
        self.completed_at.is_none()
    }
}

// ---- Agent orchestration data model -----------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub id: String,
    pub question: String,
    pub context: ClarificationContext,
    pub expected_response_type: String,
    pub timeout: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationContext {
    pub action: String,
    pub intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub user_id: String,
    pub active_workflow: Option<String>,
    pub workflow_context: std::collections::HashMap<String, String>,
    pub pending_clarifications: Vec<ClarificationRequest>,
    pub task_queue: Vec<AgentTaskCard>,
    pub can_switch: bool,
    pub last_activity: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(conversation_id: String, user_id: String) -> Self {
        Self {
            conversation_id,
            user_id,
            active_workflow: None,
            workflow_context: std::collections::HashMap::new(),
            pending_clarifications: Vec::new(),
            task_queue: Vec::new(),
            can_switch: true,
            last_activity: Utc::now(),
        }
    }

    /// Drops expired clarifications (§3 invariant: "expired requests are
    /// filtered on read"); returns true if anything was dropped.
    pub fn prune_expired_clarifications(&mut self, now: DateTime<Utc>) -> bool {
        let before = self.pending_clarifications.len();
        self.pending_clarifications.retain(|c| c.timeout > now);
        self.pending_clarifications.len() != before
    }

    pub fn most_recent_clarification(&self) -> Option<&ClarificationRequest> {
        self.pending_clarifications.last()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub name: String,
    pub description: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTaskCard {
    pub id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub task_type: String,
    pub title: String,
    pub description: String,
    pub status: AgentTaskStatus,
    pub progress: u8,
    pub steps: Vec<TaskStep>,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub workflow_type: Option<String>,
    pub workflow_id: Option<String>,
    pub can_cancel: bool,
    pub estimated_duration_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub conversation_id: String,
    pub role: ChatRole,
    pub content: String,
    pub metadata: std::collections::HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
}

// ---- Intent classification & dialog types ------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    CreateTask,
    UpdateTask,
    DeleteTask,
    ListTasks,
    CompleteTask,
    ScheduleEvent,
    BlockTime,
    RescheduleDay,
    WebSearch,
    DailyBriefing,
    WeeklySummary,
    GenerateResponse,
    CasualConversation,
    SendEmail,
    ReadEmails,
    SyncCanvas,
}

impl ActionType {
    /// Maps a raw classifier `action` string to its `ActionType`, falling
    /// back to `generate_response` for anything unrecognized (§4.12 step 5).
    pub fn from_action_str(action: &str) -> Self {
        match action {
            "create_task" => ActionType::CreateTask,
            "update_task" => ActionType::UpdateTask,
            "delete_task" => ActionType::DeleteTask,
            "list_tasks" => ActionType::ListTasks,
            "complete_task" => ActionType::CompleteTask,
            "schedule_event" => ActionType::ScheduleEvent,
            "block_time" => ActionType::BlockTime,
            "reschedule_day" => ActionType::RescheduleDay,
            "web_search" => ActionType::WebSearch,
            "daily_briefing" => ActionType::DailyBriefing,
            "weekly_summary" => ActionType::WeeklySummary,
            "casual_conversation" => ActionType::CasualConversation,
            "send_email" => ActionType::SendEmail,
            "read_emails" => ActionType::ReadEmails,
            "sync_canvas" => ActionType::SyncCanvas,
            _ => ActionType::GenerateResponse,
        }
    }

    /// `action → workflowType?` from the fixed table in spec §6.
    pub fn workflow_type(self) -> Option<WorkflowType> {
        match self {
            ActionType::CreateTask | ActionType::ListTasks => Some(WorkflowType::Tasks),
            ActionType::ScheduleEvent | ActionType::BlockTime => Some(WorkflowType::Calendar),
            ActionType::RescheduleDay => Some(WorkflowType::Scheduling),
            ActionType::WebSearch => Some(WorkflowType::Search),
            ActionType::DailyBriefing | ActionType::WeeklySummary => Some(WorkflowType::Briefing),
            ActionType::SendEmail | ActionType::ReadEmails => Some(WorkflowType::Email),
            ActionType::UpdateTask
            | ActionType::DeleteTask
            | ActionType::CompleteTask
            | ActionType::GenerateResponse
            | ActionType::CasualConversation
            | ActionType::SyncCanvas => None,
        }
    }

    /// Task-management actions synthesize a `TaskExtractionResponse` and are
    /// eligible for the create/target-task clarification rule (§4.12 step 6).
    pub fn is_task_management(self) -> bool {
        matches!(
            self,
            ActionType::CreateTask | ActionType::UpdateTask | ActionType::DeleteTask | ActionType::CompleteTask
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Tasks,
    Calendar,
    Scheduling,
    Search,
    Briefing,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogActType {
    Invoke,
    Ask,
    Cancel,
    Switch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogAct {
    pub act_type: DialogActType,
    pub detail: String,
}

/// Entities extracted from a task-management query, normalized into the slots
/// a create/update/delete/complete action needs (§4.12 step 6-7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskExtractionResponse {
    pub task_title: Option<String>,
    pub target_task: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Option<String>,
    pub estimated_duration_minutes: Option<u32>,
}

/// The classifier's raw judgment, before `IntentProcessor` applies the
/// clarification-gate rules on top of it (§6 "IntentClassifier interface").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierOutput {
    pub intent: String,
    pub action: String,
    pub confidence: f64,
    pub entities: std::collections::HashMap<String, String>,
    pub quantity: Option<u32>,
    pub requires_disambiguation: bool,
    pub suggested_action: Option<String>,
    pub alternative_intents: Vec<String>,
    pub reasoning: String,
}

/// `IntentProcessor::processUserQuery`'s return value (§4.12 "Returns").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: String,
    pub action: ActionType,
    pub confidence: f64,
    pub entities: std::collections::HashMap<String, String>,
    pub task_info: Option<TaskExtractionResponse>,
    pub conversation_response: Option<String>,
    pub workflow_type: Option<WorkflowType>,
    pub requires_task_card: bool,
    pub immediate_response: Option<String>,
    pub requires_clarification: bool,
    pub clarification_question: Option<String>,
    pub can_switch_workflow: bool,
    pub suggested_workflows: Vec<WorkflowType>,
    pub dialog_acts: Vec<DialogAct>,
    pub workflow_params: std::collections::HashMap<String, String>,
    pub metadata: std::collections::HashMap<String, String>,
}
