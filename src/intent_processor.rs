//! Classifies a user's natural-language turn into an `IntentResult` (§4.12).
//! Decoupled from persistence: the caller loads/saves `ConversationState` via
//! the conversation state manager and passes it in by mutable reference.

use crate::error::Result;
use crate::models::{
    ActionType, ChatTurn, ClarificationContext, ClarificationRequest, ClassifierOutput, ConversationState, DialogAct,
    DialogActType, IntentResult, Preferences, TaskExtractionResponse, WorkflowType,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Everything `IntentProcessor` needs about the user but has no business
/// owning: name, timezone/prefs, working hours, recent activity, integration
/// status (§4.12 step 2).
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: String,
    pub display_name: Option<String>,
    pub preferences: Preferences,
    pub recent_activity: Vec<String>,
    pub integration_status: HashMap<String, bool>,
}

/// The classifier boundary (§6 "IntentClassifier interface"). No concrete
/// network/ONNX implementation ships in this crate; callers provide one.
/// `async_trait` since a real implementation suspends on model inference I/O.
#[async_trait::async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, query: &str, context: &UserContext, history: &[ChatTurn]) -> Result<ClassifierOutput>;
}

/// The casual-conversation fast path's LLM boundary.
#[async_trait::async_trait]
pub trait CasualConversationEndpoint: Send + Sync {
    async fn respond(&self, query: &str, context: &UserContext) -> Result<String>;
}

/// Dedicated LLM-assisted clarification completion (§4.12 step 1): given the
/// user's response to a pending clarification, extract the clarified slot
/// values and produce an `IntentResult` for the originating action.
#[async_trait::async_trait]
pub trait ClarificationCompleter: Send + Sync {
    async fn complete(&self, response_text: &str, clarification: &ClarificationRequest, context: &UserContext) -> Result<IntentResult>;
}

const GREETING_PATTERNS: &[&str] = &["hi", "hello", "hey", "good morning", "good afternoon", "good evening", "thanks", "thank you", "how are you"];
const TASK_KEYWORDS: &[&str] = &[
    "task", "schedule", "deadline", "due", "remind", "homework", "assignment", "exam", "study", "meeting", "event", "block",
];
const GENERIC_TITLE_DENYLIST: &[&str] = &["task", "todo", "new task"];
const CANCEL_OR_HELP_PHRASES: &[&str] = &["cancel", "help", "never mind", "nevermind"];
const VAGUE_TIME_PHRASES: &[&str] = &["sometime", "later", "soon", "whenever"];
const AMBIGUOUS_VERBS: &[&str] = &["it", "that one", "that task", "this one"];

/// Builds a case-insensitive, word-boundary alternation over `words`, so
/// e.g. "it" doesn't match inside "edit" the way a plain `contains` scan
/// would. Mirrors the teacher's `ClaimParser`: precompiled `Regex` fields
/// rather than ad hoc substring scans for keyword/claim extraction.
fn keyword_pattern(words: &[&str]) -> Regex {
    let alternation = words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|");
    Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).unwrap()
}

fn task_keyword_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| keyword_pattern(TASK_KEYWORDS))
}

fn cancel_or_help_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| keyword_pattern(CANCEL_OR_HELP_PHRASES))
}

fn vague_time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| keyword_pattern(VAGUE_TIME_PHRASES))
}

fn ambiguous_verb_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| keyword_pattern(AMBIGUOUS_VERBS))
}

fn slot_confidence_threshold(slot: &str) -> Option<f64> {
    match slot {
        "task_title" => Some(0.8),
        "due_date" => Some(0.6),
        "priority" => Some(0.7),
        "estimated_duration" => Some(0.7),
        _ => None,
    }
}

/// Generic title that looks unhelpful for a create_task request, e.g. "task",
/// "todo", or "make one for me" / "make some for me" (§4.12 step 7).
fn is_generic_title(title: &str) -> bool {
    let lower = title.trim().to_lowercase();
    if GENERIC_TITLE_DENYLIST.contains(&lower.as_str()) {
        return true;
    }
    lower.starts_with("make one for me") || lower.starts_with("make some for me")
}

fn looks_like_clarification_response(query: &str, context: &ClarificationContext) -> bool {
    let lower = query.trim().to_lowercase();
    if lower.is_empty() {
        return false;
    }
    if cancel_or_help_pattern().is_match(&lower) {
        return false;
    }
    if lower.starts_with("search ") || lower.contains("search for") {
        return false;
    }
    match context.action.as_str() {
        "create_task" => {
            !lower.starts_with("create a task") && !lower.starts_with("make a task") && !lower.starts_with("add a task")
        }
        _ => true,
    }
}

fn is_simple_conversation(query: &str) -> bool {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return false;
    }
    let lower = trimmed.to_lowercase();
    let word_count = trimmed.split_whitespace().count();
    let has_task_keywords = task_keyword_pattern().is_match(&lower);
    let is_greeting = GREETING_PATTERNS.iter().any(|g| lower == *g || lower.starts_with(g));
    is_greeting || (word_count <= 3 && !has_task_keywords)
}

fn extract_due_date(entities: &HashMap<String, String>) -> Option<DateTime<Utc>> {
    entities.get("due_date").and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&Utc))
}

fn synthesize_extraction(entities: &HashMap<String, String>) -> TaskExtractionResponse {
    TaskExtractionResponse {
        task_title: entities.get("task_title").or_else(|| entities.get("task_name")).cloned(),
        target_task: entities.get("target_task").or_else(|| entities.get("target_tasks")).cloned(),
        due_date: extract_due_date(entities),
        priority: entities.get("priority").cloned(),
        estimated_duration_minutes: entities.get("estimated_duration_minutes").and_then(|s| s.parse().ok()),
    }
}

pub struct IntentProcessor<C, L, D> {
    classifier: C,
    casual: L,
    clarifier: D,
}

impl<C, L, D> IntentProcessor<C, L, D>
where
    C: IntentClassifier,
    L: CasualConversationEndpoint,
    D: ClarificationCompleter,
{
    pub fn new(classifier: C, casual: L, clarifier: D) -> Self {
        Self { classifier, casual, clarifier }
    }

    pub async fn process_user_query(
        &self,
        query: &str,
        context: &UserContext,
        history: &[ChatTurn],
        state: &mut ConversationState,
    ) -> Result<IntentResult> {
        state.prune_expired_clarifications(Utc::now());

        if let Some(clarification) = state.most_recent_clarification().cloned() {
            if looks_like_clarification_response(query, &clarification.context) {
                let result = self.clarifier.complete(query, &clarification, context).await?;
                state.pending_clarifications.retain(|c| c.id != clarification.id);
                return Ok(result);
            }
        }

        if is_simple_conversation(query) {
            let message = self.casual.respond(query, context).await?;
            return Ok(IntentResult {
                intent: "casual_conversation".to_string(),
                action: ActionType::CasualConversation,
                confidence: 1.0,
                entities: HashMap::new(),
                task_info: None,
                conversation_response: Some(message),
                workflow_type: None,
                requires_task_card: false,
                immediate_response: None,
                requires_clarification: false,
                clarification_question: None,
                can_switch_workflow: state.can_switch,
                suggested_workflows: Vec::new(),
                dialog_acts: vec![DialogAct { act_type: DialogActType::Invoke, detail: "casual_conversation".to_string() }],
                workflow_params: HashMap::new(),
                metadata: HashMap::new(),
            });
        }

        // A query that reaches classification (rather than completing the
        // pending clarification above) abandons it (§8 dialog gate scenario
        // 3: "search python tutorials" clears the "create a task" question).
        state.pending_clarifications.clear();

        let classified = self.classifier.classify(query, context, history).await?;
        let action = ActionType::from_action_str(&classified.action);
        let workflow_type = action.workflow_type();

        let mut dialog_acts = vec![DialogAct { act_type: DialogActType::Invoke, detail: classified.action.clone() }];
        let switching = match (state.active_workflow.as_deref(), workflow_type) {
            (Some(current), Some(new)) => current != format!("{new:?}").to_lowercase(),
            (None, Some(_)) => false,
            _ => false,
        };
        if switching {
            dialog_acts.push(DialogAct { act_type: DialogActType::Switch, detail: format!("{workflow_type:?}") });
        }

        let mut task_info = None;
        let mut clarification_question = None;

        if action.is_task_management() {
            let extraction = synthesize_extraction(&classified.entities);

            if matches!(action, ActionType::CreateTask) && extraction.task_title.is_none() && extraction.target_task.is_none() {
                clarification_question = Some("What task would you like me to create? Please give me a title.".to_string());
            } else if matches!(action, ActionType::UpdateTask | ActionType::DeleteTask | ActionType::CompleteTask)
                && extraction.target_task.is_none()
                && ambiguous_verb_pattern().is_match(query)
            {
                clarification_question = Some("Which task do you mean?".to_string());
            } else if let Some(title) = &extraction.task_title {
                if is_generic_title(title) {
                    clarification_question =
                        Some("Could you give the task a more specific title?".to_string());
                }
            }

            if clarification_question.is_none() {
                for (slot, value) in [
                    ("task_title", extraction.task_title.as_deref()),
                    ("priority", extraction.priority.as_deref()),
                ] {
                    if value.is_some() {
                        if let Some(threshold) = slot_confidence_threshold(slot) {
                            if classified.confidence < threshold {
                                clarification_question = Some(format!("Can you confirm the {slot}?"));
                                break;
                            }
                        }
                    }
                }
            }

            task_info = Some(extraction);
        } else if matches!(action, ActionType::ScheduleEvent | ActionType::BlockTime) {
            let has_vague_time = vague_time_pattern().is_match(query);
            if has_vague_time && !classified.entities.contains_key("due_date") {
                clarification_question = Some("What time would you like to schedule this for?".to_string());
            }
        }

        let requires_clarification = clarification_question.is_some();
        if requires_clarification {
            dialog_acts.push(DialogAct {
                act_type: DialogActType::Ask,
                detail: clarification_question.clone().unwrap_or_default(),
            });
            state.pending_clarifications.push(ClarificationRequest {
                id: uuid::Uuid::new_v4().to_string(),
                question: clarification_question.clone().unwrap(),
                context: ClarificationContext { action: classified.action.clone(), intent: classified.intent.clone() },
                expected_response_type: "text".to_string(),
                timeout: Utc::now() + chrono::Duration::minutes(5),
            });
        }

        Ok(IntentResult {
            intent: classified.intent,
            action,
            confidence: classified.confidence,
            entities: classified.entities,
            task_info,
            conversation_response: None,
            workflow_type,
            requires_task_card: workflow_type.is_some() && !requires_clarification,
            immediate_response: None,
            requires_clarification,
            clarification_question,
            can_switch_workflow: state.can_switch,
            suggested_workflows: workflow_type.into_iter().collect(),
            dialog_acts,
            workflow_params: HashMap::new(),
            metadata: HashMap::new(),
        })
    }
}
