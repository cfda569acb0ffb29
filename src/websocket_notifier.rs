//! Process-wide `userId → connection` registry (§4.16). `register`/`unregister`
//! are idempotent; `emit_to_user` returns `false` (no buffering) if the user
//! has no live connection. The websocket event-type set is closed.
//!
//! The teacher's realtime sync actor carries a literal
//! `// TODO: Use actix Addr<WsSession>` placeholder instead of a working
//! per-user registry. `OutboundChannel` is the seam that replaces it: the
//! production adapter wraps an `actix::Recipient<OutboundEvent>` per
//! connection, keyed by user id instead of a random connection id, so a
//! specific user's socket can be addressed directly.

use crate::agent_task_manager::{CrudEventCard, CrudOutcome, TaskEventSink, TaskEventType};
use crate::models::AgentTaskCard;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsEventType {
    TaskCreated,
    TaskProgress,
    StepCompleted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    CrudSuccess,
    CrudFailure,
    ImmediateResponse,
    ClarificationRequest,
    WorkflowSwitch,
}

/// Message payload handed to a connection over `do_send` (fire-and-forget,
/// matching the "never blocks the main path" rule).
#[derive(Debug, Clone, serde::Serialize)]
pub struct OutboundEvent {
    pub payload: Value,
}

impl actix::Message for OutboundEvent {
    type Result = ();
}

/// The per-connection send boundary. A production registry entry wraps an
/// `actix::Recipient<OutboundEvent>`; tests use an in-memory channel.
pub trait OutboundChannel: Send + Sync {
    fn send(&self, event: OutboundEvent) -> bool;
}

pub struct ActixRecipientChannel(pub actix::Recipient<OutboundEvent>);

impl OutboundChannel for ActixRecipientChannel {
    fn send(&self, event: OutboundEvent) -> bool {
        self.0.do_send(event);
        true
    }
}

pub struct WebSocketNotifier {
    connections: Mutex<HashMap<String, Box<dyn OutboundChannel>>>,
}

impl WebSocketNotifier {
    pub fn new() -> Self {
        Self { connections: Mutex::new(HashMap::new()) }
    }

    /// Idempotent: registering the same user again replaces the prior
    /// connection without error.
    pub fn register(&self, user_id: &str, channel: Box<dyn OutboundChannel>) {
        self.connections.lock().unwrap().insert(user_id.to_string(), channel);
    }

    pub fn unregister(&self, user_id: &str) {
        self.connections.lock().unwrap().remove(user_id);
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.connections.lock().unwrap().contains_key(user_id)
    }

    /// Returns `false` without buffering if the user has no live connection
    /// (§4.16, §5 "Backpressure" — the websocket path never blocks the main
    /// request and drops events on unreachable connections).
    pub fn emit_to_user(&self, user_id: &str, event_type: WsEventType, conversation_id: Option<&str>, mut payload: Value) -> bool {
        let connections = self.connections.lock().unwrap();
        let Some(channel) = connections.get(user_id) else { return false };

        if let Value::Object(map) = &mut payload {
            map.insert("type".to_string(), json!(event_type));
            map.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
            if let Some(cid) = conversation_id {
                map.insert("conversation_id".to_string(), json!(cid));
            }
        }
        channel.send(OutboundEvent { payload })
    }
}

impl Default for WebSocketNotifier {
    fn default() -> Self {
        Self::new()
    }
}

fn task_event_type(event: TaskEventType) -> WsEventType {
    match event {
        TaskEventType::Created => WsEventType::TaskCreated,
        TaskEventType::Progress => WsEventType::TaskProgress,
        TaskEventType::StepCompleted => WsEventType::StepCompleted,
        TaskEventType::Completed => WsEventType::TaskCompleted,
        TaskEventType::Failed => WsEventType::TaskFailed,
        TaskEventType::Cancelled => WsEventType::TaskCancelled,
    }
}

impl TaskEventSink for WebSocketNotifier {
    fn emit_task_event(&self, user_id: &str, conversation_id: Option<&str>, event: TaskEventType, card: &AgentTaskCard) -> bool {
        let payload = json!({ "task": card });
        self.emit_to_user(user_id, task_event_type(event), conversation_id, payload)
    }

    fn emit_crud_event(&self, user_id: &str, conversation_id: Option<&str>, outcome: CrudOutcome, card: &CrudEventCard) -> bool {
        let event_type = match outcome {
            CrudOutcome::Success => WsEventType::CrudSuccess,
            CrudOutcome::Failure => WsEventType::CrudFailure,
        };
        let payload = json!({
            "card": {
                "user_id": user_id,
                "operation": format!("{:?}", card.operation).to_lowercase(),
                "entity_type": card.entity_type,
                "entity_title": card.entity_title,
                "entity_id": card.entity_id,
                "details": card.details,
                "acknowledgement_message": card.acknowledgement_message,
            }
        });
        self.emit_to_user(user_id, event_type, conversation_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_task_manager::CrudOperation;
    use crate::models::AgentTaskStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingChannel {
        received: Arc<AtomicUsize>,
    }
    impl OutboundChannel for RecordingChannel {
        fn send(&self, _event: OutboundEvent) -> bool {
            self.received.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn card() -> AgentTaskCard {
        AgentTaskCard {
            id: "t1".into(),
            user_id: "u1".into(),
            conversation_id: None,
            task_type: "tasks".into(),
            title: "Create task".into(),
            description: String::new(),
            status: AgentTaskStatus::Pending,
            progress: 0,
            steps: Vec::new(),
            result: None,
            error_message: None,
            workflow_type: None,
            workflow_id: None,
            can_cancel: true,
            estimated_duration_seconds: None,
            created_at: Utc::now(),
            started_at: None,
            updated_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn test_emit_to_unconnected_user_returns_false() {
        let notifier = WebSocketNotifier::new();
        assert!(!notifier.emit_to_user("u1", WsEventType::TaskCreated, None, json!({})));
    }

    #[test]
    fn test_emit_to_connected_user_returns_true_and_delivers() {
        let notifier = WebSocketNotifier::new();
        let counter = Arc::new(AtomicUsize::new(0));
        notifier.register("u1", Box::new(RecordingChannel { received: counter.clone() }));
        assert!(notifier.emit_to_user("u1", WsEventType::TaskCreated, None, json!({})));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let notifier = WebSocketNotifier::new();
        notifier.unregister("u1");
        notifier.register("u1", Box::new(RecordingChannel::default()));
        notifier.unregister("u1");
        notifier.unregister("u1");
        assert!(!notifier.is_connected("u1"));
    }

    #[test]
    fn test_task_event_sink_builds_task_payload() {
        let notifier = WebSocketNotifier::new();
        let counter = Arc::new(AtomicUsize::new(0));
        notifier.register("u1", Box::new(RecordingChannel { received: counter.clone() }));
        let delivered = notifier.emit_task_event("u1", None, TaskEventType::Created, &card());
        assert!(delivered);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_crud_event_sink_builds_card_payload() {
        let notifier = WebSocketNotifier::new();
        notifier.register("u1", Box::new(RecordingChannel::default()));
        let delivered = notifier.emit_crud_event(
            "u1",
            None,
            CrudOutcome::Success,
            &CrudEventCard {
                operation: CrudOperation::Created,
                entity_type: "task".into(),
                entity_title: "homework".into(),
                entity_id: Some("t1".into()),
                details: HashMap::new(),
                acknowledgement_message: Some("Created task \"homework\"".into()),
            },
        );
        assert!(delivered);
    }
}
