//! Persistence traits plus one rusqlite-backed implementation (ambient
//! Persistence section). Kept as thin CRUD traits so the service layer never
//! hand-rolls SQL. Method names are namespaced per trait (`list_tasks`,
//! `list_busy_events`, ...) since a single store implements all of them and
//! Rust has no argument-based overload resolution across traits.

use crate::error::Result;
use crate::models::{
    AgentTaskCard, BusyEvent, ChatTurn, CompletionEvent, Conversation, ConversationState, Preferences, ScheduleBlock,
    Task,
};
use rusqlite::{params, Connection};
use std::sync::Mutex;

pub trait TaskRepository: Send + Sync {
    fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>>;
    fn upsert_task(&self, task: &Task) -> Result<()>;
    fn delete_task(&self, task_id: &str) -> Result<()>;
}

pub trait BusyEventRepository: Send + Sync {
    fn list_busy_events(&self, user_id: &str) -> Result<Vec<BusyEvent>>;
    fn upsert_busy_event(&self, user_id: &str, event: &BusyEvent) -> Result<()>;
}

pub trait PreferenceRepository: Send + Sync {
    fn get_preferences(&self, user_id: &str) -> Result<Preferences>;
    fn set_preferences(&self, user_id: &str, prefs: &Preferences) -> Result<()>;
}

pub trait ScheduleBlockRepository: Send + Sync {
    fn list_schedule_blocks(&self, user_id: &str) -> Result<Vec<ScheduleBlock>>;
    fn replace_schedule_blocks(&self, user_id: &str, blocks: &[ScheduleBlock]) -> Result<()>;
    fn list_completion_events(&self, user_id: &str) -> Result<Vec<CompletionEvent>>;
    fn record_completion_event(&self, user_id: &str, event: &CompletionEvent) -> Result<()>;
}

pub trait ConversationRepository: Send + Sync {
    fn get_conversation_state(&self, conversation_id: &str) -> Result<Option<ConversationState>>;
    fn save_conversation_state(&self, state: &ConversationState) -> Result<()>;
    fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>>;
    fn upsert_conversation(&self, conversation: &Conversation) -> Result<()>;
    fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>>;
}

pub trait ChatTurnRepository: Send + Sync {
    fn append_chat_turn(&self, turn: &ChatTurn) -> Result<()>;
    fn recent_chat_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatTurn>>;
}

pub trait AgentTaskRepository: Send + Sync {
    fn upsert_agent_task(&self, card: &AgentTaskCard) -> Result<()>;
    fn get_agent_task(&self, id: &str) -> Result<Option<AgentTaskCard>>;
    fn list_agent_tasks(&self, user_id: &str) -> Result<Vec<AgentTaskCard>>;
}

/// Single-file SQLite store implementing every repository trait. Schema is
/// created on first open, mirroring the completion model's own store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (id TEXT PRIMARY KEY, owner_id TEXT NOT NULL, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS busy_events (id TEXT PRIMARY KEY, owner_id TEXT NOT NULL, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS preferences (user_id TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS schedule_blocks (owner_id TEXT NOT NULL, task_id TEXT NOT NULL, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS completion_events (owner_id TEXT NOT NULL, task_id TEXT NOT NULL, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS conversation_state (conversation_id TEXT PRIMARY KEY, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS conversations (id TEXT PRIMARY KEY, user_id TEXT NOT NULL, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS chat_turns (id TEXT PRIMARY KEY, conversation_id TEXT NOT NULL, ts TEXT NOT NULL, data TEXT NOT NULL);
             CREATE TABLE IF NOT EXISTS agent_task_cards (id TEXT PRIMARY KEY, user_id TEXT NOT NULL, data TEXT NOT NULL);",
        )?;
        Ok(())
    }
}

impl TaskRepository for SqliteStore {
    fn list_tasks(&self, user_id: &str) -> Result<Vec<Task>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM tasks WHERE owner_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn upsert_task(&self, task: &Task) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(task)?;
        conn.execute(
            "INSERT INTO tasks (id, owner_id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![task.id, task.owner_id, data],
        )?;
        Ok(())
    }

    fn delete_task(&self, task_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM tasks WHERE id = ?1", params![task_id])?;
        Ok(())
    }
}

impl BusyEventRepository for SqliteStore {
    fn list_busy_events(&self, user_id: &str) -> Result<Vec<BusyEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM busy_events WHERE owner_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn upsert_busy_event(&self, user_id: &str, event: &BusyEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(event)?;
        conn.execute(
            "INSERT INTO busy_events (id, owner_id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![event.id, user_id, data],
        )?;
        Ok(())
    }
}

impl PreferenceRepository for SqliteStore {
    fn get_preferences(&self, user_id: &str) -> Result<Preferences> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM preferences WHERE user_id = ?1")?;
        let mut rows = stmt.query(params![user_id])?;
        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(serde_json::from_str(&data)?)
        } else {
            Ok(Preferences::default())
        }
    }

    fn set_preferences(&self, user_id: &str, prefs: &Preferences) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(prefs)?;
        conn.execute(
            "INSERT INTO preferences (user_id, data) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET data = excluded.data",
            params![user_id, data],
        )?;
        Ok(())
    }
}

impl ScheduleBlockRepository for SqliteStore {
    fn list_schedule_blocks(&self, user_id: &str) -> Result<Vec<ScheduleBlock>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM schedule_blocks WHERE owner_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn replace_schedule_blocks(&self, user_id: &str, blocks: &[ScheduleBlock]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM schedule_blocks WHERE owner_id = ?1", params![user_id])?;
        for block in blocks {
            let data = serde_json::to_string(block)?;
            conn.execute(
                "INSERT INTO schedule_blocks (owner_id, task_id, data) VALUES (?1, ?2, ?3)",
                params![user_id, block.task_id, data],
            )?;
        }
        Ok(())
    }

    fn list_completion_events(&self, user_id: &str) -> Result<Vec<CompletionEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM completion_events WHERE owner_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }

    fn record_completion_event(&self, user_id: &str, event: &CompletionEvent) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(event)?;
        conn.execute(
            "INSERT INTO completion_events (owner_id, task_id, data) VALUES (?1, ?2, ?3)",
            params![user_id, event.task_id, data],
        )?;
        Ok(())
    }
}

impl ConversationRepository for SqliteStore {
    fn get_conversation_state(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM conversation_state WHERE conversation_id = ?1")?;
        let mut rows = stmt.query(params![conversation_id])?;
        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&data)?))
        } else {
            Ok(None)
        }
    }

    fn save_conversation_state(&self, state: &ConversationState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(state)?;
        conn.execute(
            "INSERT INTO conversation_state (conversation_id, data) VALUES (?1, ?2)
             ON CONFLICT(conversation_id) DO UPDATE SET data = excluded.data",
            params![state.conversation_id, data],
        )?;
        Ok(())
    }

    fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM conversations WHERE id = ?1")?;
        let mut rows = stmt.query(params![conversation_id])?;
        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&data)?))
        } else {
            Ok(None)
        }
    }

    fn upsert_conversation(&self, conversation: &Conversation) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(conversation)?;
        conn.execute(
            "INSERT INTO conversations (id, user_id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![conversation.id, conversation.user_id, data],
        )?;
        Ok(())
    }

    fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM conversations WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}

impl ChatTurnRepository for SqliteStore {
    fn append_chat_turn(&self, turn: &ChatTurn) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(turn)?;
        conn.execute(
            "INSERT INTO chat_turns (id, conversation_id, ts, data) VALUES (?1, ?2, ?3, ?4)",
            params![turn.id, turn.conversation_id, turn.timestamp.to_rfc3339(), data],
        )?;
        Ok(())
    }

    fn recent_chat_turns(&self, conversation_id: &str, limit: usize) -> Result<Vec<ChatTurn>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT data FROM chat_turns WHERE conversation_id = ?1 ORDER BY ts DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![conversation_id, limit as i64], |row| row.get::<_, String>(0))?;
        let mut out: Vec<ChatTurn> = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        out.reverse();
        Ok(out)
    }
}

impl AgentTaskRepository for SqliteStore {
    fn upsert_agent_task(&self, card: &AgentTaskCard) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let data = serde_json::to_string(card)?;
        conn.execute(
            "INSERT INTO agent_task_cards (id, user_id, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            params![card.id, card.user_id, data],
        )?;
        Ok(())
    }

    fn get_agent_task(&self, id: &str) -> Result<Option<AgentTaskCard>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM agent_task_cards WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&data)?))
        } else {
            Ok(None)
        }
    }

    fn list_agent_tasks(&self, user_id: &str) -> Result<Vec<AgentTaskCard>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT data FROM agent_task_cards WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}
