//! Turn history on top of `ChatTurnRepository`/`ConversationRepository`
//! (§4.15): a 24h-TTL hot cache of the last N turns, history retrieval that
//! drains the cache before falling back to the store, title generation, and
//! the (out-of-core-scope) summarization trigger.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::models::{ChatRole, ChatTurn, Conversation};
use crate::repository::{ChatTurnRepository, ConversationRepository};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SUMMARY_KIND_KEY: &str = "kind";
const SUMMARY_KIND_VALUE: &str = "summary";
const DEFAULT_SUMMARY_AFTER_TURNS: u32 = 30;
const TITLE_MAX_WORDS: usize = 5;

struct CacheEntry {
    turns: VecDeque<ChatTurn>,
    inserted_at: Instant,
}

pub struct AppendOutcome {
    pub turn: ChatTurn,
    pub needs_summarization: bool,
}

pub struct ConversationManager<R> {
    repo: R,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    recent_turns_n: usize,
    summary_after_turns: u32,
}

impl<R> ConversationManager<R>
where
    R: ConversationRepository + ChatTurnRepository,
{
    pub fn new(repo: R, cache_config: &CacheConfig) -> Self {
        Self {
            repo,
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs((cache_config.recent_turns_ttl_hours.max(0) as u64) * 3600),
            recent_turns_n: cache_config.recent_turns_n,
            summary_after_turns: DEFAULT_SUMMARY_AFTER_TURNS,
        }
    }

    pub fn append_user_turn(&self, conversation_id: &str, user_id: &str, content: &str) -> Result<AppendOutcome> {
        self.maybe_generate_title(conversation_id, user_id, content)?;
        self.append_turn(conversation_id, ChatRole::User, content)
    }

    pub fn append_assistant_turn(&self, conversation_id: &str, content: &str) -> Result<AppendOutcome> {
        self.append_turn(conversation_id, ChatRole::Assistant, content)
    }

    fn append_turn(&self, conversation_id: &str, role: ChatRole, content: &str) -> Result<AppendOutcome> {
        let turn = ChatTurn {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        };
        self.repo.append_chat_turn(&turn)?;
        self.push_cache(conversation_id, turn.clone());

        let persisted_count = self.repo.recent_chat_turns(conversation_id, self.summary_after_turns as usize)?.len() as u32;
        let needs_summarization = persisted_count >= self.summary_after_turns;

        Ok(AppendOutcome { turn, needs_summarization })
    }

    /// Drains the hot cache up to `min(limit, N)`, then reads the persistent
    /// store in ascending order for any remainder (§4.15 "History retrieval").
    pub fn get_history(&self, conversation_id: &str, limit: usize, include_summary: bool) -> Result<Vec<ChatTurn>> {
        let cap = limit.min(self.recent_turns_n);
        let mut from_cache: Vec<ChatTurn> = {
            let cache = self.cache.lock().unwrap();
            match cache.get(conversation_id) {
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => entry.turns.iter().rev().take(cap).rev().cloned().collect(),
                _ => Vec::new(),
            }
        };

        if from_cache.len() < limit {
            let remainder = limit - from_cache.len();
            let persisted = self.repo.recent_chat_turns(conversation_id, remainder + from_cache.len())?;
            let cached_ids: std::collections::HashSet<&str> = from_cache.iter().map(|t| t.id.as_str()).collect();
            let mut merged: Vec<ChatTurn> = persisted.into_iter().filter(|t| !cached_ids.contains(t.id.as_str())).collect();
            merged.append(&mut from_cache);
            merged.sort_by_key(|t| t.timestamp);
            from_cache = merged;
        }
        from_cache.truncate(limit);

        if include_summary {
            if let Some(summary) = self.get_summary(conversation_id)? {
                let mut with_summary = Vec::with_capacity(from_cache.len() + 1);
                with_summary.push(summary);
                with_summary.extend(from_cache);
                return Ok(with_summary);
            }
        }

        Ok(from_cache)
    }

    pub fn set_summary(&self, conversation_id: &str, summary_text: &str) -> Result<()> {
        let mut metadata = HashMap::new();
        metadata.insert(SUMMARY_KIND_KEY.to_string(), SUMMARY_KIND_VALUE.to_string());
        let turn = ChatTurn {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role: ChatRole::System,
            content: summary_text.to_string(),
            metadata,
            timestamp: Utc::now(),
        };
        self.repo.append_chat_turn(&turn)
    }

    fn get_summary(&self, conversation_id: &str) -> Result<Option<ChatTurn>> {
        let recent = self.repo.recent_chat_turns(conversation_id, 200)?;
        Ok(recent.into_iter().rev().find(|t| t.metadata.get(SUMMARY_KIND_KEY).map(String::as_str) == Some(SUMMARY_KIND_VALUE)))
    }

    /// Derives a short title (≤5 words) from the first user message if the
    /// conversation has none yet (§4.15 "Title generation").
    fn maybe_generate_title(&self, conversation_id: &str, user_id: &str, first_message: &str) -> Result<()> {
        let existing = self.repo.get_conversation(conversation_id)?;
        if matches!(&existing, Some(c) if c.title.is_some()) {
            return Ok(());
        }
        let title: String = first_message.split_whitespace().take(TITLE_MAX_WORDS).collect::<Vec<_>>().join(" ");
        let conversation = Conversation {
            id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            title: Some(title),
            last_message_at: Some(Utc::now()),
        };
        self.repo.upsert_conversation(&conversation)
    }

    fn push_cache(&self, conversation_id: &str, turn: ChatTurn) {
        let mut cache = self.cache.lock().unwrap();
        let entry = cache.entry(conversation_id.to_string()).or_insert_with(|| CacheEntry { turns: VecDeque::new(), inserted_at: Instant::now() });
        entry.turns.push_back(turn);
        while entry.turns.len() > self.recent_turns_n {
            entry.turns.pop_front();
        }
        entry.inserted_at = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SqliteStore;

    #[test]
    fn test_first_user_turn_generates_title() {
        let manager = ConversationManager::new(SqliteStore::in_memory().unwrap(), &CacheConfig::default());
        manager.append_user_turn("c1", "u1", "finish the essay by Friday please").unwrap();
        let conversation = manager.repo.get_conversation("c1").unwrap().unwrap();
        assert_eq!(conversation.title.as_deref(), Some("finish the essay by Friday"));
    }

    #[test]
    fn test_history_drains_cache_then_store() {
        let manager = ConversationManager::new(SqliteStore::in_memory().unwrap(), &CacheConfig::default());
        for i in 0..5 {
            manager.append_assistant_turn("c1", &format!("msg{i}")).unwrap();
        }
        let history = manager.get_history("c1", 3, false).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().unwrap().content, "msg4");
    }

    #[test]
    fn test_cache_drops_oldest_beyond_n() {
        let mut config = CacheConfig::default();
        config.recent_turns_n = 2;
        let manager = ConversationManager::new(SqliteStore::in_memory().unwrap(), &config);
        for i in 0..4 {
            manager.append_assistant_turn("c1", &format!("msg{i}")).unwrap();
        }
        let cache = manager.cache.lock().unwrap();
        let entry = cache.get("c1").unwrap();
        assert_eq!(entry.turns.len(), 2);
    }

    #[test]
    fn test_summarization_flagged_at_threshold() {
        let mut config = CacheConfig::default();
        config.recent_turns_n = 50;
        let manager = ConversationManager::new(SqliteStore::in_memory().unwrap(), &config);
        let mut outcome = None;
        for i in 0..30 {
            outcome = Some(manager.append_assistant_turn("c1", &format!("msg{i}")).unwrap());
        }
        assert!(outcome.unwrap().needs_summarization);
    }

    #[test]
    fn test_include_summary_prepends_system_turn() {
        let manager = ConversationManager::new(SqliteStore::in_memory().unwrap(), &CacheConfig::default());
        manager.append_assistant_turn("c1", "hello").unwrap();
        manager.set_summary("c1", "Discussed homework deadlines.").unwrap();
        let history = manager.get_history("c1", 10, true).unwrap();
        assert_eq!(history[0].content, "Discussed homework deadlines.");
        assert_eq!(history[0].role, ChatRole::System);
    }
}
