//! Hot, TTL-backed `ConversationState` cache in front of the persistent store
//! (§4.14). Every mutation refreshes the TTL and rewrites both the cache and
//! the repository; a cache miss creates a fresh state. Clarifications expire
//! independently (5 minutes by default) and are pruned on every read.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::models::ConversationState;
use crate::repository::ConversationRepository;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry {
    state: ConversationState,
    inserted_at: Instant,
}

pub struct ConversationStateManager<R> {
    repo: R,
    cache: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl<R> ConversationStateManager<R>
where
    R: ConversationRepository,
{
    pub fn new(repo: R, cache_config: &CacheConfig) -> Self {
        Self {
            repo,
            cache: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs((cache_config.conversation_state_ttl_minutes.max(0) as u64) * 60),
        }
    }

    /// Reads the hot cache; on a miss or expiry, falls back to the
    /// persistent store, creating a fresh state if neither has one.
    pub fn get(&self, conversation_id: &str, user_id: &str) -> Result<ConversationState> {
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get_mut(conversation_id) {
                if entry.inserted_at.elapsed() < self.ttl {
                    let dropped = entry.state.prune_expired_clarifications(Utc::now());
                    let state = entry.state.clone();
                    if dropped {
                        self.repo.save_conversation_state(&state)?;
                    }
                    return Ok(state);
                }
                cache.remove(conversation_id);
            }
        }

        let mut state = match self.repo.get_conversation_state(conversation_id)? {
            Some(state) => state,
            None => ConversationState::new(conversation_id.to_string(), user_id.to_string()),
        };
        let dropped = state.prune_expired_clarifications(Utc::now());
        if dropped {
            self.repo.save_conversation_state(&state)?;
        }
        self.store_in_cache(state.clone());
        Ok(state)
    }

    /// Refreshes TTL, rewrites the cache, and persists the full record.
    pub fn save(&self, mut state: ConversationState) -> Result<()> {
        state.last_activity = Utc::now();
        self.repo.save_conversation_state(&state)?;
        self.store_in_cache(state);
        Ok(())
    }

    /// Switching workflows clears any pending clarification (§4.14).
    pub fn switch_workflow(&self, state: &mut ConversationState, new_workflow: Option<String>) {
        state.pending_clarifications.clear();
        state.active_workflow = new_workflow;
    }

    fn store_in_cache(&self, state: ConversationState) {
        let mut cache = self.cache.lock().unwrap();
        cache.insert(state.conversation_id.clone(), CacheEntry { state, inserted_at: Instant::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClarificationContext, ClarificationRequest};
    use crate::repository::SqliteStore;

    #[test]
    fn test_get_creates_fresh_state_on_miss() {
        let store = SqliteStore::in_memory().unwrap();
        let manager = ConversationStateManager::new(store, &CacheConfig::default());
        let state = manager.get("c1", "u1").unwrap();
        assert_eq!(state.conversation_id, "c1");
        assert!(state.pending_clarifications.is_empty());
    }

    #[test]
    fn test_save_then_get_round_trips_through_cache() {
        let store = SqliteStore::in_memory().unwrap();
        let manager = ConversationStateManager::new(store, &CacheConfig::default());
        let mut state = manager.get("c1", "u1").unwrap();
        state.active_workflow = Some("tasks".to_string());
        manager.save(state).unwrap();

        let reloaded = manager.get("c1", "u1").unwrap();
        assert_eq!(reloaded.active_workflow.as_deref(), Some("tasks"));
    }

    #[test]
    fn test_expired_clarification_pruned_on_read() {
        let store = SqliteStore::in_memory().unwrap();
        let manager = ConversationStateManager::new(store, &CacheConfig::default());
        let mut state = manager.get("c1", "u1").unwrap();
        state.pending_clarifications.push(ClarificationRequest {
            id: "cl1".into(),
            question: "What task?".into(),
            context: ClarificationContext { action: "create_task".into(), intent: "create_task".into() },
            expected_response_type: "text".into(),
            timeout: Utc::now() - chrono::Duration::minutes(1),
        });
        manager.save(state).unwrap();

        let reloaded = manager.get("c1", "u1").unwrap();
        assert!(reloaded.pending_clarifications.is_empty());
    }

    #[test]
    fn test_switch_workflow_clears_clarifications() {
        let store = SqliteStore::in_memory().unwrap();
        let manager = ConversationStateManager::new(store, &CacheConfig::default());
        let mut state = manager.get("c1", "u1").unwrap();
        state.pending_clarifications.push(ClarificationRequest {
            id: "cl1".into(),
            question: "What task?".into(),
            context: ClarificationContext { action: "create_task".into(), intent: "create_task".into() },
            expected_response_type: "text".into(),
            timeout: Utc::now() + chrono::Duration::minutes(5),
        });
        manager.switch_workflow(&mut state, Some("calendar".to_string()));
        assert!(state.pending_clarifications.is_empty());
        assert_eq!(state.active_workflow.as_deref(), Some("calendar"));
    }
}
