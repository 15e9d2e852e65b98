//! Per-conversation state keyed by thread id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// Shared map of conversation states.
///
/// Each entry sits behind its own async mutex so one conversation's turn can
/// hold its state across awaits without blocking the others. Entries are
/// created on first use and removed with [`ConversationRegistry::evict`].
pub struct ConversationRegistry<S> {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<S>>>>,
}

impl<S> Default for ConversationRegistry<S> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<S> ConversationRegistry<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state for `thread_id`, if the conversation exists.
    pub fn get(&self, thread_id: &str) -> Option<Arc<AsyncMutex<S>>> {
        self.lock().get(thread_id).cloned()
    }

    /// Returns the state for `thread_id`, creating it with `init` on first use.
    pub fn get_or_insert_with(&self, thread_id: &str, init: impl FnOnce() -> S) -> Arc<AsyncMutex<S>> {
        self.lock()
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(init())))
            .clone()
    }

    /// Removes the conversation and hands back its state.
    pub fn evict(&self, thread_id: &str) -> Option<Arc<AsyncMutex<S>>> {
        self.lock().remove(thread_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AsyncMutex<S>>>> {
        // A poisoned map is still structurally valid.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_once_and_shares_state() {
        let registry = ConversationRegistry::<Vec<String>>::new();

        let first = registry.get_or_insert_with("t1", Vec::new);
        first.lock().await.push("hello".to_string());
        let again = registry.get_or_insert_with("t1", || vec!["unused".to_string()]);

        assert_eq!(*again.lock().await, vec!["hello".to_string()]);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let registry = ConversationRegistry::<u32>::new();
        *registry.get_or_insert_with("a", || 0).lock().await += 1;
        *registry.get_or_insert_with("b", || 0).lock().await += 5;

        assert_eq!(*registry.get("a").unwrap().lock().await, 1);
        assert_eq!(*registry.get("b").unwrap().lock().await, 5);
    }

    #[test]
    fn evict_removes_the_entry() {
        let registry = ConversationRegistry::<u32>::new();
        registry.get_or_insert_with("a", || 7);

        assert!(registry.evict("a").is_some());
        assert!(registry.evict("a").is_none());
        assert!(registry.get("a").is_none());
        assert!(registry.is_empty());
    }
}
