use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use pilot_channels::ChatAdapter;
use pilot_core::ConversationKey;

struct Entry {
    adapter: Arc<dyn ChatAdapter>,
    started_at: DateTime<Utc>,
}

/// Process-wide map from conversation to its live adapter. Cheap to clone;
/// all clones share one underlying map.
///
/// A key is present iff a task for that conversation is currently running.
/// Registration is an atomic check-and-insert under one mutex. Removal is
/// tied to the [`RegistrationGuard`]'s lifetime: success, error, and panic
/// paths all drop it, so none can leave a stale entry behind.
#[derive(Clone, Default)]
pub struct ActiveTaskRegistry {
    inner: Arc<Mutex<HashMap<ConversationKey, Entry>>>,
}

impl ActiveTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claim the conversation. Returns `None` when a task is
    /// already registered for it.
    pub fn try_register(
        &self,
        key: ConversationKey,
        adapter: Arc<dyn ChatAdapter>,
    ) -> Option<RegistrationGuard> {
        let mut inner = self.inner.lock();
        if inner.contains_key(&key) {
            return None;
        }
        inner.insert(
            key.clone(),
            Entry {
                adapter,
                started_at: Utc::now(),
            },
        );
        debug!(key = %key, "task registered");
        Some(RegistrationGuard {
            registry: self.clone(),
            key,
        })
    }

    /// Remove the conversation's entry. Idempotent.
    pub fn unregister(&self, key: &ConversationKey) -> bool {
        let removed = self.inner.lock().remove(key).is_some();
        if removed {
            debug!(key = %key, "task unregistered");
        }
        removed
    }

    /// Look up the conversation's adapter (for cancellation and callback
    /// routing).
    pub fn get(&self, key: &ConversationKey) -> Option<Arc<dyn ChatAdapter>> {
        self.inner.lock().get(key).map(|e| Arc::clone(&e.adapter))
    }

    pub fn contains(&self, key: &ConversationKey) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// When the conversation's current task started.
    pub fn started_at(&self, key: &ConversationKey) -> Option<DateTime<Utc>> {
        self.inner.lock().get(key).map(|e| e.started_at)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Lifetime-scoped registration: dropping the guard unregisters the
/// conversation.
pub struct RegistrationGuard {
    registry: ActiveTaskRegistry,
    key: ConversationKey,
}

impl RegistrationGuard {
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pilot_core::ProgressUpdate;
    use std::path::Path;

    struct NullAdapter;

    #[async_trait]
    impl ChatAdapter for NullAdapter {
        fn channel(&self) -> &str {
            "null"
        }
        async fn send_message(&self, _text: &str) {}
        async fn send_image(&self, _path: &Path, _caption: &str) {}
        async fn send_progress(&self, _update: &ProgressUpdate) {}
        async fn ask_confirmation(&self, _message: &str) -> bool {
            false
        }
        async fn ask_takeover(&self, _message: &str) {}
        fn is_cancelled(&self) -> bool {
            false
        }
        fn cancel(&self) {}
        fn resolve_gate(&self, _decision: bool) -> bool {
            false
        }
    }

    fn key(n: i64) -> ConversationKey {
        ConversationKey::telegram(n)
    }

    #[test]
    fn test_register_is_single_flight() {
        let registry = ActiveTaskRegistry::new();
        let guard = registry.try_register(key(1), Arc::new(NullAdapter));
        assert!(guard.is_some());
        assert!(registry.try_register(key(1), Arc::new(NullAdapter)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let registry = ActiveTaskRegistry::new();
        {
            let _guard = registry.try_register(key(1), Arc::new(NullAdapter)).unwrap();
            assert!(registry.contains(&key(1)));
        }
        assert!(!registry.contains(&key(1)));
        assert!(registry.try_register(key(1), Arc::new(NullAdapter)).is_some());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ActiveTaskRegistry::new();
        let guard = registry.try_register(key(1), Arc::new(NullAdapter)).unwrap();
        assert!(registry.unregister(&key(1)));
        assert!(!registry.unregister(&key(1)));
        // Guard drop after manual unregister must stay a no-op.
        drop(guard);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_routes_to_registered_adapter() {
        let registry = ActiveTaskRegistry::new();
        let _guard = registry.try_register(key(1), Arc::new(NullAdapter)).unwrap();
        assert!(registry.get(&key(1)).is_some());
        assert!(registry.get(&key(2)).is_none());
        assert!(registry.started_at(&key(1)).is_some());
    }

    #[test]
    fn test_concurrent_starts_have_one_winner() {
        let registry = ActiveTaskRegistry::new();
        let barrier = Arc::new(std::sync::Barrier::new(16));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                let guard = registry.try_register(key(7), Arc::new(NullAdapter));
                let won = guard.is_some();
                // Hold the registration until every thread has attempted.
                barrier.wait();
                drop(guard);
                won
            }));
        }
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(registry.is_empty());
    }
}
