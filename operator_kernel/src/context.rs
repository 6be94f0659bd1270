//! Bounded per-session conversation history.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// One message in a session's context window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

type Window = Arc<Mutex<VecDeque<ContextEntry>>>;

/// Sliding window of messages per session.
///
/// Every session shares the same capacity. Pushes to one session are
/// serialised by that session's own lock; sessions never contend with
/// each other beyond the map lookup.
#[derive(Debug)]
pub struct ContextManager {
    window_size: usize,
    sessions: DashMap<String, Window>,
}

impl ContextManager {
    /// `window_size` must be positive; the kernel validates it at construction.
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            sessions: DashMap::new(),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    fn window(&self, session_id: &str) -> Window {
        if let Some(window) = self.sessions.get(session_id) {
            return window.clone();
        }
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.window_size))))
            .clone()
    }

    /// Append a message, evicting the oldest entries beyond capacity.
    pub fn push(&self, session_id: &str, role: impl Into<String>, content: impl Into<String>) {
        let entry = ContextEntry {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        };

        let window = self.window(session_id);
        let mut window = window.lock();
        window.push_back(entry);
        while window.len() > self.window_size {
            window.pop_front();
        }
    }

    /// Current window for a session, oldest first. Unknown sessions are empty.
    pub fn get_context(&self, session_id: &str) -> Vec<ContextEntry> {
        match self.sessions.get(session_id) {
            Some(window) => window.lock().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Empty a session's window. The session id stays known.
    pub fn clear(&self, session_id: &str) {
        if let Some(window) = self.sessions.get(session_id) {
            window.lock().clear();
        }
    }

    /// Sessions currently holding at least one entry, sorted.
    pub fn active_sessions(&self) -> Vec<String> {
        let mut active: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().lock().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        active.sort();
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let context = ContextManager::new(3);
        for i in 1..=4 {
            context.push("s1", "user", format!("message {}", i));
        }

        let window = context.get_context("s1");
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].content, "message 2");
        assert_eq!(window[2].content, "message 4");
    }

    #[test]
    fn test_clear_and_active_sessions() {
        let context = ContextManager::new(5);
        context.push("b", "user", "hello");
        context.push("a", "assistant", "hi");
        assert_eq!(context.active_sessions(), vec!["a", "b"]);

        context.clear("a");
        assert!(context.get_context("a").is_empty());
        assert_eq!(context.active_sessions(), vec!["b"]);

        context.push("a", "user", "back again");
        assert_eq!(context.active_sessions(), vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let context = ContextManager::new(2);
        assert!(context.get_context("ghost").is_empty());
        context.clear("ghost");
        assert!(context.active_sessions().is_empty());
    }

    #[test]
    fn test_concurrent_pushes_never_overshoot() {
        let context = Arc::new(ContextManager::new(10));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let context = context.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        context.push("shared", "user", format!("{}-{}", worker, i));
                        assert!(context.get_context("shared").len() <= 10);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(context.get_context("shared").len(), 10);
    }
}
