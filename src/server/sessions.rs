//! Session registry: one conversation per remote sender
//!
//! A session is created on the first message from a sender and kept for the
//! life of the process. It owns its own fork of the character agent and an
//! append-only history.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::MutexGuard;
use tracing::info;

use crate::agent::{Agent, ForkOptions};
use crate::protocol::Message;

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

pub struct Session {
    agent: Arc<dyn Agent>,
    history: Mutex<Vec<Message>>,
    turn: tokio::sync::Mutex<()>,
}

impl Session {
    fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            history: Mutex::new(Vec::new()),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// This session's own agent fork
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Serialize whole turns; held from inbound append to reply append
    pub async fn lock_turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    pub fn append(&self, message: Message) {
        self.history.lock().push(message);
    }

    /// Ordered copy of the history
    pub fn history(&self) -> Vec<Message> {
        self.history.lock().clone()
    }
}

// ─────────────────────────────────────────────────────────────────
// Session Registry
// ─────────────────────────────────────────────────────────────────

pub struct SessionRegistry {
    parent: Arc<dyn Agent>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// `parent` is forked once per new session
    pub fn new(parent: Arc<dyn Agent>) -> Self {
        Self {
            parent,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The sender's session, created under the write lock on first contact
    pub fn get_or_create(&self, sender: &str) -> Arc<Session> {
        if let Some(session) = self.get(sender) {
            return session;
        }

        let mut sessions = self.sessions.write();
        sessions
            .entry(sender.to_string())
            .or_insert_with(|| {
                info!(sender = %sender, "New conversation");
                Arc::new(Session::new(self.parent.fork(ForkOptions::default())))
            })
            .clone()
    }

    pub fn get(&self, sender: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(sender).cloned()
    }

    /// Append to the sender's history, creating the session if needed
    pub fn append(&self, sender: &str, message: Message) {
        self.get_or_create(sender).append(message);
    }

    /// The sender's history, empty for unknown senders
    pub fn history(&self, sender: &str) -> Vec<Message> {
        self.get(sender).map(|s| s.history()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::ScriptedAgent;
    use std::thread;

    fn registry() -> (Arc<ScriptedAgent>, SessionRegistry) {
        let parent = Arc::new(ScriptedAgent::new("Holmes", "english"));
        let registry = SessionRegistry::new(parent.clone());
        (parent, registry)
    }

    #[test]
    fn test_one_session_per_sender() {
        let (parent, registry) = registry();
        let a = registry.get_or_create("Watson");
        let b = registry.get_or_create("Watson");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(parent.fork_count(), 1);

        registry.get_or_create("Hudson");
        assert_eq!(registry.len(), 2);
        assert_eq!(parent.fork_count(), 2);
    }

    #[test]
    fn test_concurrent_first_contact() {
        let (parent, registry) = registry();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.get_or_create("Watson"))
            })
            .collect();
        let sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(parent.fork_count(), 1);
    }

    #[test]
    fn test_history_is_ordered_and_scoped() {
        let (_, registry) = registry();
        registry.append("Watson", Message::new("Watson", "one"));
        registry.append("Watson", Message::new("Holmes", "two"));
        registry.append("Hudson", Message::new("Hudson", "tea?"));

        let texts: Vec<_> = registry.history("Watson").into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert_eq!(registry.history("Hudson").len(), 1);
    }

    #[test]
    fn test_unknown_sender_history_is_empty() {
        let (_, registry) = registry();
        assert!(registry.history("Moriarty").is_empty());
        assert!(registry.is_empty());
    }
}
