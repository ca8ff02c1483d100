use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::ChatError;
use crate::events::{Domain, Role, Turn};

/// Opaque session identity supplied by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Fresh random key for transports without their own identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for SessionKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Read-only summary of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_key: SessionKey,
    pub selected_domain: Domain,
    pub turn_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

struct SessionState {
    history: VecDeque<Turn>,
    selected_domain: Domain,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl SessionState {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            history: VecDeque::new(),
            selected_domain: Domain::Normal,
            created_at: now,
            last_activity: now,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

struct SessionSlot {
    state: Mutex<SessionState>,
    /// Held for the whole of a turn so requests on one key never interleave
    turn_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SessionSlot {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-session chat history and domain selection.
///
/// Sessions are created lazily on first touch. History is bounded by
/// `history_limit`, enforced only when a user turn is appended, so an
/// assistant append may leave one extra entry until the next user turn.
pub struct SessionStore {
    history_limit: usize,
    sessions: RwLock<HashMap<SessionKey, Arc<SessionSlot>>>,
}

impl SessionStore {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit: history_limit.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Append a user turn and trim to the most recent `history_limit` entries.
    pub fn append_user(&self, key: &SessionKey, text: &str) -> Result<(), ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::empty_text());
        }

        let slot = self.slot(key);
        let mut state = slot.state();
        state.history.push_back(Turn::user(text));
        let dropped = trim_history(&mut state.history, self.history_limit);
        state.touch();
        debug!(session = %key, turns = state.history.len(), dropped, "user turn appended");
        Ok(())
    }

    /// Append an assistant turn. Empty text is ignored and no trim happens.
    pub fn append_assistant(&self, key: &SessionKey, text: &str) {
        if text.is_empty() {
            return;
        }

        let slot = self.slot(key);
        let mut state = slot.state();
        state.history.push_back(Turn::assistant(text));
        state.touch();
        debug!(session = %key, turns = state.history.len(), "assistant turn appended");
    }

    /// Select a domain for the session. Unknown selectors leave the current
    /// selection in place. Returns the selection after the call.
    pub fn set_domain(&self, key: &SessionKey, selector: &str) -> Domain {
        let slot = self.slot(key);
        let mut state = slot.state();
        match Domain::parse_selector(selector) {
            Some(domain) => {
                state.selected_domain = domain;
                state.touch();
                debug!(session = %key, %domain, "domain selected");
            }
            None => {
                debug!(session = %key, selector, kept = %state.selected_domain, "unknown domain ignored");
            }
        }
        state.selected_domain
    }

    pub fn selected_domain(&self, key: &SessionKey) -> Domain {
        self.slot(key).state().selected_domain
    }

    /// Clear history; the domain selection is kept.
    pub fn reset(&self, key: &SessionKey) {
        let slot = self.slot(key);
        let mut state = slot.state();
        state.history.clear();
        state.touch();
        debug!(session = %key, domain = %state.selected_domain, "history reset");
    }

    /// Owned copy of the history in conversation order.
    pub fn snapshot(&self, key: &SessionKey) -> Vec<Turn> {
        self.slot(key).state().history.iter().cloned().collect()
    }

    pub fn info(&self, key: &SessionKey) -> Option<SessionInfo> {
        let slot = self.existing(key)?;
        let state = slot.state();
        Some(SessionInfo {
            session_key: key.clone(),
            selected_domain: state.selected_domain,
            turn_count: state.history.len(),
            created_at: state.created_at,
            last_activity: state.last_activity,
        })
    }

    /// Lock that serializes turns for one session.
    pub fn turn_lock(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.slot(key).turn_lock)
    }

    /// Forget a session entirely.
    pub fn remove(&self, key: &SessionKey) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
            .is_some()
    }

    /// Drop sessions idle for longer than `max_idle`; returns how many went.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = sessions.len();
        sessions.retain(|_, slot| slot.state().last_activity >= cutoff);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn existing(&self, key: &SessionKey) -> Option<Arc<SessionSlot>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn slot(&self, key: &SessionKey) -> Arc<SessionSlot> {
        if let Some(slot) = self.existing(key) {
            return slot;
        }
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let slot = sessions.entry(key.clone()).or_insert_with(|| {
            debug!(session = %key, "session created");
            Arc::new(SessionSlot {
                state: Mutex::new(SessionState::new()),
                turn_lock: Arc::new(tokio::sync::Mutex::new(())),
            })
        });
        Arc::clone(slot)
    }
}

/// Keep the newest `limit` turns, oldest dropped first.
///
/// This is stricter than a plain count-based trim: a window that would open
/// on an assistant reply loses that reply as well, so history always starts
/// with a user turn. With an even `limit` and alternating turns the window
/// after a user append is therefore `limit - 1` long.
fn trim_history(history: &mut VecDeque<Turn>, limit: usize) -> usize {
    let mut dropped = 0;
    while history.len() > limit {
        history.pop_front();
        dropped += 1;
    }
    while history.len() > 1 && history.front().is_some_and(|t| t.role != Role::User) {
        history.pop_front();
        dropped += 1;
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::from("session-a")
    }

    #[test]
    fn empty_user_text_is_rejected() {
        let store = SessionStore::new(6);
        let err = store.append_user(&key(), "   \n").unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(store.snapshot(&key()).is_empty());
    }

    #[test]
    fn user_text_is_trimmed() {
        let store = SessionStore::new(6);
        store.append_user(&key(), "  hello  ").unwrap();
        assert_eq!(store.snapshot(&key()), vec![Turn::user("hello")]);
    }

    #[test]
    fn history_never_exceeds_limit_after_user_append() {
        let store = SessionStore::new(4);
        for i in 0..20 {
            store.append_user(&key(), &format!("q{i}")).unwrap();
            assert!(store.snapshot(&key()).len() <= 4);
            store.append_assistant(&key(), &format!("a{i}"));
        }

        let contents: Vec<_> = store
            .snapshot(&key())
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(contents, vec!["q18", "a18", "q19", "a19"]);
    }

    #[test]
    fn assistant_append_can_exceed_limit_by_one() {
        let store = SessionStore::new(3);
        store.append_user(&key(), "q0").unwrap();
        store.append_assistant(&key(), "a0");
        store.append_user(&key(), "q1").unwrap();
        store.append_assistant(&key(), "a1");
        assert_eq!(store.snapshot(&key()).len(), 4);

        store.append_user(&key(), "q2").unwrap();
        let history = store.snapshot(&key());
        assert_eq!(history, vec![Turn::user("q1"), Turn::assistant("a1"), Turn::user("q2")]);
    }

    #[test]
    fn trimmed_window_never_opens_on_assistant_reply() {
        let store = SessionStore::new(2);
        store.append_user(&key(), "q0").unwrap();
        store.append_assistant(&key(), "a0");
        store.append_user(&key(), "q1").unwrap();
        let history = store.snapshot(&key());
        assert_eq!(history, vec![Turn::user("q1")]);
        assert_eq!(history[0].role, Role::User);
    }

    #[test]
    fn trim_keeps_insertion_order() {
        let store = SessionStore::new(3);
        for i in 0..5 {
            store.append_user(&key(), &format!("q{i}")).unwrap();
        }
        let contents: Vec<_> = store
            .snapshot(&key())
            .into_iter()
            .map(|t| t.content)
            .collect();
        assert_eq!(contents, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn empty_assistant_text_is_ignored() {
        let store = SessionStore::new(6);
        store.append_user(&key(), "hi").unwrap();
        store.append_assistant(&key(), "");
        assert_eq!(store.snapshot(&key()).len(), 1);
    }

    #[test]
    fn invalid_domain_keeps_previous_selection() {
        let store = SessionStore::new(6);
        assert_eq!(store.selected_domain(&key()), Domain::Normal);
        assert_eq!(store.set_domain(&key(), "astrology"), Domain::Normal);
        assert_eq!(store.selected_domain(&key()), Domain::Normal);

        assert_eq!(store.set_domain(&key(), "Healthcare"), Domain::Healthcare);
        assert_eq!(store.set_domain(&key(), "astrology"), Domain::Healthcare);
        assert_eq!(store.selected_domain(&key()), Domain::Healthcare);
    }

    #[test]
    fn reset_clears_history_but_keeps_domain() {
        let store = SessionStore::new(6);
        store.set_domain(&key(), "finance");
        for i in 0..4 {
            store.append_user(&key(), &format!("q{i}")).unwrap();
            store.append_assistant(&key(), &format!("a{i}"));
        }
        store.reset(&key());
        assert!(store.snapshot(&key()).is_empty());
        assert_eq!(store.selected_domain(&key()), Domain::Finance);
    }

    #[test]
    fn snapshot_is_detached_from_store() {
        let store = SessionStore::new(6);
        store.append_user(&key(), "hi").unwrap();
        let mut snapshot = store.snapshot(&key());
        snapshot.push(Turn::assistant("injected"));
        snapshot[0].content.push_str("!!!");
        assert_eq!(store.snapshot(&key()), vec![Turn::user("hi")]);
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new(6);
        let other = SessionKey::from("session-b");
        store.append_user(&key(), "mine").unwrap();
        store.set_domain(&other, "healthcare");
        assert!(store.snapshot(&other).is_empty());
        assert_eq!(store.selected_domain(&key()), Domain::Normal);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn info_reports_existing_sessions_only() {
        let store = SessionStore::new(6);
        assert!(store.info(&key()).is_none());
        store.append_user(&key(), "hi").unwrap();
        let info = store.info(&key()).unwrap();
        assert_eq!(info.turn_count, 1);
        assert_eq!(info.selected_domain, Domain::Normal);
        assert!(info.last_activity >= info.created_at);
    }

    #[test]
    fn remove_and_prune() {
        let store = SessionStore::new(6);
        store.append_user(&key(), "hi").unwrap();
        assert!(store.remove(&key()));
        assert!(!store.remove(&key()));
        assert!(store.is_empty());

        store.append_user(&key(), "hi").unwrap();
        assert_eq!(store.prune_idle(Duration::hours(1)), 0);
        assert_eq!(store.prune_idle(Duration::seconds(-1)), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn zero_limit_still_keeps_latest_user_turn() {
        let store = SessionStore::new(0);
        store.append_user(&key(), "one").unwrap();
        store.append_user(&key(), "two").unwrap();
        assert_eq!(store.snapshot(&key()), vec![Turn::user("two")]);
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(SessionKey::generate(), SessionKey::generate());
    }
}
