//! Session Registry.
//!
//! Process-wide map from session identifier to the live session, used to
//! route inbound frames and for observability. Sessions register on
//! connect and are removed on close; no session ever reads another
//! session's state.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::core::session::SessionRef;

/// Concurrency-safe registry of active sessions. Constructed once at
/// process start and shared by reference through the application state.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionRef>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns false (and leaves the registry
    /// untouched) when the identifier is already taken.
    pub fn insert(&self, session: SessionRef) -> bool {
        let key = session.session_id().to_string();
        match self.sessions.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(session);
                true
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRef> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn remove(&self, session_id: &str) -> Option<SessionRef> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
