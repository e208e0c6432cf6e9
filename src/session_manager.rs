//! Session manager: named, isolated interpreter sessions.
//!
//! Maintains the id-to-session map behind the broker's session tools.
//! Ids are 128-bit random UUIDs, so one client cannot hijack another's
//! session by guessing.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SandboxConfig;
use crate::error::{Result, SandboxError};
use crate::interpreter::{ExecutionResult, Session};

/// Owns every live session. Single-writer: the broker is single-threaded,
/// so execute calls against one session are naturally serialized.
pub struct SessionManager {
    config: Arc<SandboxConfig>,
    sessions: HashMap<String, Session>,
}

impl SessionManager {
    pub fn new(config: Arc<SandboxConfig>) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    /// Mints a fresh session and returns its id.
    pub fn create(&mut self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(id.clone(), self.config.clone());
        self.sessions.insert(id.clone(), session);
        tracing::info!(session = %id, "session created");
        id
    }

    /// Removes and destroys a session. Returns false when the id was
    /// unknown.
    pub fn delete(&mut self, id: &str) -> bool {
        let removed = self.sessions.remove(id).is_some();
        if removed {
            tracing::info!(session = %id, "session deleted");
        }
        removed
    }

    /// Looks a session up without executing anything.
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Executes a snippet inside an existing session.
    ///
    /// # Errors
    ///
    /// [`SandboxError::UnknownSession`] (carrying the id) when no session
    /// exists under `id`; no session is created implicitly.
    pub fn execute_in(&mut self, id: &str, code: &str) -> Result<ExecutionResult> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SandboxError::UnknownSession(id.to_string()))?;
        Ok(session.execute(code))
    }

    /// Snapshot of the live session ids, sorted for stable output.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(SandboxConfig::default()))
    }

    #[test]
    fn test_create_returns_unique_ids() {
        let mut m = manager();
        let a = m.create();
        let b = m.create();
        assert_ne!(a, b);
        assert_eq!(m.list().len(), 2);
    }

    #[test]
    fn test_get_and_delete() {
        let mut m = manager();
        let id = m.create();
        assert!(m.get(&id).is_some());
        assert!(m.delete(&id));
        assert!(m.get(&id).is_none());
        assert!(!m.delete(&id));
    }

    #[test]
    fn test_execute_in_unknown_session_is_domain_error() {
        let mut m = manager();
        let err = m.execute_in("no-such-id", "1 + 1").unwrap_err();
        match err {
            SandboxError::UnknownSession(id) => assert_eq!(id, "no-such-id"),
            other => panic!("unexpected error: {other}"),
        }
        // Nothing was created implicitly.
        assert!(m.list().is_empty());
    }

    #[test]
    fn test_execute_in_session_keeps_state() {
        let mut m = manager();
        let id = m.create();
        assert!(m.execute_in(&id, "x = 42").unwrap().success);
        let result = m.execute_in(&id, "x * 2").unwrap();
        assert!(result.success);
        assert!(result.output.contains("84"));
    }

    #[test]
    fn test_list_is_sorted_snapshot() {
        let mut m = manager();
        let mut ids = vec![m.create(), m.create(), m.create()];
        ids.sort();
        assert_eq!(m.list(), ids);
    }
}
