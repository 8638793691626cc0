//! Bookkeeping for the active heat pump sessions.

use std::collections::BTreeMap;

use crate::session::Session;

/// Owns one [`Session`] per monitored heat pump, keyed by a caller-chosen
/// identifier such as the MQTT node name.
#[derive(Default)]
pub struct Registry {
    sessions: BTreeMap<String, Session>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session, handing back any previous session under the same
    /// identifier so the caller can stop it.
    pub fn add(&mut self, id: impl Into<String>, session: Session) -> Option<Session> {
        self.sessions.insert(id.into(), session)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
