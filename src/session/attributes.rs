// Session Attribute Sources
//
// Platform side of attribute lookups. A source answers "what does the OS
// currently say about this session"; sessions cache what they get back.

use crate::error::QueryError;
use crate::event::State;
use crate::types::SessionId;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Raw attributes of one session as reported by the platform
///
/// Fields the platform did not report stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub uid: Option<u32>,
    pub user: Option<String>,
    pub state: Option<State>,
    pub active: Option<bool>,
    pub remote: Option<bool>,
    pub locked: Option<bool>,
    pub system: Option<bool>,
    pub class: Option<String>,
    pub service: Option<String>,
    pub kind: Option<String>,
    pub display: Option<String>,
    pub scope: Option<String>,
    pub leader: Option<u32>,
}

impl SessionRecord {
    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_remote(mut self, remote: bool) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class = Some(class.to_string());
        self
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.service = Some(service.to_string());
        self
    }
}

/// Attribute lookup contract implemented once per platform
pub trait AttributeSource: Send + Sync {
    /// Current attributes of a session
    fn query(&self, sid: &str) -> Result<SessionRecord, QueryError>;

    /// Ids of every session the platform currently knows about
    fn list(&self) -> Result<Vec<SessionId>, QueryError>;

    /// Environment variable from a process running inside the session
    fn environment(&self, _sid: &str, _record: &SessionRecord, _name: &str) -> Option<String> {
        None
    }
}

/// In-memory source, fed by hand
///
/// Used by hosts without a native adapter and throughout the tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    records: RwLock<BTreeMap<SessionId, SessionRecord>>,
    environment: RwLock<BTreeMap<(SessionId, String), String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sid: &str, record: SessionRecord) {
        self.records.write().insert(sid.to_string(), record);
    }

    /// Modify an existing record in place, returns false if unknown
    pub fn update<F: FnOnce(&mut SessionRecord)>(&self, sid: &str, change: F) -> bool {
        match self.records.write().get_mut(sid) {
            Some(record) => {
                change(record);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, sid: &str) -> Option<SessionRecord> {
        self.records.write().remove(sid)
    }

    pub fn set_env(&self, sid: &str, name: &str, value: &str) {
        self.environment
            .write()
            .insert((sid.to_string(), name.to_string()), value.to_string());
    }
}

impl AttributeSource for MemorySource {
    fn query(&self, sid: &str) -> Result<SessionRecord, QueryError> {
        self.records
            .read()
            .get(sid)
            .cloned()
            .ok_or_else(|| QueryError::NotFound(sid.to_string()))
    }

    fn list(&self) -> Result<Vec<SessionId>, QueryError> {
        Ok(self.records.read().keys().cloned().collect())
    }

    fn environment(&self, sid: &str, _record: &SessionRecord, name: &str) -> Option<String> {
        self.environment
            .read()
            .get(&(sid.to_string(), name.to_string()))
            .cloned()
    }
}
