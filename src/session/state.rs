// Session
//
// One OS login session: immutable id, cached platform attributes and the
// state transitions that derive events. A session never delivers events
// itself; transition methods return the event and the registry emits it.

use super::attributes::{AttributeSource, SessionRecord};
use super::clock::{AlertClock, IdleClock};
use super::filter::{Classification, SessionTypeFilter};
use crate::event::{Event, State};
use crate::types::{current_timestamp, flag, SessionId, Timestamp, FIRST_REGULAR_UID};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Property keys every session answers
pub const PROPERTY_KEYS: [&str; 13] = [
    "username", "sid", "uid", "state", "remote", "locked", "active", "system", "display", "type",
    "service", "classname", "alive",
];

/// Mutable part of the session, guarded by one short lock
#[derive(Debug, Default)]
struct Flags {
    state: State,
    alive: bool,
    locked: bool,
    remote: Option<bool>,
    active: Option<bool>,
    system: Option<bool>,
    record: Option<SessionRecord>,
}

/// Attributes that never change for a given sid, resolved once
#[derive(Debug, Default)]
struct Identity {
    user: OnceCell<String>,
    uid: OnceCell<u32>,
    class: OnceCell<String>,
    service: OnceCell<String>,
    kind: OnceCell<String>,
    display: OnceCell<String>,
}

pub struct Session {
    sid: SessionId,
    source: Arc<dyn AttributeSource>,
    flags: Mutex<Flags>,
    identity: Identity,
    clock: Box<dyn IdleClock>,
}

impl Session {
    pub fn new(sid: &str, source: Arc<dyn AttributeSource>) -> Self {
        Self::with_clock(sid, source, Box::new(AlertClock::new(current_timestamp())))
    }

    pub fn with_clock(sid: &str, source: Arc<dyn AttributeSource>, clock: Box<dyn IdleClock>) -> Self {
        Self {
            sid: sid.to_string(),
            source,
            flags: Mutex::new(Flags::default()),
            identity: Identity::default(),
            clock,
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// User name, `@<sid>` when it can't be resolved
    pub fn name(&self) -> String {
        match self.identity.user.get() {
            Some(user) => user.clone(),
            None => format!("@{}", self.sid),
        }
    }

    pub fn uid(&self) -> Option<u32> {
        self.identity.uid.get().copied()
    }

    pub fn state(&self) -> State {
        self.flags.lock().state
    }

    pub fn alive(&self) -> bool {
        self.flags.lock().alive
    }

    pub fn locked(&self) -> bool {
        self.flags.lock().locked
    }

    /// Remote session? Unknown counts as local.
    pub fn remote(&self) -> bool {
        self.flags.lock().remote.unwrap_or(false)
    }

    pub fn foreground(&self) -> bool {
        self.state() == State::Foreground
    }

    pub fn active(&self) -> bool {
        let flags = self.flags.lock();
        flags.active.unwrap_or(flags.state == State::Foreground)
    }

    /// System (service) session rather than an interactive user one
    pub fn system(&self) -> bool {
        let explicit = self.flags.lock().system;
        explicit.unwrap_or_else(|| self.uid().is_some_and(|uid| uid < FIRST_REGULAR_UID))
    }

    pub fn classname(&self) -> &str {
        self.identity.class.get().map(String::as_str).unwrap_or("")
    }

    pub fn service(&self) -> &str {
        self.identity.service.get().map(String::as_str).unwrap_or("")
    }

    pub fn session_type(&self) -> &str {
        self.identity.kind.get().map(String::as_str).unwrap_or("")
    }

    pub fn display(&self) -> &str {
        self.identity.display.get().map(String::as_str).unwrap_or("")
    }

    pub fn classification(&self) -> Classification {
        Classification {
            system: self.system(),
            remote: self.remote(),
            locked: self.locked(),
            foreground: self.foreground(),
            active: self.active(),
        }
    }

    /// Does this session pass every dimension of the filter?
    pub fn test(&self, filter: &SessionTypeFilter) -> bool {
        match filter.rejection(&self.classification()) {
            Some(dimension) => {
                trace!(sid = %self.sid, dimension, filter = %filter, "Session rejected by filter");
                false
            }
            None => true,
        }
    }

    /// Move to a new state, returning the derived event if any
    ///
    /// Unchanged states derive nothing, duplicated platform notifications
    /// are absorbed here.
    pub fn set(&self, state: State) -> Option<Event> {
        {
            let mut flags = self.flags.lock();
            if flags.state == state {
                return None;
            }
            flags.state = state;
        }

        info!(sid = %self.sid, user = %self.name(), state = %state, "Session state changed");
        state.entry_event()
    }

    pub fn set_locked(&self, locked: bool) -> Option<Event> {
        {
            let mut flags = self.flags.lock();
            if flags.locked == locked {
                return None;
            }
            flags.locked = locked;
        }

        info!(sid = %self.sid, user = %self.name(), locked, "Session lock changed");
        Some(if locked { Event::LOCK } else { Event::UNLOCK })
    }

    /// Returns true if the flag actually changed
    pub(crate) fn set_alive(&self, alive: bool) -> bool {
        let mut flags = self.flags.lock();
        let changed = flags.alive != alive;
        flags.alive = alive;
        changed
    }

    fn query(&self) -> Option<SessionRecord> {
        match self.source.query(&self.sid) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(sid = %self.sid, error = %e, "Can't query session attributes");
                None
            }
        }
    }

    fn resolve_identity(&self, record: &SessionRecord) {
        let identity = &self.identity;

        if let Some(uid) = record.uid {
            let _ = identity.uid.set(uid);
        }

        let user = record
            .user
            .clone()
            .filter(|user| !user.is_empty())
            .or_else(|| record.uid.and_then(lookup_user_name));
        if let Some(user) = user {
            let _ = identity.user.set(user);
        }

        for (cell, value) in [
            (&identity.class, &record.class),
            (&identity.service, &record.service),
            (&identity.kind, &record.kind),
            (&identity.display, &record.display),
        ] {
            if let Some(value) = value {
                let _ = cell.set(value.clone());
            }
        }
    }

    /// Load attributes without deriving events
    pub fn prime(&self) {
        let Some(record) = self.query() else {
            return;
        };

        self.resolve_identity(&record);

        let mut flags = self.flags.lock();
        if let Some(state) = record.state {
            flags.state = state;
        }
        flags.locked = record.locked.unwrap_or(false);
        flags.remote = record.remote;
        flags.active = record.active;
        flags.system = record.system;
        flags.record = Some(record);

        debug!(sid = %self.sid, state = %flags.state, locked = flags.locked, "Session primed");
    }

    /// Re-read attributes, returning the events the changes derive
    pub fn refresh_attributes(&self) -> Vec<Event> {
        let Some(record) = self.query() else {
            return Vec::new();
        };

        self.resolve_identity(&record);

        {
            let mut flags = self.flags.lock();
            if record.remote.is_some() {
                flags.remote = record.remote;
            }
            if record.active.is_some() {
                flags.active = record.active;
            }
            if record.system.is_some() {
                flags.system = record.system;
            }
            flags.record = Some(record.clone());
        }

        let mut events = Vec::new();
        if let Some(event) = record.locked.and_then(|locked| self.set_locked(locked)) {
            events.push(event);
        }
        if let Some(event) = record.state.and_then(|state| self.set(state)) {
            events.push(event);
        }
        events
    }

    pub fn last_alert(&self) -> Timestamp {
        self.clock.idle_since()
    }

    pub fn reset_idle_clock(&self, now: Timestamp) {
        self.clock.reset(now);
    }

    pub(crate) fn clock_event(&self, event: Event, now: Timestamp) {
        self.clock.on_event(event, now);
    }

    /// Property lookup, keys are case-insensitive
    pub fn property(&self, key: &str) -> Option<String> {
        let key = PROPERTY_KEYS.iter().find(|k| key.eq_ignore_ascii_case(k))?;

        let value = match *key {
            "username" => self.name(),
            "sid" => self.sid.clone(),
            "uid" => self.uid().map(|uid| uid.to_string()).unwrap_or_default(),
            "state" => self.state().name().to_string(),
            "remote" => flag(self.remote()),
            "locked" => flag(self.locked()),
            "active" => flag(self.active()),
            "system" => flag(self.system()),
            "display" => self.display().to_string(),
            "type" => self.session_type().to_string(),
            "service" => self.service().to_string(),
            "classname" => self.classname().to_string(),
            "alive" => flag(self.alive()),
            _ => return None,
        };

        Some(value)
    }

    pub fn properties(&self) -> Map<String, Value> {
        PROPERTY_KEYS
            .iter()
            .filter_map(|key| self.property(key).map(|value| (key.to_string(), Value::String(value))))
            .collect()
    }

    /// Environment variable of a process running in this session
    pub fn getenv(&self, name: &str) -> Option<String> {
        let record = self.flags.lock().record.clone()?;
        let value = self.source.environment(&self.sid, &record, name);
        if value.is_none() {
            debug!(sid = %self.sid, name, "Environment variable not found in session");
        }
        value
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.sid)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("user", &self.name())
            .field("state", &self.state())
            .field("alive", &self.alive())
            .finish()
    }
}

#[cfg(target_os = "linux")]
fn lookup_user_name(uid: u32) -> Option<String> {
    use nix::unistd::{Uid, User};

    match User::from_uid(Uid::from_raw(uid)) {
        Ok(user) => user.map(|user| user.name),
        Err(e) => {
            warn!(uid, error = %e, "Can't resolve user name");
            None
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn lookup_user_name(_uid: u32) -> Option<String> {
    None
}
