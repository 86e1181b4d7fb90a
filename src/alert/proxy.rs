// Alert Proxy
//
// One configured rule: which events, which sessions, how often for pulse
// rules, and the action to run when all of that matches.

use super::action::Activatable;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::session::{Session, SessionTypeFilter};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

pub struct AlertProxy {
    name: String,
    events: Event,
    filter: SessionTypeFilter,
    classname: String,
    service: String,
    interval: u64,
    action: Arc<dyn Activatable>,
}

impl AlertProxy {
    pub fn new(name: &str, events: Event, action: Arc<dyn Activatable>) -> Self {
        Self {
            name: name.to_string(),
            events,
            filter: SessionTypeFilter::default(),
            classname: String::new(),
            service: String::new(),
            interval: 0,
            action,
        }
    }

    pub fn with_filter(mut self, filter: SessionTypeFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_classname(mut self, classname: &str) -> Self {
        self.classname = classname.to_string();
        self
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    /// Pulse interval in seconds
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> Event {
        self.events
    }

    pub fn filter(&self) -> &SessionTypeFilter {
        &self.filter
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn action(&self) -> Arc<dyn Activatable> {
        self.action.clone()
    }

    pub fn is_pulse(&self) -> bool {
        self.events.contains(Event::PULSE)
    }

    /// Reject rules that can never work
    pub fn validate(&self) -> Result<()> {
        if self.events.is_empty() {
            return Err(Error::MissingAttribute {
                rule: self.name.clone(),
                attribute: "event".to_string(),
            });
        }
        if self.is_pulse() && self.interval == 0 {
            return Err(Error::MissingAttribute {
                rule: self.name.clone(),
                attribute: "interval".to_string(),
            });
        }
        Ok(())
    }

    pub fn handles(&self, event: Event) -> bool {
        self.events.contains(event)
    }

    /// Session side of the match: type filter, class and service
    pub fn matches(&self, session: &Session) -> bool {
        if !session.test(&self.filter) {
            return false;
        }

        if !self.classname.is_empty() && !self.classname.eq_ignore_ascii_case(session.classname()) {
            trace!(rule = %self.name, class = session.classname(), "Session class rejected");
            return false;
        }

        if !self.service.is_empty() && !self.service.eq_ignore_ascii_case(session.service()) {
            trace!(rule = %self.name, service = session.service(), "Session service rejected");
            return false;
        }

        true
    }

    pub fn test(&self, session: &Session, event: Event) -> bool {
        self.handles(event) && self.matches(session)
    }
}

impl fmt::Debug for AlertProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertProxy")
            .field("name", &self.name)
            .field("events", &self.events)
            .field("filter", &self.filter.to_string())
            .field("classname", &self.classname)
            .field("service", &self.service)
            .field("interval", &self.interval)
            .field("action", &self.action.name())
            .finish()
    }
}
