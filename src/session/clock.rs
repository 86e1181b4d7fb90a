// Idle Clock & Session Factory
//
// Hooks a host can inject into session construction: the idle tracking
// strategy used by pulse rules, and the factory building new sessions.

use super::attributes::AttributeSource;
use super::state::Session;
use crate::event::Event;
use crate::types::{current_timestamp, Timestamp};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Idle tracking capability of a session
pub trait IdleClock: Send + Sync {
    /// Called for every event the session emits, before delivery, and
    /// after every pulse fired for it
    fn on_event(&self, _event: Event, _now: Timestamp) {}

    /// Restart the idle period at `now`
    fn reset(&self, now: Timestamp);

    /// Start of the current idle period
    fn idle_since(&self) -> Timestamp;
}

/// Default clock: idle since the last alert activation
#[derive(Debug)]
pub struct AlertClock {
    last_alert: AtomicU64,
}

impl AlertClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            last_alert: AtomicU64::new(now),
        }
    }
}

impl Default for AlertClock {
    fn default() -> Self {
        Self::new(current_timestamp())
    }
}

impl IdleClock for AlertClock {
    fn reset(&self, now: Timestamp) {
        self.last_alert.store(now, Ordering::SeqCst);
    }

    fn idle_since(&self) -> Timestamp {
        self.last_alert.load(Ordering::SeqCst)
    }
}

/// Builds the session object for a newly observed session id
pub trait SessionFactory: Send + Sync {
    fn create(&self, sid: &str, source: Arc<dyn AttributeSource>) -> Session;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionFactory;

impl SessionFactory for DefaultSessionFactory {
    fn create(&self, sid: &str, source: Arc<dyn AttributeSource>) -> Session {
        Session::new(sid, source)
    }
}

impl<F> SessionFactory for F
where
    F: Fn(&str, Arc<dyn AttributeSource>) -> Session + Send + Sync,
{
    fn create(&self, sid: &str, source: Arc<dyn AttributeSource>) -> Session {
        self(sid, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySource;

    #[test]
    fn test_alert_clock_reset() {
        let clock = AlertClock::new(100);
        assert_eq!(clock.idle_since(), 100);
        clock.reset(250);
        assert_eq!(clock.idle_since(), 250);
    }

    #[test]
    fn test_closure_factory() {
        let factory = |sid: &str, source: Arc<dyn AttributeSource>| {
            Session::with_clock(sid, source, Box::new(AlertClock::new(42)))
        };
        let session = factory.create("c7", Arc::new(MemorySource::new()));
        assert_eq!(session.sid(), "c7");
        assert_eq!(session.last_alert(), 42);
    }
}
