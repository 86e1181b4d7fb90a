// Session Agent
//
// Owns a list of alert rules and evaluates them two ways: on every session
// event (event path) and periodically against idle sessions (pulse path).
// The pulse path also decides when it needs to run again.

use crate::alert::{AlertContext, AlertProxy};
use crate::error::Result;
use crate::event::{Event, State};
use crate::notification::{Activation, ActivationSender};
use crate::session::{Session, SessionObserver, SessionRegistry};
use crate::types::{current_timestamp, SharedSession, Timestamp};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Ceiling on the pulse re-check interval, in seconds
pub const DEFAULT_MAX_PULSE_CHECK: u64 = 600;

/// One row of the session listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub name: String,
    pub sid: String,
    pub state: State,
    pub locked: bool,
    pub remote: bool,
    pub system: bool,
    pub display: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub service: String,
    pub class: String,
    pub last_activity: Timestamp,
    pub next_pulse: Option<Timestamp>,
}

pub struct Agent {
    name: String,
    label: String,
    proxies: RwLock<Vec<Arc<AlertProxy>>>,
    timer: AtomicU64,
    max_pulse_check: u64,
    last_alert: AtomicU64,
    registry: Weak<SessionRegistry>,
    sender: Arc<ActivationSender>,
}

impl Agent {
    pub fn new(name: &str, registry: &Arc<SessionRegistry>, sender: Arc<ActivationSender>) -> Self {
        Self {
            name: name.to_string(),
            label: String::new(),
            proxies: RwLock::new(Vec::new()),
            timer: AtomicU64::new(0),
            max_pulse_check: DEFAULT_MAX_PULSE_CHECK,
            last_alert: AtomicU64::new(current_timestamp()),
            registry: Arc::downgrade(registry),
            sender,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Initial refresh timer in seconds, 0 for none
    pub fn with_timer(self, seconds: u64) -> Self {
        self.timer.store(seconds, Ordering::SeqCst);
        self
    }

    pub fn with_max_pulse_check(mut self, seconds: u64) -> Self {
        self.max_pulse_check = seconds;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }

    pub fn timer(&self) -> u64 {
        self.timer.load(Ordering::SeqCst)
    }

    pub fn max_pulse_check(&self) -> u64 {
        self.max_pulse_check
    }

    pub fn proxies(&self) -> Vec<Arc<AlertProxy>> {
        self.proxies.read().clone()
    }

    pub fn has_pulse_rules(&self) -> bool {
        self.proxies.read().iter().any(|proxy| proxy.is_pulse())
    }

    /// Install a rule
    ///
    /// Pulse rules drive the agent timer: an unset timer takes the rule
    /// interval, a timer longer than the interval shrinks to it.
    pub fn push_back(&self, proxy: AlertProxy) -> Result<()> {
        proxy.validate()?;

        if proxy.is_pulse() {
            let timer = self.timer();
            let interval = proxy.interval();

            if timer == 0 {
                warn!(
                    agent = %self.name,
                    rule = proxy.name(),
                    interval,
                    "Agent has no update timer, using the pulse interval"
                );
                self.timer.store(interval, Ordering::SeqCst);
            } else if interval < timer {
                info!(
                    agent = %self.name,
                    rule = proxy.name(),
                    interval,
                    timer,
                    "Pulse interval is lower than agent timer, shrinking timer"
                );
                self.timer.store(interval, Ordering::SeqCst);
            }

            debug!(agent = %self.name, timer = self.timer(), "Agent timer set");
        }

        debug!(agent = %self.name, rule = ?proxy, "Rule installed");
        self.proxies.write().push(Arc::new(proxy));
        Ok(())
    }

    /// Seconds since this agent last fired a rule
    pub fn value_at(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.last_alert.load(Ordering::SeqCst))
    }

    pub fn value(&self) -> u64 {
        self.value_at(current_timestamp())
    }

    fn session_count(&self) -> usize {
        self.registry
            .upgrade()
            .map(|registry| registry.sessions().iter().filter(|s| s.alive()).count())
            .unwrap_or(0)
    }

    pub fn properties_at(&self, now: Timestamp) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert("name".to_string(), Value::from(self.name.as_str()));
        properties.insert("label".to_string(), Value::from(self.label()));
        properties.insert("value".to_string(), Value::from(self.value_at(now)));
        properties.insert("timer".to_string(), Value::from(self.timer()));
        properties.insert("max-update-timer".to_string(), Value::from(self.max_pulse_check));
        properties.insert("sessions".to_string(), Value::from(self.session_count()));
        properties
    }

    /// Agent property by case-insensitive name
    pub fn property(&self, key: &str) -> Option<String> {
        self.properties_at(current_timestamp())
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| match value {
                Value::String(text) => text,
                other => other.to_string(),
            })
    }

    fn activate(&self, proxy: &AlertProxy, session: &Session, event: Event, now: Timestamp) {
        debug!(
            agent = %self.name,
            rule = proxy.name(),
            sid = %session.sid(),
            user = %session.name(),
            event = %event,
            "Rule matched"
        );

        let context = AlertContext::new(event, session.properties(), self.properties_at(now));
        self.sender.dispatch(Activation {
            rule: proxy.name().to_string(),
            action: proxy.action(),
            context,
        });

        session.reset_idle_clock(now);
        self.last_alert.store(now, Ordering::SeqCst);
    }

    /// Event path: activate every rule matching the event and session
    pub fn on_event_at(&self, session: &Session, event: Event, now: Timestamp) -> bool {
        let mut activated = false;

        for proxy in self.proxies() {
            if !proxy.handles(event) {
                continue;
            }
            if !proxy.matches(session) {
                trace!(agent = %self.name, rule = proxy.name(), sid = %session.sid(), "Rule skipped");
                continue;
            }
            self.activate(&proxy, session, event, now);
            activated = true;
        }

        activated
    }

    /// Pulse path: fire due pulse rules and re-arm the timer
    ///
    /// The timer becomes the time to the soonest pending pulse, capped by
    /// the max pulse check. Returns true if the timer changed.
    pub fn refresh_at(&self, now: Timestamp) -> bool {
        let pulses: Vec<Arc<AlertProxy>> =
            self.proxies().into_iter().filter(|proxy| proxy.is_pulse()).collect();

        let mut required_wait = self.max_pulse_check;

        if !pulses.is_empty() {
            if let Some(registry) = self.registry.upgrade() {
                registry.pulse_scan(now, |session| {
                    let mut fired = false;

                    for proxy in pulses.iter().filter(|proxy| proxy.matches(session)) {
                        // An earlier rule may have just reset the clock
                        let idle = now.saturating_sub(session.last_alert());
                        let interval = proxy.interval();
                        if idle >= interval {
                            debug!(agent = %self.name, rule = proxy.name(), idle, interval, "Emitting pulse");
                            self.activate(proxy, session, Event::PULSE, now);
                            required_wait = required_wait.min(interval);
                            fired = true;
                        } else {
                            required_wait = required_wait.min(interval - idle);
                        }
                    }

                    fired
                });
            }
        }

        if required_wait == 0 {
            return false;
        }

        let previous = self.timer.swap(required_wait, Ordering::SeqCst);
        debug!(agent = %self.name, wait = required_wait, "Next pulse check scheduled");
        previous != required_wait
    }

    pub fn refresh(&self) -> bool {
        self.refresh_at(current_timestamp())
    }

    /// Earliest future pulse deadline for a session
    fn next_pulse(&self, session: &Session, now: Timestamp) -> Option<Timestamp> {
        let last = session.last_alert();
        self.proxies()
            .iter()
            .filter(|proxy| proxy.is_pulse() && proxy.matches(session))
            .map(|proxy| last.saturating_add(proxy.interval()))
            .filter(|deadline| *deadline > now)
            .min()
    }

    pub fn report_at(&self, now: Timestamp) -> Vec<SessionReport> {
        let Some(registry) = self.registry.upgrade() else {
            return Vec::new();
        };

        registry
            .sessions()
            .iter()
            .filter(|session| session.alive())
            .map(|session| SessionReport {
                name: session.name(),
                sid: session.sid().to_string(),
                state: session.state(),
                locked: session.locked(),
                remote: session.remote(),
                system: session.system(),
                display: session.display().to_string(),
                kind: session.session_type().to_string(),
                service: session.service().to_string(),
                class: session.classname().to_string(),
                last_activity: session.last_alert(),
                next_pulse: self.next_pulse(session, now),
            })
            .collect()
    }

    pub fn report(&self) -> Vec<SessionReport> {
        self.report_at(current_timestamp())
    }
}

impl SessionObserver for Agent {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, session: &SharedSession, event: Event) -> bool {
        self.on_event_at(session, event, current_timestamp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Activatable, LogAction};
    use crate::error::{ActionError, Error};
    use crate::session::{
        AlertClock, AttributeSource, IdleClock, MemorySource, SessionRecord, SessionType, SessionTypeFilter,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Capture {
        contexts: Mutex<Vec<AlertContext>>,
    }

    impl Capture {
        fn count(&self) -> usize {
            self.contexts.lock().len()
        }
    }

    impl Activatable for Capture {
        fn name(&self) -> &str {
            "capture"
        }

        fn activate(&self, context: &AlertContext) -> std::result::Result<(), ActionError> {
            self.contexts.lock().push(context.clone());
            Ok(())
        }
    }

    struct Fixture {
        source: Arc<MemorySource>,
        registry: Arc<SessionRegistry>,
        agent: Arc<Agent>,
    }

    fn fixture(max_pulse_check: u64) -> Fixture {
        let source = Arc::new(MemorySource::new());
        let registry = Arc::new(SessionRegistry::new(source.clone()));
        let agent = Arc::new(
            Agent::new("users", &registry, Arc::new(ActivationSender::inline()))
                .with_max_pulse_check(max_pulse_check),
        );
        registry.register(agent.clone());
        Fixture {
            source,
            registry,
            agent,
        }
    }

    impl Fixture {
        fn logon(&self, sid: &str, record: SessionRecord) -> SharedSession {
            self.source.insert(sid, record);
            self.registry.notify_logon(sid);
            self.registry.get(sid).unwrap()
        }
    }

    fn pulse(name: &str, interval: u64, action: Arc<dyn Activatable>) -> AlertProxy {
        AlertProxy::new(name, Event::PULSE, action).with_interval(interval)
    }

    #[test]
    fn test_lock_rule_on_remote_locked_session() {
        let f = fixture(600);
        let capture = Arc::new(Capture::default());
        let filter = SessionTypeFilter::default()
            .with(SessionType::Local, false)
            .with(SessionType::Unlocked, false);
        f.agent
            .push_back(AlertProxy::new("lock", Event::LOCK, capture.clone()).with_filter(filter))
            .unwrap();

        let session = f.logon("c1", SessionRecord::default().with_uid(1000).with_remote(true));
        assert_eq!(capture.count(), 0);

        assert_eq!(session.set_locked(true), Some(Event::LOCK));
        assert!(f.agent.on_event_at(&session, Event::LOCK, 1_000));

        let contexts = capture.contexts.lock();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].property("locked").as_deref(), Some("true"));
        assert_eq!(contexts[0].property("name").as_deref(), Some("users"));
    }

    #[test]
    fn test_every_matching_rule_activates() {
        let f = fixture(600);
        let first = Arc::new(Capture::default());
        let second = Arc::new(Capture::default());
        f.agent.push_back(AlertProxy::new("a", Event::LOGON, first.clone())).unwrap();
        f.agent
            .push_back(AlertProxy::new("b", Event::LOGON | Event::LOGOFF, second.clone()))
            .unwrap();

        f.logon("c1", SessionRecord::default());
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
    }

    #[test]
    fn test_activation_resets_idle_clock() {
        let f = fixture(600);
        f.agent
            .push_back(AlertProxy::new("logon", Event::LOGON, Arc::new(LogAction::default())))
            .unwrap();
        let session = f.logon("c1", SessionRecord::default());
        session.reset_idle_clock(10);

        assert!(f.agent.on_event_at(&session, Event::LOGON, 500));
        assert_eq!(session.last_alert(), 500);
        assert_eq!(f.agent.value_at(530), 30);
        assert!(!f.agent.on_event_at(&session, Event::LOCK, 600));
        assert_eq!(session.last_alert(), 500);
    }

    #[test]
    fn test_pulse_rule_sets_unset_timer() {
        let f = fixture(600);
        assert_eq!(f.agent.timer(), 0);
        f.agent.push_back(pulse("slow", 14_400, Arc::new(LogAction::default()))).unwrap();
        assert_eq!(f.agent.timer(), 14_400);
        f.agent.push_back(pulse("fast", 300, Arc::new(LogAction::default()))).unwrap();
        assert_eq!(f.agent.timer(), 300);
        f.agent.push_back(pulse("slower", 900, Arc::new(LogAction::default()))).unwrap();
        assert_eq!(f.agent.timer(), 300);
    }

    #[test]
    fn test_pulse_rule_without_interval_is_rejected() {
        let f = fixture(600);
        let result = f.agent.push_back(pulse("broken", 0, Arc::new(LogAction::default())));
        assert!(matches!(result, Err(Error::MissingAttribute { .. })));
        assert!(f.agent.proxies().is_empty());
    }

    #[test]
    fn test_required_wait_is_soonest_deadline() {
        let f = fixture(600);
        let capture = Arc::new(Capture::default());
        f.agent.push_back(pulse("short", 300, capture.clone())).unwrap();
        f.agent.push_back(pulse("long", 900, capture.clone())).unwrap();

        let session = f.logon("c1", SessionRecord::default());
        session.reset_idle_clock(1_000);

        f.agent.refresh_at(1_100);
        assert_eq!(f.agent.timer(), 200);
        assert_eq!(capture.count(), 0);
    }

    #[test]
    fn test_timer_capped_by_max_pulse_check() {
        let f = fixture(600);
        f.agent.push_back(pulse("daily", 14_400, Arc::new(LogAction::default()))).unwrap();
        let session = f.logon("c1", SessionRecord::default());
        session.reset_idle_clock(5_000);

        assert!(f.agent.refresh_at(5_000));
        assert_eq!(f.agent.timer(), 600);
        assert!(!f.agent.refresh_at(5_000));
    }

    #[test]
    fn test_pulse_fires_and_resets_idle_clock() {
        let f = fixture(600);
        let capture = Arc::new(Capture::default());
        f.agent.push_back(pulse("idle", 300, capture.clone())).unwrap();
        let session = f.logon("c1", SessionRecord::default());
        session.reset_idle_clock(1_000);

        f.agent.refresh_at(1_400);
        assert_eq!(capture.count(), 1);
        assert_eq!(capture.contexts.lock()[0].event(), Event::PULSE);
        assert_eq!(session.last_alert(), 1_400);
        assert_eq!(f.agent.timer(), 300);

        // Immediately after, the session is idle for ~0 seconds
        f.agent.refresh_at(1_401);
        assert_eq!(capture.count(), 1);
        assert_eq!(f.agent.timer(), 299);
    }

    #[test]
    fn test_later_pulse_rule_sees_reset_clock() {
        let f = fixture(600);
        let capture = Arc::new(Capture::default());
        f.agent.push_back(pulse("short", 300, capture.clone())).unwrap();
        f.agent.push_back(pulse("long", 500, capture.clone())).unwrap();
        let session = f.logon("c1", SessionRecord::default());
        session.reset_idle_clock(1_000);

        f.agent.refresh_at(1_350);
        assert_eq!(capture.count(), 1);
        assert_eq!(f.agent.timer(), 300);
    }

    /// Clock whose reads are slow enough to race a concurrent logoff
    struct SlowClock(AlertClock);

    impl IdleClock for SlowClock {
        fn reset(&self, now: Timestamp) {
            self.0.reset(now);
        }

        fn idle_since(&self) -> Timestamp {
            std::thread::sleep(std::time::Duration::from_millis(300));
            self.0.idle_since()
        }
    }

    #[test]
    fn test_pulse_scan_is_ordered_with_logoff() {
        let source = Arc::new(MemorySource::new());
        source.insert("c1", SessionRecord::default().with_uid(1000));
        let factory = |sid: &str, source: Arc<dyn AttributeSource>| {
            Session::with_clock(sid, source, Box::new(SlowClock(AlertClock::new(0))))
        };
        let registry = Arc::new(SessionRegistry::with_factory(source, Box::new(factory)));
        let agent = Arc::new(Agent::new("users", &registry, Arc::new(ActivationSender::inline())));
        registry.register(agent.clone());

        let capture = Arc::new(Capture::default());
        agent
            .push_back(
                AlertProxy::new("idle", Event::PULSE | Event::LOGOFF, capture.clone()).with_interval(60),
            )
            .unwrap();
        registry.notify_logon("c1");

        let scan = {
            let agent = agent.clone();
            std::thread::spawn(move || agent.refresh_at(1_000))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        registry.notify_logoff("c1");
        scan.join().unwrap();

        let order: Vec<(Event, Option<String>)> = capture
            .contexts
            .lock()
            .iter()
            .map(|context| (context.event(), context.property("alive")))
            .collect();
        assert_eq!(
            order,
            vec![
                (Event::PULSE, Some("true".to_string())),
                (Event::LOGOFF, Some("false".to_string())),
            ]
        );
    }

    #[test]
    fn test_next_pulse_saturates() {
        let f = fixture(600);
        f.agent.push_back(pulse("never", u64::MAX, Arc::new(LogAction::default()))).unwrap();
        let session = f.logon("c1", SessionRecord::default());
        session.reset_idle_clock(1_000);

        assert_eq!(f.agent.report_at(1_100)[0].next_pulse, Some(u64::MAX));
    }

    #[test]
    fn test_pulse_respects_filters() {
        let f = fixture(600);
        let capture = Arc::new(Capture::default());
        let locked_only = SessionTypeFilter::default().with(SessionType::Unlocked, false);
        f.agent
            .push_back(pulse("locked", 60, capture.clone()).with_filter(locked_only))
            .unwrap();
        let session = f.logon("c1", SessionRecord::default());
        session.reset_idle_clock(0);

        f.agent.refresh_at(1_000);
        assert_eq!(capture.count(), 0);
        assert_eq!(f.agent.timer(), 600);
    }

    #[test]
    fn test_report_rows() {
        let f = fixture(600);
        f.agent.push_back(pulse("idle", 300, Arc::new(LogAction::default()))).unwrap();
        let session = f.logon(
            "c1",
            SessionRecord::default().with_uid(1000).with_user("alice").with_locked(true),
        );
        session.reset_idle_clock(1_000);

        let report = f.agent.report_at(1_100);
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].name, "alice");
        assert!(report[0].locked);
        assert_eq!(report[0].last_activity, 1_000);
        assert_eq!(report[0].next_pulse, Some(1_300));

        assert_eq!(f.agent.report_at(1_400)[0].next_pulse, None);
        let json = serde_json::to_value(&report[0]).unwrap();
        assert_eq!(json["type"], Value::String(String::new()));
    }

    #[test]
    fn test_agent_properties() {
        let f = fixture(900);
        f.logon("c1", SessionRecord::default());
        assert_eq!(f.agent.property("NAME").as_deref(), Some("users"));
        assert_eq!(f.agent.property("label").as_deref(), Some("users"));
        assert_eq!(f.agent.property("max-update-timer").as_deref(), Some("900"));
        assert_eq!(f.agent.property("sessions").as_deref(), Some("1"));
        assert_eq!(f.agent.property("nope"), None);
    }
}
