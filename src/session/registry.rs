// Session Registry
//
// Authoritative set of live sessions and of the observers (agents) that
// receive their events. Platform adapters feed it through the notify_*
// calls or through `refresh` with the full set of live ids.
//
// Locking: `inner` is a short data lock, never held while calling out.
// `delivery` is re-entrant and serializes event delivery, so observers may
// call back into the registry from inside a callback.

use super::attributes::{AttributeSource, MemorySource};
use super::clock::{DefaultSessionFactory, SessionFactory};
use crate::coordinator::start_coordinator;
use crate::error::{Error, Result};
use crate::event::{Event, State};
use crate::monitor::{EventSink, NotificationChannel};
use crate::types::{current_timestamp, SessionId, SharedSession, Timestamp};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Receiver of session events
pub trait SessionObserver: Send + Sync {
    fn name(&self) -> &str;

    /// Returns true if the event activated anything
    fn on_event(&self, session: &SharedSession, event: Event) -> bool;
}

#[derive(Default)]
struct Inner {
    sessions: Vec<SharedSession>,
    observers: Vec<Arc<dyn SessionObserver>>,
}

/// Running notification channel and its coordinator thread
struct Monitor {
    channel: Box<dyn NotificationChannel>,
    running: Arc<AtomicBool>,
    coordinator: JoinHandle<()>,
}

pub struct SessionRegistry {
    inner: Mutex<Inner>,
    delivery: ReentrantMutex<()>,
    factory: Box<dyn SessionFactory>,
    source: RwLock<Arc<dyn AttributeSource>>,
    monitor: Mutex<Option<Monitor>>,
    health: Mutex<Option<String>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Arc::new(MemorySource::new()))
    }
}

impl SessionRegistry {
    pub fn new(source: Arc<dyn AttributeSource>) -> Self {
        Self::with_factory(source, Box::new(DefaultSessionFactory))
    }

    pub fn with_factory(source: Arc<dyn AttributeSource>, factory: Box<dyn SessionFactory>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            delivery: ReentrantMutex::new(()),
            factory,
            source: RwLock::new(source),
            monitor: Mutex::new(None),
            health: Mutex::new(None),
        }
    }

    pub fn source(&self) -> Arc<dyn AttributeSource> {
        self.source.read().clone()
    }

    pub fn register(&self, observer: Arc<dyn SessionObserver>) {
        debug!(observer = observer.name(), "Observer registered");
        self.inner.lock().observers.push(observer);
    }

    pub fn unregister(&self, observer: &Arc<dyn SessionObserver>) {
        self.inner
            .lock()
            .observers
            .retain(|registered| !Arc::ptr_eq(registered, observer));
    }

    /// Build and prime a session, caller holds the data lock
    fn create(&self, inner: &mut Inner, sid: &str) -> SharedSession {
        let session = Arc::new(self.factory.create(sid, self.source()));
        session.prime();
        inner.sessions.push(session.clone());
        debug!(sid, sessions = inner.sessions.len(), "Session tracked");
        session
    }

    /// Find or create the session for `sid`
    ///
    /// Concurrent calls with the same id observe the same instance.
    pub fn find(&self, sid: &str) -> SharedSession {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.iter().find(|s| s.sid() == sid) {
            return session.clone();
        }
        self.create(&mut inner, sid)
    }

    /// Lookup without creation
    pub fn get(&self, sid: &str) -> Option<SharedSession> {
        self.inner.lock().sessions.iter().find(|s| s.sid() == sid).cloned()
    }

    /// Snapshot of tracked sessions
    pub fn sessions(&self) -> Vec<SharedSession> {
        self.inner.lock().sessions.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit sessions until the callback returns true; returns whether it did
    pub fn for_each_session<F: FnMut(&SharedSession) -> bool>(&self, mut callback: F) -> bool {
        self.sessions().iter().any(|session| callback(session))
    }

    /// Visit observers until the callback returns true; returns whether it did
    pub fn for_each_observer<F: FnMut(&Arc<dyn SessionObserver>) -> bool>(&self, mut callback: F) -> bool {
        let observers = self.inner.lock().observers.clone();
        observers.iter().any(|observer| callback(observer))
    }

    /// Deliver one event to every observer
    pub fn emit(&self, session: &SharedSession, event: Event) -> bool {
        let _delivery = self.delivery.lock();

        session.clock_event(event, current_timestamp());
        debug!(sid = %session.sid(), user = %session.name(), event = %event, "Session event");

        let mut activated = false;
        self.for_each_observer(|observer| {
            activated |= observer.on_event(session, event);
            false
        });
        activated
    }

    /// Pulse scan over live sessions, serialized with event delivery
    ///
    /// `visit` returns true when it fired a pulse for the session; the
    /// session clock then sees the pulse. A session logged off while the
    /// scan waits for the lock is skipped.
    pub fn pulse_scan<F: FnMut(&SharedSession) -> bool>(&self, now: Timestamp, mut visit: F) {
        let _delivery = self.delivery.lock();

        for session in self.sessions() {
            if !session.alive() {
                continue;
            }
            if visit(&session) {
                session.clock_event(Event::PULSE, now);
            }
        }
    }

    fn emit_all(&self, session: &SharedSession, events: Vec<Event>) -> usize {
        let count = events.len();
        for event in events {
            self.emit(session, event);
        }
        count
    }

    pub fn notify_logon(&self, sid: &str) {
        let _delivery = self.delivery.lock();
        let session = self.find(sid);
        if session.set_alive(true) {
            info!(sid, user = %session.name(), "Session logged in");
            self.emit(&session, Event::LOGON);
        }
    }

    pub fn notify_logoff(&self, sid: &str) {
        let _delivery = self.delivery.lock();
        let Some(session) = self.get(sid) else {
            debug!(sid, "Logoff for untracked session");
            return;
        };

        self.inner.lock().sessions.retain(|s| !Arc::ptr_eq(s, &session));
        self.retire(&session);
    }

    /// Mark an already removed session dead, emitting logoff once
    fn retire(&self, session: &SharedSession) -> usize {
        session.set(State::Closing);
        if session.set_alive(false) {
            info!(sid = %session.sid(), user = %session.name(), "Session logged out");
            self.emit(session, Event::LOGOFF);
            return 1;
        }
        0
    }

    fn notify_lock_state(&self, sid: &str, locked: bool) {
        let _delivery = self.delivery.lock();
        let session = self.find(sid);
        if let Some(event) = session.set_locked(locked) {
            self.emit(&session, event);
        }
    }

    pub fn notify_lock(&self, sid: &str) {
        self.notify_lock_state(sid, true);
    }

    pub fn notify_unlock(&self, sid: &str) {
        self.notify_lock_state(sid, false);
    }

    pub fn notify_state_change(&self, sid: &str, state: State) {
        let _delivery = self.delivery.lock();
        let session = self.find(sid);
        if let Some(event) = session.set(state) {
            self.emit(&session, event);
        }
    }

    fn broadcast(&self, event: Event) {
        let _delivery = self.delivery.lock();
        info!(event = %event, description = event.description(), "System event");
        for session in self.sessions().iter().filter(|s| s.alive()) {
            self.emit(session, event);
        }
    }

    pub fn notify_sleep(&self) {
        self.broadcast(Event::SLEEP);
    }

    pub fn notify_resume(&self) {
        self.broadcast(Event::RESUME);
    }

    pub fn notify_shutdown(&self) {
        self.broadcast(Event::SHUTDOWN);
    }

    /// Reconcile with the full set of live session ids
    ///
    /// Absent sessions are pruned (logoff), new ones created (logon), and
    /// every survivor has its attributes re-read. Returns the number of
    /// events emitted; a second call with the same set emits none.
    pub fn refresh(&self, truth: &[SessionId]) -> usize {
        let _delivery = self.delivery.lock();
        let live: HashSet<&str> = truth.iter().map(String::as_str).collect();

        let (gone, present) = {
            let mut inner = self.inner.lock();
            let (kept, gone): (Vec<_>, Vec<_>) = inner
                .sessions
                .drain(..)
                .partition(|session| live.contains(session.sid()));
            inner.sessions = kept;

            let mut present = Vec::with_capacity(live.len());
            let mut seen = HashSet::new();
            for sid in truth.iter().filter(|sid| seen.insert(sid.as_str())) {
                let existing = inner.sessions.iter().find(|s| s.sid() == sid.as_str()).cloned();
                let session = match existing {
                    Some(session) => session,
                    None => self.create(&mut inner, sid),
                };
                present.push(session);
            }
            (gone, present)
        };

        let mut emitted = 0;
        for session in &gone {
            emitted += self.retire(session);
        }

        for session in &present {
            if session.set_alive(true) {
                info!(sid = %session.sid(), user = %session.name(), "Session logged in");
                self.emit(session, Event::LOGON);
                emitted += 1;
            }
            emitted += self.emit_all(session, session.refresh_attributes());
        }

        if emitted > 0 {
            debug!(sessions = present.len(), removed = gone.len(), emitted, "Sessions reconciled");
        }
        emitted
    }

    /// Start monitoring through the given channel
    ///
    /// Sessions alive at this point get exactly one `already_active`. If
    /// the channel can't start, nothing is marked alive or delivered.
    /// Must not be called from an observer callback.
    pub fn activate(self: &Arc<Self>, mut channel: Box<dyn NotificationChannel>) -> Result<()> {
        // Held through the bracket so channel events queue behind it
        let _delivery = self.delivery.lock();

        let ids = {
            let mut monitor = self.monitor.lock();
            if monitor.is_some() {
                return Err(Error::AlreadyActive);
            }

            *self.source.write() = channel.attributes();
            *self.health.lock() = None;

            let (tx, rx) = mpsc::channel();
            let running = Arc::new(AtomicBool::new(true));
            let coordinator = start_coordinator(rx, Arc::downgrade(self), running.clone())?;

            if let Err(e) = channel.start(EventSink::new(tx)) {
                error!(channel = channel.name(), error = %e, "Can't start notification channel");
                running.store(false, Ordering::SeqCst);
                if coordinator.join().is_err() {
                    error!("Session coordinator panicked");
                }
                return Err(e);
            }

            let ids = match channel.enumerate() {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(channel = channel.name(), error = %e, "Can't enumerate sessions");
                    Vec::new()
                }
            };

            info!(channel = channel.name(), sessions = ids.len(), "Session monitor active");
            *monitor = Some(Monitor {
                channel,
                running,
                coordinator,
            });
            ids
        };

        for sid in &ids {
            self.find(sid).set_alive(true);
        }
        for session in self.sessions().iter().filter(|s| s.alive()) {
            self.emit(session, Event::ALREADY_ACTIVE);
        }
        Ok(())
    }

    /// Stop monitoring; no event is delivered once this returns
    ///
    /// Sessions still alive get exactly one `still_active`. A fatal channel
    /// failure recorded while running is returned here. Must not be called
    /// from an observer callback.
    pub fn deactivate(&self) -> Result<()> {
        let Some(mut monitor) = self.monitor.lock().take() else {
            return Ok(());
        };

        monitor.channel.stop();
        monitor.running.store(false, Ordering::SeqCst);
        if monitor.coordinator.join().is_err() {
            error!("Session coordinator panicked");
        }

        {
            let _delivery = self.delivery.lock();
            for session in self.sessions().iter().filter(|s| s.alive()) {
                self.emit(session, Event::STILL_ACTIVE);
                session.set_alive(false);
            }
            self.inner.lock().sessions.clear();
        }

        info!(channel = monitor.channel.name(), "Session monitor stopped");

        match self.health.lock().take() {
            Some(reason) => Err(Error::Notifier(reason)),
            None => Ok(()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Record a fatal notifier failure for health reporting
    pub fn record_failure(&self, reason: &str) {
        error!(reason, "Notification channel failed");
        *self.health.lock() = Some(reason.to_string());
    }

    /// Last recorded notifier failure, if any
    pub fn health(&self) -> Option<String> {
        self.health.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{ManualChannel, PlatformEvent};
    use crate::session::SessionRecord;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, Event)>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<(String, Event)> {
            self.events.lock().clone()
        }

        fn count(&self, event: Event) -> usize {
            self.events.lock().iter().filter(|(_, e)| *e == event).count()
        }
    }

    impl SessionObserver for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_event(&self, session: &SharedSession, event: Event) -> bool {
            self.events.lock().push((session.sid().to_string(), event));
            true
        }
    }

    fn setup(sids: &[&str]) -> (Arc<MemorySource>, Arc<SessionRegistry>, Arc<Recorder>) {
        let source = Arc::new(MemorySource::new());
        for sid in sids {
            source.insert(sid, SessionRecord::default().with_uid(1000).with_state(State::Background));
        }
        let registry = Arc::new(SessionRegistry::new(source.clone()));
        let recorder = Arc::new(Recorder::default());
        registry.register(recorder.clone());
        (source, registry, recorder)
    }

    fn ids(sids: &[&str]) -> Vec<SessionId> {
        sids.iter().map(|s| s.to_string()).collect()
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_find_returns_same_instance() {
        let (_, registry, _) = setup(&["c1"]);
        let first = registry.find("c1");
        let second = registry.find("c1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_find_is_race_free() {
        let (_, registry, _) = setup(&["c1"]);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.find("c1"))
            })
            .collect();
        let sessions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let (_, registry, recorder) = setup(&["c1", "c2"]);
        assert_eq!(registry.refresh(&ids(&["c1", "c2"])), 2);
        assert_eq!(recorder.count(Event::LOGON), 2);

        assert_eq!(registry.refresh(&ids(&["c1", "c2"])), 0);
        assert_eq!(recorder.events().len(), 2);
    }

    #[test]
    fn test_refresh_prunes_absent_sessions() {
        let (_, registry, recorder) = setup(&["c1", "c2"]);
        registry.refresh(&ids(&["c1", "c2"]));
        let gone = registry.get("c2").unwrap();

        assert_eq!(registry.refresh(&ids(&["c1"])), 1);
        assert_eq!(recorder.count(Event::LOGOFF), 1);
        assert!(registry.get("c2").is_none());
        assert!(!gone.alive());
        assert_eq!(gone.state(), State::Closing);
    }

    #[test]
    fn test_refresh_picks_up_attribute_changes() {
        let (source, registry, recorder) = setup(&["c1"]);
        registry.refresh(&ids(&["c1"]));
        source.update("c1", |record| record.locked = Some(true));

        assert_eq!(registry.refresh(&ids(&["c1"])), 1);
        assert_eq!(recorder.events().last(), Some(&("c1".to_string(), Event::LOCK)));
    }

    #[test]
    fn test_notifications_are_deduplicated() {
        let (_, registry, recorder) = setup(&["c1"]);
        registry.notify_logon("c1");
        registry.notify_logon("c1");
        registry.notify_lock("c1");
        registry.notify_lock("c1");
        registry.notify_state_change("c1", State::Foreground);
        registry.notify_state_change("c1", State::Foreground);
        registry.notify_logoff("c1");
        registry.notify_logoff("c1");

        let events: Vec<Event> = recorder.events().into_iter().map(|(_, e)| e).collect();
        assert_eq!(
            events,
            vec![Event::LOGON, Event::LOCK, Event::FOREGROUND, Event::LOGOFF]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_system_broadcast_reaches_live_sessions() {
        let (_, registry, recorder) = setup(&["c1", "c2"]);
        registry.refresh(&ids(&["c1", "c2"]));
        registry.notify_sleep();
        registry.notify_resume();
        assert_eq!(recorder.count(Event::SLEEP), 2);
        assert_eq!(recorder.count(Event::RESUME), 2);
    }

    #[test]
    fn test_for_each_short_circuits() {
        let (_, registry, _) = setup(&["c1", "c2", "c3"]);
        registry.refresh(&ids(&["c1", "c2", "c3"]));

        let mut visited = 0;
        let stopped = registry.for_each_session(|session| {
            visited += 1;
            session.sid() == "c2"
        });
        assert!(stopped);
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        struct Reentrant {
            registry: std::sync::Weak<SessionRegistry>,
            seen: Mutex<usize>,
        }

        impl SessionObserver for Reentrant {
            fn name(&self) -> &str {
                "reentrant"
            }

            fn on_event(&self, session: &SharedSession, event: Event) -> bool {
                if let Some(registry) = self.registry.upgrade() {
                    *self.seen.lock() += registry.len();
                    if event == Event::LOGON {
                        registry.notify_lock(session.sid());
                    }
                }
                false
            }
        }

        let (_, registry, recorder) = setup(&["c1"]);
        let observer = Arc::new(Reentrant {
            registry: Arc::downgrade(&registry),
            seen: Mutex::new(0),
        });
        registry.register(observer.clone());
        registry.notify_logon("c1");

        assert_eq!(recorder.count(Event::LOCK), 1);
        assert_eq!(*observer.seen.lock(), 2);
    }

    #[test]
    fn test_bracket_events_are_emitted_once() {
        let (source, registry, recorder) = setup(&["c1", "c2"]);
        let (channel, handle) = ManualChannel::new(source.clone());

        registry.activate(Box::new(channel)).unwrap();
        assert_eq!(recorder.count(Event::ALREADY_ACTIVE), 2);
        assert!(matches!(
            registry.activate(Box::new(ManualChannel::new(source.clone()).0)),
            Err(Error::AlreadyActive)
        ));

        // A snapshot with the same sessions must not look like new logons
        handle.send(PlatformEvent::Snapshot(ids(&["c1", "c2"])));
        handle.send(PlatformEvent::Lock("c1".to_string()));
        wait_for(|| recorder.count(Event::LOCK) == 1);

        registry.deactivate().unwrap();
        assert_eq!(recorder.count(Event::STILL_ACTIVE), 2);
        assert_eq!(recorder.count(Event::LOGON), 0);
        assert_eq!(recorder.count(Event::LOGOFF), 0);
        assert!(registry.is_empty());

        let delivered = recorder.events().len();
        handle.send(PlatformEvent::Logon("c1".to_string()));
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(recorder.events().len(), delivered);
    }

    struct RefusingChannel {
        source: Arc<MemorySource>,
    }

    impl NotificationChannel for RefusingChannel {
        fn name(&self) -> &str {
            "refusing"
        }

        fn attributes(&self) -> Arc<dyn AttributeSource> {
            self.source.clone()
        }

        fn start(&mut self, _sink: EventSink) -> Result<()> {
            Err(Error::Notifier("subscription refused".to_string()))
        }

        fn stop(&mut self) {}
    }

    #[test]
    fn test_failed_start_delivers_no_bracket() {
        let (source, registry, recorder) = setup(&["c1"]);
        let refusing = RefusingChannel {
            source: source.clone(),
        };

        assert!(matches!(
            registry.activate(Box::new(refusing)),
            Err(Error::Notifier(_))
        ));
        assert!(!registry.is_active());
        assert!(recorder.events().is_empty());
        assert!(registry.get("c1").map_or(true, |s| !s.alive()));

        registry.deactivate().unwrap();
        assert!(recorder.events().is_empty());

        // A later successful start brackets normally
        registry.activate(Box::new(ManualChannel::new(source).0)).unwrap();
        registry.deactivate().unwrap();
        assert_eq!(recorder.count(Event::ALREADY_ACTIVE), 1);
        assert_eq!(recorder.count(Event::STILL_ACTIVE), 1);
    }

    #[test]
    fn test_observer_may_query_monitor_during_bracket() {
        struct Watcher {
            registry: Mutex<Option<Arc<SessionRegistry>>>,
            seen_active: Mutex<Vec<bool>>,
        }

        impl SessionObserver for Watcher {
            fn name(&self) -> &str {
                "watcher"
            }

            fn on_event(&self, _session: &SharedSession, _event: Event) -> bool {
                if let Some(registry) = self.registry.lock().as_ref() {
                    self.seen_active.lock().push(registry.is_active());
                }
                false
            }
        }

        let (source, registry, _) = setup(&["c1"]);
        let watcher = Arc::new(Watcher {
            registry: Mutex::new(Some(registry.clone())),
            seen_active: Mutex::new(Vec::new()),
        });
        registry.register(watcher.clone());

        registry.activate(Box::new(ManualChannel::new(source).0)).unwrap();
        assert_eq!(*watcher.seen_active.lock(), vec![true]);

        registry.deactivate().unwrap();
        watcher.registry.lock().take();
    }

    #[test]
    fn test_deactivate_without_activate() {
        let (_, registry, recorder) = setup(&["c1"]);
        registry.deactivate().unwrap();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_channel_failure_surfaces_on_deactivate() {
        let (source, registry, _) = setup(&[]);
        let (channel, handle) = ManualChannel::new(source);
        registry.activate(Box::new(channel)).unwrap();

        handle.send(PlatformEvent::Failed("poll: bad file descriptor".to_string()));
        wait_for(|| registry.health().is_some());

        assert!(matches!(registry.deactivate(), Err(Error::Notifier(_))));
        assert!(registry.health().is_none());
    }
}
