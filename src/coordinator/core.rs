// Coordinator Thread
//
// Consumes platform events from the active channel and applies them to the
// registry, one at a time, so events of a session keep the platform order.

use crate::monitor::PlatformEvent;
use crate::session::SessionRegistry;
use crate::types::current_timestamp;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Bounded wait between stop checks
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Seconds between status summaries
const SUMMARY_INTERVAL: u64 = 300;

/// Start coordinator thread
///
/// The thread exits when `running` is cleared, when every sender is gone
/// or when the registry itself was dropped. Events already queued when
/// stopping are still applied.
pub fn start_coordinator(
    event_receiver: Receiver<PlatformEvent>,
    registry: Weak<SessionRegistry>,
    running: Arc<AtomicBool>,
) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("session-coordinator".to_string())
        .spawn(move || run_coordinator(event_receiver, registry, running))
}

fn run_coordinator(
    event_receiver: Receiver<PlatformEvent>,
    registry: Weak<SessionRegistry>,
    running: Arc<AtomicBool>,
) {
    let mut event_count: u64 = 0;
    let mut last_summary = current_timestamp();

    debug!("Coordinator started");

    while running.load(Ordering::SeqCst) {
        match event_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(event) => {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                event_count += 1;
                apply(&registry, event);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Channel disconnected, coordinator shutting down");
                break;
            }
        }

        let now = current_timestamp();
        if now.saturating_sub(last_summary) >= SUMMARY_INTERVAL {
            if let Some(registry) = registry.upgrade() {
                info!(events = event_count, sessions = registry.len(), "Session monitor status");
            }
            last_summary = now;
        }
    }

    // Drain what the channel sent before it was stopped
    if let Some(registry) = registry.upgrade() {
        while let Ok(event) = event_receiver.try_recv() {
            event_count += 1;
            apply(&registry, event);
        }
    }

    debug!(events = event_count, "Coordinator stopped");
}

/// Apply one platform event to the registry
pub fn apply(registry: &SessionRegistry, event: PlatformEvent) {
    match event {
        PlatformEvent::Snapshot(ids) => {
            registry.refresh(&ids);
        }
        PlatformEvent::Logon(sid) => registry.notify_logon(&sid),
        PlatformEvent::Logoff(sid) => registry.notify_logoff(&sid),
        PlatformEvent::Lock(sid) => registry.notify_lock(&sid),
        PlatformEvent::Unlock(sid) => registry.notify_unlock(&sid),
        PlatformEvent::StateChanged(sid, state) => registry.notify_state_change(&sid, state),
        PlatformEvent::Sleep => registry.notify_sleep(),
        PlatformEvent::Resume => registry.notify_resume(),
        PlatformEvent::Shutdown => registry.notify_shutdown(),
        PlatformEvent::Failed(reason) => registry.record_failure(&reason),
    }
}
