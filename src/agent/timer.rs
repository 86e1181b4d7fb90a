// Pulse Timer Thread
//
// Periodically runs the agent pulse path, sleeping whatever the last run
// asked for.

use super::core::Agent;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

pub struct PulseTimer {
    stop: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PulseTimer {
    /// Start refreshing the agent on its own thread
    pub fn start(agent: Arc<Agent>) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel::<()>();
        let name = format!("pulse-{}", agent.name());

        let handle = thread::Builder::new().name(name).spawn(move || {
            debug!(agent = agent.name(), "Pulse timer started");
            loop {
                let wait = match agent.timer() {
                    0 => agent.max_pulse_check().max(1),
                    seconds => seconds,
                };

                match stop_rx.recv_timeout(Duration::from_secs(wait)) {
                    Err(RecvTimeoutError::Timeout) => {
                        agent.refresh();
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!(agent = agent.name(), "Pulse timer stopped");
        })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Wake the thread and wait for it
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Pulse timer panicked");
            }
        }
    }
}

impl Drop for PulseTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::ActivationSender;
    use crate::session::SessionRegistry;
    use std::time::Instant;

    #[test]
    fn test_stop_wakes_sleeping_timer() {
        let registry = Arc::new(SessionRegistry::default());
        let agent = Arc::new(
            Agent::new("idle", &registry, Arc::new(ActivationSender::inline())).with_timer(3_600),
        );

        let mut timer = PulseTimer::start(agent).unwrap();
        let started = Instant::now();
        timer.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timer_runs_refresh() {
        let registry = Arc::new(SessionRegistry::default());
        let agent = Arc::new(
            Agent::new("fast", &registry, Arc::new(ActivationSender::inline()))
                .with_timer(1)
                .with_max_pulse_check(7),
        );

        let mut timer = PulseTimer::start(agent.clone()).unwrap();
        for _ in 0..40 {
            if agent.timer() == 7 {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
        timer.stop();

        // No pulse rules: the refresh re-armed the timer to the ceiling
        assert_eq!(agent.timer(), 7);
    }
}
