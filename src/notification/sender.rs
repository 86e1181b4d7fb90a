// Activation Sender
//
// Runs the actions of fired rules. In worker mode actions run on one
// dedicated thread in firing order, so a slow action never stalls event
// delivery; inline mode runs them on the caller.
//
// Failures and panics are logged per action and never reach the caller.

use crate::alert::{Activatable, AlertContext};
use parking_lot::Mutex;
use serde::Deserialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    Inline,
    #[default]
    Worker,
}

/// One fired rule waiting for its action to run
pub struct Activation {
    pub rule: String,
    pub action: Arc<dyn Activatable>,
    pub context: AlertContext,
}

enum Job {
    Run(Activation),
    Shutdown,
}

struct Worker {
    tx: Sender<Job>,
    handle: thread::JoinHandle<()>,
}

pub struct ActivationSender {
    worker: Mutex<Option<Worker>>,
}

impl ActivationSender {
    pub fn inline() -> Self {
        Self {
            worker: Mutex::new(None),
        }
    }

    pub fn worker() -> std::io::Result<Self> {
        let (tx, rx) = channel();
        let handle = thread::Builder::new()
            .name("alert-dispatch".to_string())
            .spawn(move || run_worker(rx))?;

        Ok(Self {
            worker: Mutex::new(Some(Worker { tx, handle })),
        })
    }

    pub fn new(mode: DispatchMode) -> std::io::Result<Self> {
        match mode {
            DispatchMode::Inline => Ok(Self::inline()),
            DispatchMode::Worker => Self::worker(),
        }
    }

    /// Queue (or run) an activation
    pub fn dispatch(&self, activation: Activation) {
        let activation = {
            let worker = self.worker.lock();
            match worker.as_ref() {
                Some(worker) => match worker.tx.send(Job::Run(activation)) {
                    Ok(()) => return,
                    Err(e) => match e.0 {
                        Job::Run(activation) => {
                            warn!(rule = %activation.rule, "Dispatch worker gone, running inline");
                            activation
                        }
                        Job::Shutdown => return,
                    },
                },
                None => activation,
            }
        };

        run(activation);
    }

    /// Run the queued activations, then stop the worker
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        let _ = worker.tx.send(Job::Shutdown);
        if worker.handle.join().is_err() {
            error!("Dispatch worker panicked");
        }
        debug!("Dispatch worker stopped");
    }
}

impl Drop for ActivationSender {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(rx: Receiver<Job>) {
    debug!("Dispatch worker started");
    while let Ok(job) = rx.recv() {
        match job {
            Job::Run(activation) => run(activation),
            Job::Shutdown => break,
        }
    }
}

fn run(activation: Activation) {
    let Activation { rule, action, context } = activation;

    match catch_unwind(AssertUnwindSafe(|| action.activate(&context))) {
        Ok(Ok(())) => {
            debug!(rule = %rule, action = action.name(), event = %context.event(), "Alert activated");
        }
        Ok(Err(e)) => {
            error!(rule = %rule, action = action.name(), error = %e, "Alert action failed");
        }
        Err(_) => {
            error!(rule = %rule, action = action.name(), "Alert action panicked");
        }
    }
}
