// Manual Channel
//
// Channel fed by the host: anything holding a `ManualHandle` can inject
// platform events. Covers signals this crate has no transport for
// (sleep/resume/shutdown come over the system bus).

use super::{EventSink, NotificationChannel, PlatformEvent};
use crate::error::Result;
use crate::session::AttributeSource;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

pub struct ManualChannel {
    source: Arc<dyn AttributeSource>,
    sink: Arc<Mutex<Option<EventSink>>>,
}

/// Injection handle, clonable and usable from any thread
#[derive(Clone)]
pub struct ManualHandle {
    sink: Arc<Mutex<Option<EventSink>>>,
}

impl ManualChannel {
    pub fn new(source: Arc<dyn AttributeSource>) -> (Self, ManualHandle) {
        let sink = Arc::new(Mutex::new(None));
        let handle = ManualHandle { sink: sink.clone() };
        (Self { source, sink }, handle)
    }
}

impl NotificationChannel for ManualChannel {
    fn name(&self) -> &str {
        "manual"
    }

    fn attributes(&self) -> Arc<dyn AttributeSource> {
        self.source.clone()
    }

    fn start(&mut self, sink: EventSink) -> Result<()> {
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().take();
    }
}

impl ManualHandle {
    /// Returns false when the channel is not running
    pub fn send(&self, event: PlatformEvent) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.send(event),
            None => {
                debug!(?event, "Manual channel stopped, event dropped");
                false
            }
        }
    }
}
