// Monitor Module - Platform notification channels
//
// A channel turns platform signals into `PlatformEvent`s sent to the
// coordinator; the registry never branches on the platform.

#[cfg(target_os = "linux")]
pub mod logind;
pub mod manual;

use crate::error::{QueryError, Result};
use crate::event::State;
use crate::session::AttributeSource;
use crate::types::SessionId;
use std::sync::mpsc::Sender;
use std::sync::Arc;

#[cfg(target_os = "linux")]
pub use logind::{parse_session_file, LogindChannel, LogindSource};
pub use manual::{ManualChannel, ManualHandle};

/// Platform signal, already mapped to a session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    /// Full set of live session ids (poll style platforms)
    Snapshot(Vec<SessionId>),
    Logon(SessionId),
    Logoff(SessionId),
    Lock(SessionId),
    Unlock(SessionId),
    StateChanged(SessionId, State),
    Sleep,
    Resume,
    Shutdown,
    /// Fatal channel error, the channel stopped producing events
    Failed(String),
}

/// Sending end handed to a channel on start
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<PlatformEvent>,
}

impl EventSink {
    pub fn new(tx: Sender<PlatformEvent>) -> Self {
        Self { tx }
    }

    /// Returns false once the coordinator is gone
    pub fn send(&self, event: PlatformEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Platform notification channel
pub trait NotificationChannel: Send {
    fn name(&self) -> &str;

    /// Attribute source matching this platform
    fn attributes(&self) -> Arc<dyn AttributeSource>;

    /// Sessions alive right now
    fn enumerate(&self) -> std::result::Result<Vec<SessionId>, QueryError> {
        self.attributes().list()
    }

    /// Begin delivering events to the sink
    fn start(&mut self, sink: EventSink) -> Result<()>;

    /// Stop delivering; must not return before the last send
    fn stop(&mut self);
}
