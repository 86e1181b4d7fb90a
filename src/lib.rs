// session-watch
//
// Tracks OS user sessions (logon/logoff, lock/unlock, foreground/background,
// sleep/resume/shutdown) and runs configured alert rules when they change,
// including periodic pulse alerts while a session stays idle.

pub mod agent;
pub mod alert;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod logging;
pub mod monitor;
pub mod notification;
pub mod session;
pub mod types;

pub use agent::{Agent, PulseTimer, SessionReport};
pub use alert::{Activatable, AlertContext, AlertProxy};
pub use error::{Error, Result};
pub use event::{Event, State};
pub use monitor::{NotificationChannel, PlatformEvent};
pub use notification::{ActivationSender, DispatchMode};
pub use session::{Session, SessionObserver, SessionRegistry, SessionTypeFilter};
