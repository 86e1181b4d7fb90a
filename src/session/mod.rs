// Session Module - Session tracking
//
// Sessions, their classification filter, attribute sources and the
// registry holding the live set.

pub mod attributes;
pub mod clock;
pub mod filter;
#[cfg(target_os = "linux")]
pub mod finder;
pub mod registry;
pub mod state;

pub use attributes::{AttributeSource, MemorySource, SessionRecord};
pub use clock::{AlertClock, DefaultSessionFactory, IdleClock, SessionFactory};
pub use filter::{Classification, Requirement, SessionType, SessionTypeFilter};
pub use registry::{SessionObserver, SessionRegistry};
pub use state::{Session, PROPERTY_KEYS};
