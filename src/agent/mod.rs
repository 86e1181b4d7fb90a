// Agent Module - Rule evaluation
//
// Agents observe session events, activate matching rules and schedule
// pulse checks.

pub mod core;
pub mod timer;

pub use self::core::{Agent, SessionReport, DEFAULT_MAX_PULSE_CHECK};
pub use self::timer::PulseTimer;
