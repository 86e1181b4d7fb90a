// Coordinator Module - Platform event routing
//
// This module feeds platform events into the session registry

pub mod core;

pub use self::core::{apply, start_coordinator};
