// Notification Module - Alert activation dispatch
//
// This module runs the actions of fired rules, inline or on a worker
// thread.

pub mod sender;

pub use sender::{Activation, ActivationSender, DispatchMode};
