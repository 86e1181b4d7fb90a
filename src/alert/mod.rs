// Alert Module - Rules and bound actions
//
// Declarative rules matched against session events and the actions they
// trigger.

pub mod action;
pub mod context;
pub mod proxy;

pub use action::{ActionConfig, Activatable, CommandAction, LogAction};
pub use context::AlertContext;
pub use proxy::AlertProxy;
