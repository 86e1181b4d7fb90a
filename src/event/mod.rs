// Event Module - Session event model
//
// Event bitmask, session states and their textual factories

pub mod kind;
pub mod state;

pub use kind::Event;
pub use state::State;
