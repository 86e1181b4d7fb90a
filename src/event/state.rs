// Session State
//
// Session state as reported by the session manager, plus the events a
// state transition derives.

use super::Event;
use serde::Serialize;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// Logged in, not in the foreground
    Background,
    /// Logged in and in the foreground
    Foreground,
    Opening,
    /// Nominally logged out, some processes still around
    Closing,
    #[default]
    Unknown,
}

const STATES: [State; 5] = [
    State::Background,
    State::Foreground,
    State::Opening,
    State::Closing,
    State::Unknown,
];

impl State {
    pub fn name(self) -> &'static str {
        match self {
            State::Background => "background",
            State::Foreground => "foreground",
            State::Opening => "opening",
            State::Closing => "closing",
            State::Unknown => "unknown",
        }
    }

    /// Map a platform reported state name.
    ///
    /// Never fails: the vocabulary comes from outside, unexpected tokens are
    /// logged and mapped to `Unknown`.
    pub fn parse(text: &str) -> State {
        let text = text.trim();

        // logind reports 'online' for sessions not in the foreground
        if text.eq_ignore_ascii_case("online") {
            return State::Background;
        }

        // ... and 'active' for the foreground one
        if text.eq_ignore_ascii_case("active") {
            return State::Foreground;
        }

        if let Some(state) = STATES.iter().find(|s| text.eq_ignore_ascii_case(s.name())) {
            return *state;
        }

        warn!(state = text, "Unexpected session state");
        State::Unknown
    }

    /// Event synthesized when a session enters this state
    pub fn entry_event(self) -> Option<Event> {
        match self {
            State::Foreground => Some(Event::FOREGROUND),
            State::Background => Some(Event::BACKGROUND),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logind_tokens() {
        assert_eq!(State::parse("online"), State::Background);
        assert_eq!(State::parse("active"), State::Foreground);
        assert_eq!(State::parse("ACTIVE"), State::Foreground);
        assert_eq!(State::parse("closing"), State::Closing);
        assert_eq!(State::parse("opening"), State::Opening);
    }

    #[test]
    fn test_unknown_token_does_not_fail() {
        assert_eq!(State::parse("garbage"), State::Unknown);
        assert_eq!(State::parse(""), State::Unknown);
    }

    #[test]
    fn test_names_round_trip() {
        for state in STATES {
            assert_eq!(State::parse(state.name()), state);
        }
    }

    #[test]
    fn test_entry_events() {
        assert_eq!(State::Foreground.entry_event(), Some(Event::FOREGROUND));
        assert_eq!(State::Background.entry_event(), Some(Event::BACKGROUND));
        assert_eq!(State::Opening.entry_event(), None);
        assert_eq!(State::Closing.entry_event(), None);
    }
}
