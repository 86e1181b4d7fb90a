// Session Events
//
// Bitmask of session event kinds. Filter masks combine several bits, a
// concrete emitted event always carries exactly one.

use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Event(u16);

struct EventName {
    event: Event,
    key: &'static str,
    name: &'static str,
    description: &'static str,
}

const EVENT_NAMES: [EventName; 12] = [
    EventName {
        event: Event::ALREADY_ACTIVE,
        key: "already_active",
        name: "Already active",
        description: "Session is active on startup",
    },
    EventName {
        event: Event::STILL_ACTIVE,
        key: "still_active",
        name: "Still active",
        description: "Session still active on shutdown",
    },
    EventName {
        event: Event::LOGON,
        key: "logon",
        name: "Login",
        description: "User has logged in",
    },
    EventName {
        event: Event::LOGOFF,
        key: "logoff",
        name: "Logout",
        description: "User has logged out",
    },
    EventName {
        event: Event::LOCK,
        key: "lock",
        name: "Lock",
        description: "Session was locked",
    },
    EventName {
        event: Event::UNLOCK,
        key: "unlock",
        name: "Unlock",
        description: "Session was unlocked",
    },
    EventName {
        event: Event::FOREGROUND,
        key: "foreground",
        name: "Foreground",
        description: "Session is in foreground",
    },
    EventName {
        event: Event::BACKGROUND,
        key: "background",
        name: "Background",
        description: "Session is in background",
    },
    EventName {
        event: Event::SLEEP,
        key: "sleep",
        name: "Sleep",
        description: "Session is preparing to sleep",
    },
    EventName {
        event: Event::RESUME,
        key: "resume",
        name: "Resume",
        description: "Session is resuming from sleep",
    },
    EventName {
        event: Event::SHUTDOWN,
        key: "shutdown",
        name: "Shutdown",
        description: "Session is shutting down",
    },
    EventName {
        event: Event::PULSE,
        key: "pulse",
        name: "Pulse",
        description: "Pulse",
    },
];

impl Event {
    pub const NONE: Event = Event(0x0000);
    /// Session is active on monitor startup
    pub const ALREADY_ACTIVE: Event = Event(0x0001);
    /// Session is active on monitor shutdown
    pub const STILL_ACTIVE: Event = Event(0x0002);
    pub const LOGON: Event = Event(0x0004);
    pub const LOGOFF: Event = Event(0x0008);
    pub const LOCK: Event = Event(0x0010);
    pub const UNLOCK: Event = Event(0x0020);
    pub const FOREGROUND: Event = Event(0x0040);
    pub const BACKGROUND: Event = Event(0x0080);
    pub const SLEEP: Event = Event(0x0100);
    pub const RESUME: Event = Event(0x0200);
    pub const SHUTDOWN: Event = Event(0x0400);
    /// Synthetic periodic event for idle sessions
    pub const PULSE: Event = Event(0x0800);

    pub const ALL: Event = Event(0x0FFF);

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones
    pub const fn from_bits_truncate(bits: u16) -> Event {
        Event(bits & Self::ALL.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every bit of `other` is set
    pub const fn contains(self, other: Event) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// True if at least one bit is shared with `other`
    pub const fn intersects(self, other: Event) -> bool {
        self.0 & other.0 != 0
    }

    /// Single bit events in this mask, in declaration order
    pub fn iter(self) -> impl Iterator<Item = Event> {
        EVENT_NAMES
            .iter()
            .map(|entry| entry.event)
            .filter(move |event| self.intersects(*event))
    }

    fn entry(self) -> Option<&'static EventName> {
        EVENT_NAMES.iter().find(|entry| entry.event == self)
    }

    /// Identifier of a single bit event (`logon`, `pulse`, ...)
    pub fn key(self) -> &'static str {
        self.entry().map(|entry| entry.key).unwrap_or("")
    }

    /// Human readable name of a single bit event
    pub fn name(self) -> &'static str {
        self.entry().map(|entry| entry.name).unwrap_or("")
    }

    pub fn description(self) -> &'static str {
        self.entry().map(|entry| entry.description).unwrap_or("")
    }

    /// Parse a comma separated list of event names.
    ///
    /// Each token is matched case-insensitively against the identifier, the
    /// name and the description of every event kind. Unknown tokens are
    /// logged and skipped; the call fails only when nothing matched.
    pub fn parse(text: &str) -> Result<Event> {
        let mut events = Event::NONE;

        for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let matched = EVENT_NAMES.iter().find(|entry| {
                token.eq_ignore_ascii_case(entry.key)
                    || token.eq_ignore_ascii_case(entry.name)
                    || token.eq_ignore_ascii_case(entry.description)
            });

            match matched {
                Some(entry) => events |= entry.event,
                None => warn!(token, "Ignoring unknown event name"),
            }
        }

        if events.is_empty() {
            return Err(Error::InvalidEvent(text.to_string()));
        }

        debug!(text, events = %events, "Parsed event list");
        Ok(events)
    }

    fn join(self, pick: fn(&EventName) -> &'static str, separator: &str) -> String {
        EVENT_NAMES
            .iter()
            .filter(|entry| self.intersects(entry.event))
            .map(pick)
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Descriptions of every event in the mask
    pub fn describe(self) -> String {
        self.join(|entry| entry.description, ", ")
    }
}

impl BitOr for Event {
    type Output = Event;

    fn bitor(self, rhs: Event) -> Event {
        Event(self.0 | rhs.0)
    }
}

impl BitOrAssign for Event {
    fn bitor_assign(&mut self, rhs: Event) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Event {
    type Output = Event;

    fn bitand(self, rhs: Event) -> Event {
        Event(self.0 & rhs.0)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join(|entry| entry.key, ","))
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event({})", self.join(|entry| entry.key, " | "))
    }
}

impl FromStr for Event {
    type Err = Error;

    fn from_str(s: &str) -> Result<Event> {
        Event::parse(s)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
