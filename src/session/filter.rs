// Session Type Filter
//
// Rule side classification filter. Every dimension pairs two opposite
// flags (system/user, remote/local, ...) and is evaluated independently;
// a session passes only if every dimension admits it.

use serde::Serialize;
use std::fmt;

/// One classification flag, as named in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionType {
    System,
    User,
    Remote,
    Local,
    Locked,
    Unlocked,
    Background,
    Foreground,
    Active,
    Inactive,
}

impl SessionType {
    pub const ALL: [SessionType; 10] = [
        SessionType::System,
        SessionType::User,
        SessionType::Remote,
        SessionType::Local,
        SessionType::Locked,
        SessionType::Unlocked,
        SessionType::Background,
        SessionType::Foreground,
        SessionType::Active,
        SessionType::Inactive,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SessionType::System => "system",
            SessionType::User => "user",
            SessionType::Remote => "remote",
            SessionType::Local => "local",
            SessionType::Locked => "locked",
            SessionType::Unlocked => "unlocked",
            SessionType::Background => "background",
            SessionType::Foreground => "foreground",
            SessionType::Active => "active",
            SessionType::Inactive => "inactive",
        }
    }

    pub fn from_name(name: &str) -> Option<SessionType> {
        Self::ALL.iter().copied().find(|t| name.eq_ignore_ascii_case(t.name()))
    }

    pub const fn bit(self) -> u16 {
        1 << self as u16
    }
}

/// What a filter dimension requires from a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Requirement {
    /// Both flags allowed
    #[default]
    DontCare,
    /// Only sessions whose attribute equals the value
    Require(bool),
    /// Both flags cleared, no session passes
    Reject,
}

impl Requirement {
    /// Build from the pair (flag allowed when attribute is true, when false)
    pub fn from_flags(when_true: bool, when_false: bool) -> Requirement {
        match (when_true, when_false) {
            (true, true) => Requirement::DontCare,
            (true, false) => Requirement::Require(true),
            (false, true) => Requirement::Require(false),
            (false, false) => Requirement::Reject,
        }
    }

    pub fn flags(self) -> (bool, bool) {
        match self {
            Requirement::DontCare => (true, true),
            Requirement::Require(value) => (value, !value),
            Requirement::Reject => (false, false),
        }
    }

    pub fn admits(self, value: bool) -> bool {
        match self {
            Requirement::DontCare => true,
            Requirement::Require(required) => required == value,
            Requirement::Reject => false,
        }
    }
}

/// Session side of the match: the actual attribute values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Classification {
    pub system: bool,
    pub remote: bool,
    pub locked: bool,
    pub foreground: bool,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SessionTypeFilter {
    pub system: Requirement,
    pub remote: Requirement,
    pub locked: Requirement,
    pub foreground: Requirement,
    pub active: Requirement,
}

impl SessionTypeFilter {
    /// Every flag set, matches any session
    pub const ALL_BITS: u16 = 0x03FF;

    pub fn from_bits(bits: u16) -> SessionTypeFilter {
        let has = |t: SessionType| bits & t.bit() != 0;
        SessionTypeFilter {
            system: Requirement::from_flags(has(SessionType::System), has(SessionType::User)),
            remote: Requirement::from_flags(has(SessionType::Remote), has(SessionType::Local)),
            locked: Requirement::from_flags(has(SessionType::Locked), has(SessionType::Unlocked)),
            foreground: Requirement::from_flags(
                has(SessionType::Foreground),
                has(SessionType::Background),
            ),
            active: Requirement::from_flags(has(SessionType::Active), has(SessionType::Inactive)),
        }
    }

    pub fn bits(&self) -> u16 {
        SessionType::ALL
            .iter()
            .filter(|t| self.allows(**t))
            .fold(0, |bits, t| bits | t.bit())
    }

    fn dimension(&mut self, flag: SessionType) -> (&mut Requirement, bool) {
        match flag {
            SessionType::System => (&mut self.system, true),
            SessionType::User => (&mut self.system, false),
            SessionType::Remote => (&mut self.remote, true),
            SessionType::Local => (&mut self.remote, false),
            SessionType::Locked => (&mut self.locked, true),
            SessionType::Unlocked => (&mut self.locked, false),
            SessionType::Foreground => (&mut self.foreground, true),
            SessionType::Background => (&mut self.foreground, false),
            SessionType::Active => (&mut self.active, true),
            SessionType::Inactive => (&mut self.active, false),
        }
    }

    /// Is the flag allowed by this filter?
    pub fn allows(&self, flag: SessionType) -> bool {
        let mut copy = *self;
        let (requirement, side) = copy.dimension(flag);
        let (when_true, when_false) = requirement.flags();
        if side { when_true } else { when_false }
    }

    /// Allow or deny one flag, leaving its opposite untouched
    pub fn set(&mut self, flag: SessionType, allowed: bool) {
        let (requirement, side) = self.dimension(flag);
        let (mut when_true, mut when_false) = requirement.flags();
        if side {
            when_true = allowed;
        } else {
            when_false = allowed;
        }
        *requirement = Requirement::from_flags(when_true, when_false);
    }

    pub fn with(mut self, flag: SessionType, allowed: bool) -> Self {
        self.set(flag, allowed);
        self
    }

    /// First dimension rejecting the classification, if any
    pub fn rejection(&self, class: &Classification) -> Option<&'static str> {
        let dimensions = [
            (self.locked, class.locked, "locked"),
            (self.foreground, class.foreground, "foreground"),
            (self.system, class.system, "system"),
            (self.active, class.active, "active"),
            (self.remote, class.remote, "remote"),
        ];

        dimensions
            .iter()
            .find(|(requirement, value, _)| !requirement.admits(*value))
            .map(|(_, _, name)| *name)
    }

    pub fn admits(&self, class: &Classification) -> bool {
        self.rejection(class).is_none()
    }
}

impl fmt::Display for SessionTypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = SessionType::ALL
            .iter()
            .filter(|t| self.allows(**t))
            .map(|t| t.name())
            .collect();
        f.write_str(&names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn remote_locked() -> Classification {
        Classification {
            remote: true,
            locked: true,
            ..Classification::default()
        }
    }

    #[test]
    fn test_default_matches_everything() {
        let filter = SessionTypeFilter::default();
        assert_eq!(filter.bits(), SessionTypeFilter::ALL_BITS);
        assert!(filter.admits(&Classification::default()));
        assert!(filter.admits(&remote_locked()));
    }

    #[test]
    fn test_locked_only_rejects_unlocked_session() {
        let filter = SessionTypeFilter::default().with(SessionType::Unlocked, false);
        assert_eq!(filter.locked, Requirement::Require(true));
        assert!(filter.admits(&remote_locked()));
        assert_eq!(filter.rejection(&Classification::default()), Some("locked"));
    }

    #[test]
    fn test_both_flags_cleared_rejects() {
        let filter = SessionTypeFilter::default()
            .with(SessionType::Remote, false)
            .with(SessionType::Local, false);
        assert_eq!(filter.remote, Requirement::Reject);
        assert!(!filter.admits(&Classification::default()));
        assert!(!filter.admits(&remote_locked()));
    }

    #[test]
    fn test_set_restores_dont_care() {
        let mut filter = SessionTypeFilter::default();
        filter.set(SessionType::System, false);
        assert_eq!(filter.system, Requirement::Require(false));
        filter.set(SessionType::System, true);
        assert_eq!(filter.system, Requirement::DontCare);
    }

    #[test]
    fn test_display_lists_allowed_flags() {
        let filter = SessionTypeFilter::from_bits(
            SessionType::User.bit() | SessionType::Remote.bit() | SessionType::Locked.bit(),
        );
        assert_eq!(filter.to_string(), "user,remote,locked");
    }

    fn classification() -> impl Strategy<Value = Classification> {
        (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(system, remote, locked, foreground, active)| Classification {
                system,
                remote,
                locked,
                foreground,
                active,
            },
        )
    }

    proptest! {
        #[test]
        fn prop_bits_round_trip(bits in 0u16..=SessionTypeFilter::ALL_BITS) {
            prop_assert_eq!(SessionTypeFilter::from_bits(bits).bits(), bits);
        }

        #[test]
        fn prop_admits_iff_every_dimension_allows_the_session_flag(
            bits in 0u16..=SessionTypeFilter::ALL_BITS,
            class in classification(),
        ) {
            let filter = SessionTypeFilter::from_bits(bits);
            let pick = |value: bool, yes: SessionType, no: SessionType| {
                if value { yes } else { no }
            };
            let expected = [
                pick(class.system, SessionType::System, SessionType::User),
                pick(class.remote, SessionType::Remote, SessionType::Local),
                pick(class.locked, SessionType::Locked, SessionType::Unlocked),
                pick(class.foreground, SessionType::Foreground, SessionType::Background),
                pick(class.active, SessionType::Active, SessionType::Inactive),
            ]
            .iter()
            .all(|flag| bits & flag.bit() != 0);

            prop_assert_eq!(filter.admits(&class), expected);
        }
    }
}
