use std::fmt;

/// `Reject < Moderate < Pass`. Derived `Ord` relies on declaration order, so
/// the variant order here *is* the policy — do not reorder without checking
/// every place that takes a `max()` across statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Action {
    Reject,
    Moderate,
    Pass,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Reject => "reject",
            Action::Moderate => "moderate",
            Action::Pass => "pass",
        }
    }

    pub fn parse(s: &str) -> Option<Action> {
        match s {
            "reject" => Some(Action::Reject),
            "moderate" => Some(Action::Moderate),
            "pass" => Some(Action::Pass),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One status a From address can hold with respect to a list. Several may
/// apply at once (e.g. a moderator who is also explicitly "known").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Known,
    Member,
    Moderator,
}

/// The four per-status actions a list's policy assigns.
#[derive(Debug, Clone, Copy)]
pub struct Actions {
    pub moderator: Action,
    pub member: Action,
    pub known: Action,
    pub unknown: Action,
}

#[derive(Debug, Clone)]
pub struct List {
    pub id: i64,
    pub display: String,
    pub local: String,
    pub domain: String,
    pub hmac_key: Vec<u8>,
    pub public_signup: bool,
    pub hide_from: bool,
    pub actions: Actions,
}

impl List {
    pub fn addr_spec(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    pub fn display_or_local(&self) -> &str {
        if self.display.is_empty() {
            &self.local
        } else {
            &self.display
        }
    }

    pub fn bounce_local(&self) -> String {
        format!("{}{}", self.local, common::address::BOUNCE_SUFFIX)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Membership {
    pub receive: bool,
    pub moderate: bool,
    pub notify: bool,
    pub admin: bool,
}

/// Result of `GetMembership`: whether the row exists at all plus its flags.
/// Absence is represented as `member: false` with every flag `false` rather
/// than a "not found" error — callers never have to special-case a missing
/// row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipInfo {
    pub member: bool,
    pub moderate: bool,
    pub notify: bool,
    pub admin: bool,
}
