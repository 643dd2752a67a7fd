//! Classifier (C6): folds each From address's status set against the
//! list's per-status actions and takes the maximum across all candidates.
//! `Action`'s derived `Ord` (declared `Reject < Moderate < Pass` in
//! `store::model`) is what makes "maximum" mean "most trusted" here.

use common::Address;
use store::{Action, Actions};

/// From addresses beyond this count are dropped before classification —
/// a crafted header with thousands of From addresses must not turn
/// classification into a DoS vector.
pub const MAX_FROM_ADDRESSES: usize = 10;

#[derive(Debug, Clone)]
pub struct Classification {
    pub action: Action,
    pub reason: String,
}

/// Looks up an address's status set with respect to one list.
pub trait StatusLookup {
    fn is_known(&self, addr: &Address) -> Result<bool, store::StoreError>;
    fn is_member(&self, addr: &Address) -> Result<bool, store::StoreError>;
    fn is_moderator(&self, addr: &Address) -> Result<bool, store::StoreError>;
}

/// Truncates `froms` to `MAX_FROM_ADDRESSES`, then classifies. An empty
/// (post-truncation) `froms` list is rejected outright (510) rather than
/// silently falling back to `ActionUnknown` the way the source material
/// does: an address-less message never reached the classifier honestly,
/// so treat it as a bad address rather than an unrecognized sender.
pub fn classify<S: StatusLookup>(lookup: &S, actions: &Actions, froms: &[Address], spam_header: Option<&str>) -> Result<Classification, crate::Error> {
    let froms = &froms[..froms.len().min(MAX_FROM_ADDRESSES)];
    if froms.is_empty() {
        return Err(crate::Error::Coded(510, "no From address present".to_string()));
    }

    let mut best = Classification {
        action: actions.unknown,
        reason: "all From addresses unknown".to_string(),
    };

    for addr in froms {
        let candidates: [(bool, store::Action, &str); 3] = [
            (lookup.is_moderator(addr)?, actions.moderator, "moderator"),
            (lookup.is_member(addr)?, actions.member, "member"),
            (lookup.is_known(addr)?, actions.known, "known"),
        ];
        for (matches, action, status_name) in candidates {
            if matches && action > best.action {
                best = Classification {
                    action,
                    reason: format!("{} is {status_name}", addr.addr_spec()),
                };
            }
        }
    }

    if best.action == Action::Pass && looks_like_spam(spam_header) {
        best = Classification {
            action: Action::Moderate,
            reason: "X-Spam-Status: yes".to_string(),
        };
    }

    Ok(best)
}

fn looks_like_spam(spam_header: Option<&str>) -> bool {
    spam_header
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::address;
    use std::collections::HashSet;

    struct FakeLookup {
        known: HashSet<String>,
        members: HashSet<String>,
        moderators: HashSet<String>,
    }

    impl StatusLookup for FakeLookup {
        fn is_known(&self, addr: &Address) -> Result<bool, store::StoreError> {
            Ok(self.known.contains(&addr.addr_spec()))
        }
        fn is_member(&self, addr: &Address) -> Result<bool, store::StoreError> {
            Ok(self.members.contains(&addr.addr_spec()))
        }
        fn is_moderator(&self, addr: &Address) -> Result<bool, store::StoreError> {
            Ok(self.moderators.contains(&addr.addr_spec()))
        }
    }

    fn actions() -> Actions {
        Actions {
            moderator: Action::Pass,
            member: Action::Pass,
            known: Action::Moderate,
            unknown: Action::Reject,
        }
    }

    #[test]
    fn empty_froms_is_rejected_with_510_not_action_unknown() {
        let lookup = FakeLookup {
            known: HashSet::new(),
            members: HashSet::new(),
            moderators: HashSet::new(),
        };
        let err = classify(&lookup, &actions(), &[], None).unwrap_err();
        assert!(matches!(err, crate::Error::Coded(510, _)));
    }

    #[test]
    fn member_passes() {
        let lookup = FakeLookup {
            known: HashSet::new(),
            members: ["m@example.com".to_string()].into_iter().collect(),
            moderators: HashSet::new(),
        };
        let froms = vec![address::parse("m@example.com").unwrap()];
        let result = classify(&lookup, &actions(), &froms, None).unwrap();
        assert_eq!(result.action, Action::Pass);
    }

    #[test]
    fn spam_header_downgrades_pass_to_moderate() {
        let lookup = FakeLookup {
            known: HashSet::new(),
            members: ["m@example.com".to_string()].into_iter().collect(),
            moderators: HashSet::new(),
        };
        let froms = vec![address::parse("m@example.com").unwrap()];
        let result = classify(&lookup, &actions(), &froms, Some("  Yes, score=12")).unwrap();
        assert_eq!(result.action, Action::Moderate);
        assert_eq!(result.reason, "X-Spam-Status: yes");
    }

    #[test]
    fn monotone_in_sender_trust() {
        let lookup = FakeLookup {
            known: ["k@example.com".to_string()].into_iter().collect(),
            members: ["mem@example.com".to_string()].into_iter().collect(),
            moderators: ["mod@example.com".to_string()].into_iter().collect(),
        };
        let unknown = classify(&lookup, &actions(), &[address::parse("u@example.com").unwrap()], None).unwrap();
        let known = classify(&lookup, &actions(), &[address::parse("k@example.com").unwrap()], None).unwrap();
        let member = classify(&lookup, &actions(), &[address::parse("mem@example.com").unwrap()], None).unwrap();
        let moderator = classify(&lookup, &actions(), &[address::parse("mod@example.com").unwrap()], None).unwrap();
        assert!(unknown.action <= known.action);
        assert!(known.action <= member.action);
        assert!(member.action <= moderator.action);
    }

    #[test]
    fn maximum_across_multiple_statuses_wins() {
        // A single address that is both known and a moderator: moderator
        // (Pass) must win over known (Moderate).
        let lookup = FakeLookup {
            known: ["both@example.com".to_string()].into_iter().collect(),
            members: HashSet::new(),
            moderators: ["both@example.com".to_string()].into_iter().collect(),
        };
        let froms = vec![address::parse("both@example.com").unwrap()];
        let result = classify(&lookup, &actions(), &froms, None).unwrap();
        assert_eq!(result.action, Action::Pass);
    }

    #[test]
    fn deterministic_regardless_of_from_order() {
        let lookup = FakeLookup {
            known: ["k@example.com".to_string()].into_iter().collect(),
            members: ["m@example.com".to_string()].into_iter().collect(),
            moderators: HashSet::new(),
        };
        let a = vec![address::parse("k@example.com").unwrap(), address::parse("m@example.com").unwrap()];
        let b = vec![address::parse("m@example.com").unwrap(), address::parse("k@example.com").unwrap()];
        let ra = classify(&lookup, &actions(), &a, None).unwrap();
        let rb = classify(&lookup, &actions(), &b, None).unwrap();
        assert_eq!(ra.action, rb.action);
    }

    #[test]
    fn truncates_excess_from_addresses() {
        let lookup = FakeLookup {
            known: HashSet::new(),
            members: HashSet::new(),
            moderators: HashSet::new(),
        };
        let many: Vec<Address> = (0..50).map(|i| address::parse(&format!("u{i}@example.com")).unwrap()).collect();
        // Should not panic or take unbounded time; result is well-defined.
        let result = classify(&lookup, &actions(), &many, None).unwrap();
        assert_eq!(result.action, Action::Reject);
    }
}
