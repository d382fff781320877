use subtle::ConstantTimeEq;

use crate::storage::types::document::{AccessLevel, Document};
use crate::storage::types::user::User;

/// Why access was denied. Categorical only — never carries enough detail for
/// a caller to enumerate documents or users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    Inactive,
    Passcode,
    Unauthenticated,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// 8-step ordered evaluation: first match wins. `passcode` is the value
/// supplied by the caller for `AccessLevel::Passcode` documents, compared in
/// constant time against the document's stored passcode.
pub fn check_access(user: Option<&User>, document: &Document, passcode: Option<&str>) -> AccessDecision {
    if !document.active {
        return AccessDecision::Deny(DenyReason::Inactive);
    }

    if let Some(user) = user {
        if user.is_super_admin() {
            return AccessDecision::Allow;
        }
    }

    match document.access_level {
        AccessLevel::Public => AccessDecision::Allow,
        AccessLevel::Passcode => {
            let matches = match (&document.passcode, passcode) {
                (Some(expected), Some(supplied)) => {
                    bool::from(expected.as_bytes().ct_eq(supplied.as_bytes()))
                }
                _ => false,
            };
            if matches {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::Passcode)
            }
        }
        AccessLevel::Registered => {
            if user.is_some() {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny(DenyReason::Unauthenticated)
            }
        }
        AccessLevel::OwnerRestricted => match (user, &document.owner_id) {
            (Some(user), Some(owner_id)) if user.has_owner_membership(owner_id) => AccessDecision::Allow,
            _ => AccessDecision::Deny(DenyReason::Forbidden),
        },
        AccessLevel::OwnerAdminOnly => match (user, &document.owner_id) {
            (Some(user), Some(owner_id)) if user.is_owner_admin_of(owner_id) => AccessDecision::Allow,
            _ => AccessDecision::Deny(DenyReason::Forbidden),
        },
    }
}
