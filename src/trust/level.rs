//! Trust Levels
//!
//! A level is never stored. It is recomputed on every read from the
//! identity's verification flags, role set and age/consent state.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::identity::{Identity, Resolved, Role};

/// Verification progress, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Anonymous,
    /// Device bound, nothing verified.
    Remembered,
    EmailVerified,
    /// Email plus second factor.
    PhoneVerified,
    ApprovedVolunteer,
}

impl TrustLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustLevel::Anonymous => "anonymous",
            TrustLevel::Remembered => "remembered",
            TrustLevel::EmailVerified => "email_verified",
            TrustLevel::PhoneVerified => "phone_verified",
            TrustLevel::ApprovedVolunteer => "approved_volunteer",
        }
    }

    /// Lowest level at which posting is possible.
    pub const POSTING: TrustLevel = TrustLevel::EmailVerified;

    /// Highest level a minor without parental consent is shown at.
    pub const MINOR_CAP: TrustLevel = TrustLevel::EmailVerified;
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when the identity is a minor still waiting on parental consent.
pub fn awaiting_consent(identity: &Identity) -> bool {
    identity.age_bracket.is_minor() && !identity.parental_consent
}

/// Level for an existing identity.
pub fn level_of(identity: &Identity) -> TrustLevel {
    let earned = if !identity.email_verified {
        TrustLevel::Remembered
    } else if identity.has_role(Role::Volunteer) {
        TrustLevel::ApprovedVolunteer
    } else if identity.phone_verified {
        TrustLevel::PhoneVerified
    } else {
        TrustLevel::EmailVerified
    };

    if awaiting_consent(identity) {
        earned.min(TrustLevel::MINOR_CAP)
    } else {
        earned
    }
}

/// Level for a resolved session.
pub fn level_of_resolved(resolved: &Resolved) -> TrustLevel {
    match resolved {
        Resolved::Identity(identity) => level_of(identity),
        Resolved::Anonymous(_) => TrustLevel::Anonymous,
    }
}

/// Whether the identity may perform posting-capable actions.
///
/// The minor clamp applies here independently of the displayed level, so
/// setting phone-verified alone never unlocks posting.
pub fn can_post(identity: &Identity) -> bool {
    level_of(identity) >= TrustLevel::POSTING && !awaiting_consent(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{AgeBracket, IdentityId, SessionToken};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn identity() -> Identity {
        Identity {
            id: IdentityId::new(),
            email: None,
            email_verified: false,
            phone: None,
            phone_verified: false,
            roles: BTreeSet::new(),
            age_bracket: AgeBracket::Adult,
            parental_consent: false,
            display_name: None,
            postal_code: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_levels_are_ordered() {
        assert!(TrustLevel::Anonymous < TrustLevel::Remembered);
        assert!(TrustLevel::Remembered < TrustLevel::EmailVerified);
        assert!(TrustLevel::EmailVerified < TrustLevel::PhoneVerified);
        assert!(TrustLevel::PhoneVerified < TrustLevel::ApprovedVolunteer);
    }

    #[test]
    fn test_progression() {
        let mut id = identity();
        assert_eq!(level_of(&id), TrustLevel::Remembered);
        assert!(!can_post(&id));

        id.email_verified = true;
        assert_eq!(level_of(&id), TrustLevel::EmailVerified);
        assert!(can_post(&id));

        id.phone_verified = true;
        assert_eq!(level_of(&id), TrustLevel::PhoneVerified);

        id.roles.insert(Role::Volunteer);
        assert_eq!(level_of(&id), TrustLevel::ApprovedVolunteer);
    }

    #[test]
    fn test_phone_without_email_stays_remembered() {
        let mut id = identity();
        id.phone_verified = true;
        assert_eq!(level_of(&id), TrustLevel::Remembered);
    }

    #[test]
    fn test_minor_clamp_cannot_be_bypassed() {
        let mut id = identity();
        id.age_bracket = AgeBracket::Teen;
        id.email_verified = true;
        id.phone_verified = true;
        id.roles.insert(Role::Volunteer);

        assert_eq!(level_of(&id), TrustLevel::EmailVerified);
        assert!(!can_post(&id));

        id.parental_consent = true;
        assert_eq!(level_of(&id), TrustLevel::ApprovedVolunteer);
        assert!(can_post(&id));
    }

    #[test]
    fn test_anonymous_resolution() {
        let resolved = Resolved::Anonymous(SessionToken::generate());
        assert_eq!(level_of_resolved(&resolved), TrustLevel::Anonymous);
    }
}
