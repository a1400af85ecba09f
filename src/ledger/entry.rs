//! Ledger entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CivicError, Result};
use crate::identity::IdentityId;

/// Upper bound for any free-text context field.
pub const MAX_CONTEXT_FIELD_LEN: usize = 255;

/// Point-earning action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    PageVisit,
    ElementClick,
    OnboardingStep,
    EmailVerified,
    PhoneVerified,
    VoteCast,
    ThoughtSubmitted,
    ClerkAward,
}

impl ActionType {
    pub const ALL: [ActionType; 8] = [
        ActionType::PageVisit,
        ActionType::ElementClick,
        ActionType::OnboardingStep,
        ActionType::EmailVerified,
        ActionType::PhoneVerified,
        ActionType::VoteCast,
        ActionType::ThoughtSubmitted,
        ActionType::ClerkAward,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::PageVisit => "page_visit",
            ActionType::ElementClick => "element_click",
            ActionType::OnboardingStep => "onboarding_step",
            ActionType::EmailVerified => "email_verified",
            ActionType::PhoneVerified => "phone_verified",
            ActionType::VoteCast => "vote_cast",
            ActionType::ThoughtSubmitted => "thought_submitted",
            ActionType::ClerkAward => "clerk_award",
        }
    }

    /// Deduplicated per (actor, type, context) when true.
    ///
    /// Votes and thoughts are rate-limited by their own business rules
    /// upstream and are recorded every time.
    pub fn is_idempotent_once(&self) -> bool {
        !matches!(self, ActionType::VoteCast | ActionType::ThoughtSubmitted)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        ActionType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| CivicError::validation(format!("unknown action type: {}", s)))
    }
}

/// Typed context for a ledger entry.
///
/// Known shapes are closed variants; `Other` carries anything newer clients
/// send so the ledger stays forward compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerContext {
    Page {
        page: String,
    },
    Element {
        page: String,
        element: String,
    },
    Onboarding {
        step: String,
    },
    Verification,
    Vote {
        target: String,
        choice: String,
    },
    Thought {
        thought_id: i64,
    },
    Award {
        reason: String,
    },
    Other {
        #[serde(default)]
        page: Option<String>,
        #[serde(default)]
        element: Option<String>,
        #[serde(default)]
        extra: serde_json::Value,
    },
}

impl LedgerContext {
    pub fn page(page: impl Into<String>) -> Self {
        LedgerContext::Page { page: page.into() }
    }

    /// Canonical key for deduplication of one-time actions.
    ///
    /// Multi-field contexts encode their fields as a JSON array so free text
    /// containing separators cannot alias another context.
    pub fn dedup_key(&self) -> String {
        match self {
            LedgerContext::Page { page } => format!("page:{}", page),
            LedgerContext::Element { page, element } => {
                format!("element:{}", serde_json::json!([page, element]))
            }
            LedgerContext::Onboarding { step } => format!("onboarding:{}", step),
            LedgerContext::Verification => "verification".to_string(),
            LedgerContext::Vote { target, choice } => {
                format!("vote:{}", serde_json::json!([target, choice]))
            }
            LedgerContext::Thought { thought_id } => format!("thought:{}", thought_id),
            LedgerContext::Award { reason } => format!("award:{}", reason),
            LedgerContext::Other { page, element, extra } => {
                format!("other:{}", serde_json::json!([page, element, extra]))
            }
        }
    }

    /// Reject malformed context before anything is written.
    pub fn validate_for(&self, action: ActionType) -> Result<()> {
        fn field(name: &str, value: &str) -> Result<()> {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(CivicError::validation(format!("context field '{}' is required", name)));
            }
            if trimmed.len() > MAX_CONTEXT_FIELD_LEN {
                return Err(CivicError::validation(format!(
                    "context field '{}' exceeds {} characters",
                    name, MAX_CONTEXT_FIELD_LEN
                )));
            }
            Ok(())
        }

        match self {
            LedgerContext::Page { page } => field("page", page)?,
            LedgerContext::Element { page, element } => {
                field("page", page)?;
                field("element", element)?;
            }
            LedgerContext::Onboarding { step } => field("step", step)?,
            LedgerContext::Verification => {}
            LedgerContext::Vote { target, choice } => {
                field("target", target)?;
                field("choice", choice)?;
            }
            LedgerContext::Thought { thought_id } => {
                if *thought_id <= 0 {
                    return Err(CivicError::validation("context field 'thought_id' must be positive"));
                }
            }
            LedgerContext::Award { reason } => field("reason", reason)?,
            LedgerContext::Other { page, element, .. } => {
                if let Some(page) = page {
                    field("page", page)?;
                }
                if let Some(element) = element {
                    field("element", element)?;
                }
            }
        }

        let compatible = matches!(
            (action, self),
            (_, LedgerContext::Other { .. })
                | (ActionType::PageVisit, LedgerContext::Page { .. })
                | (ActionType::ElementClick, LedgerContext::Element { .. })
                | (ActionType::OnboardingStep, LedgerContext::Onboarding { .. })
                | (ActionType::EmailVerified, LedgerContext::Verification)
                | (ActionType::PhoneVerified, LedgerContext::Verification)
                | (ActionType::VoteCast, LedgerContext::Vote { .. })
                | (ActionType::ThoughtSubmitted, LedgerContext::Thought { .. })
                | (ActionType::ClerkAward, LedgerContext::Award { .. })
        );
        if !compatible {
            return Err(CivicError::validation(format!(
                "context kind does not match action type {}",
                action
            )));
        }
        Ok(())
    }
}

/// Ledger entry id.
pub type EntryId = i64;

/// One immutable point-earning record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    /// Fingerprint of the session that performed the action, if any.
    pub session_fingerprint: Option<String>,
    pub identity_id: Option<IdentityId>,
    pub action_type: ActionType,
    pub context: LedgerContext,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

/// Result of [`crate::ledger::ActionLedger::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordOutcome {
    pub entry_id: EntryId,
    /// True when a one-time action was already recorded; nothing was written.
    pub duplicate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent_classification() {
        assert!(ActionType::PageVisit.is_idempotent_once());
        assert!(ActionType::ClerkAward.is_idempotent_once());
        assert!(!ActionType::VoteCast.is_idempotent_once());
        assert!(!ActionType::ThoughtSubmitted.is_idempotent_once());
    }

    #[test]
    fn test_action_type_parse_is_case_insensitive() {
        assert_eq!("Page_Visit".parse::<ActionType>().unwrap(), ActionType::PageVisit);
        assert!("teleport".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_context_json_shape() {
        let ctx: LedgerContext =
            serde_json::from_value(serde_json::json!({"kind": "page", "page": "home"})).unwrap();
        assert_eq!(ctx, LedgerContext::page("home"));

        let other: LedgerContext = serde_json::from_value(
            serde_json::json!({"kind": "other", "extra": {"map_zoom": 12}}),
        )
        .unwrap();
        assert!(other.validate_for(ActionType::PageVisit).is_ok());
    }

    #[test]
    fn test_dedup_key_keeps_separators_apart() {
        let a = LedgerContext::Element { page: "map#zoom".into(), element: "btn".into() };
        let b = LedgerContext::Element { page: "map".into(), element: "zoom#btn".into() };
        assert_ne!(a.dedup_key(), b.dedup_key());

        let c = LedgerContext::Other {
            page: Some("a#b".into()),
            element: None,
            extra: serde_json::Value::Null,
        };
        let d = LedgerContext::Other {
            page: Some("a".into()),
            element: Some("b".into()),
            extra: serde_json::Value::Null,
        };
        assert_ne!(c.dedup_key(), d.dedup_key());
    }

    #[test]
    fn test_validation_rejects_missing_and_mismatched() {
        assert!(LedgerContext::page("  ").validate_for(ActionType::PageVisit).is_err());
        assert!(LedgerContext::page("home").validate_for(ActionType::VoteCast).is_err());
        assert!(LedgerContext::Thought { thought_id: 0 }
            .validate_for(ActionType::ThoughtSubmitted)
            .is_err());
        assert!(LedgerContext::page("x".repeat(MAX_CONTEXT_FIELD_LEN + 1))
            .validate_for(ActionType::PageVisit)
            .is_err());
    }

    #[test]
    fn test_dedup_keys_distinguish_context() {
        assert_ne!(
            LedgerContext::page("home").dedup_key(),
            LedgerContext::page("map").dedup_key()
        );
        assert_eq!(
            LedgerContext::Element { page: "home".into(), element: "cta".into() }.dedup_key(),
            r#"element:["home","cta"]"#
        );
    }
}
