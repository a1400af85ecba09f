//! Identity, device binding and actor types.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{CivicError, Result};

/// Minimum accepted length of a client-supplied session token.
pub const MIN_TOKEN_LEN: usize = 16;
/// Maximum accepted length of a client-supplied session token.
pub const MAX_TOKEN_LEN: usize = 256;

/// Opaque client-held session token.
///
/// Only its SHA-256 fingerprint is ever persisted or logged.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mint a fresh token from 32 random bytes.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Accept a token presented by a client.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.len() < MIN_TOKEN_LEN || raw.len() > MAX_TOKEN_LEN {
            return Err(CivicError::validation(format!(
                "session token must be {}..={} characters",
                MIN_TOKEN_LEN, MAX_TOKEN_LEN
            )));
        }
        if !raw.chars().all(|c| c.is_ascii_graphic()) {
            return Err(CivicError::validation(
                "session token contains invalid characters",
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex SHA-256 of the token; the storage key for bindings and ledger rows.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fp = self.fingerprint();
        write!(f, "SessionToken({}…)", &fp[..12])
    }
}

/// Durable identity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(Uuid);

impl IdentityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for IdentityId {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| CivicError::validation(format!("invalid identity id: {}", s)))
    }
}

/// Roles granted to an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Approved volunteer; granted only through volunteer moderation.
    Volunteer,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Volunteer => "volunteer",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "volunteer" => Ok(Role::Volunteer),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(CivicError::validation(format!("unknown role: {}", other))),
        }
    }
}

/// Self-declared age bracket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBracket {
    #[default]
    Unspecified,
    /// 13 to 17 years old.
    Teen,
    Adult,
}

impl AgeBracket {
    pub fn is_minor(&self) -> bool {
        matches!(self, AgeBracket::Teen)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeBracket::Unspecified => "unspecified",
            AgeBracket::Teen => "teen",
            AgeBracket::Adult => "adult",
        }
    }
}

impl FromStr for AgeBracket {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unspecified" => Ok(AgeBracket::Unspecified),
            "teen" | "13-17" => Ok(AgeBracket::Teen),
            "adult" | "18+" => Ok(AgeBracket::Adult),
            other => Err(CivicError::validation(format!("unknown age bracket: {}", other))),
        }
    }
}

/// A durable user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub email: Option<String>,
    pub email_verified: bool,
    pub phone: Option<String>,
    pub phone_verified: bool,
    pub roles: BTreeSet<Role>,
    pub age_bracket: AgeBracket,
    pub parental_consent: bool,
    pub display_name: Option<String>,
    pub postal_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Association between a session token and (optionally) an identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceBinding {
    pub token_fingerprint: String,
    pub identity_id: Option<IdentityId>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
}

/// Outcome of resolving a session token.
#[derive(Debug, Clone)]
pub enum Resolved {
    Identity(Identity),
    /// No identity yet; ledger actions still anchor to the token.
    Anonymous(SessionToken),
}

impl Resolved {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Resolved::Identity(identity) => Some(identity),
            Resolved::Anonymous(_) => None,
        }
    }

    pub fn identity_id(&self) -> Option<IdentityId> {
        self.identity().map(|i| i.id)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Resolved::Anonymous(_))
    }
}

/// Who performed a ledger action, as supplied by a caller.
#[derive(Debug, Clone)]
pub enum Actor {
    Session(SessionToken),
    Identity(IdentityId),
}

impl From<SessionToken> for Actor {
    fn from(token: SessionToken) -> Self {
        Actor::Session(token)
    }
}

impl From<IdentityId> for Actor {
    fn from(id: IdentityId) -> Self {
        Actor::Identity(id)
    }
}

/// An actor after normalization to its authoritative binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnchoredActor {
    /// Unbound session: entries anchor to the fingerprint only.
    Session { fingerprint: String },
    /// Known identity, optionally reached through a bound session.
    Identity {
        id: IdentityId,
        via_fingerprint: Option<String>,
    },
}

impl AnchoredActor {
    pub fn session_fingerprint(&self) -> Option<&str> {
        match self {
            AnchoredActor::Session { fingerprint } => Some(fingerprint),
            AnchoredActor::Identity { via_fingerprint, .. } => via_fingerprint.as_deref(),
        }
    }

    pub fn identity_id(&self) -> Option<IdentityId> {
        match self {
            AnchoredActor::Session { .. } => None,
            AnchoredActor::Identity { id, .. } => Some(*id),
        }
    }

    /// Scope used for one-time action deduplication.
    pub fn dedup_scope(&self) -> String {
        match self {
            AnchoredActor::Session { fingerprint } => format!("session:{}", fingerprint),
            AnchoredActor::Identity { id, .. } => format!("identity:{}", id),
        }
    }
}

/// Lowercase and sanity-check an email address.
pub fn normalize_email(raw: &str) -> Result<String> {
    let email = raw.trim().to_lowercase();
    let valid = email.len() <= 254
        && email
            .split_once('@')
            .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.starts_with('.'))
            .unwrap_or(false)
        && !email.chars().any(char::is_whitespace);
    if !valid {
        return Err(CivicError::validation(format!("invalid email address: {}", raw)));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_and_parseable() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(SessionToken::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_token_parse_rejects_short_and_spaced() {
        assert!(SessionToken::parse("short").is_err());
        assert!(SessionToken::parse("has a space in the middle of it").is_err());
    }

    #[test]
    fn test_fingerprint_is_stable_and_not_the_token() {
        let token = SessionToken::parse("browser-session-0001").unwrap();
        assert_eq!(token.fingerprint(), token.fingerprint());
        assert_eq!(token.fingerprint().len(), 64);
        assert!(!format!("{:?}", token).contains("browser-session"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ada@Example.ORG ").unwrap(), "ada@example.org");
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@example.org").is_err());
        assert!(normalize_email("ada@localhost").is_err());
    }

    #[test]
    fn test_dedup_scope() {
        let id = IdentityId::new();
        let anchored = AnchoredActor::Identity { id, via_fingerprint: Some("fp".into()) };
        assert_eq!(anchored.dedup_scope(), format!("identity:{}", id));
        assert_eq!(anchored.session_fingerprint(), Some("fp"));

        let anon = AnchoredActor::Session { fingerprint: "fp".into() };
        assert_eq!(anon.dedup_scope(), "session:fp");
        assert_eq!(anon.identity_id(), None);
    }

    #[test]
    fn test_role_and_age_parsing() {
        assert_eq!("Volunteer".parse::<Role>().unwrap(), Role::Volunteer);
        assert!("mayor".parse::<Role>().is_err());
        assert_eq!("13-17".parse::<AgeBracket>().unwrap(), AgeBracket::Teen);
        assert!(AgeBracket::Teen.is_minor());
        assert!(!AgeBracket::Unspecified.is_minor());
    }
}
