//! Clerk action types and capability sets.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{CivicError, Result};

/// Closed set of actions a clerk may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClerkActionType {
    AwardPoints,
    SendEmail,
    ApproveVolunteer,
    RejectVolunteer,
    ApproveThought,
    RejectThought,
    LookupCitizen,
}

impl ClerkActionType {
    pub const ALL: [ClerkActionType; 7] = [
        ClerkActionType::AwardPoints,
        ClerkActionType::SendEmail,
        ClerkActionType::ApproveVolunteer,
        ClerkActionType::RejectVolunteer,
        ClerkActionType::ApproveThought,
        ClerkActionType::RejectThought,
        ClerkActionType::LookupCitizen,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ClerkActionType::AwardPoints => "AwardPoints",
            ClerkActionType::SendEmail => "SendEmail",
            ClerkActionType::ApproveVolunteer => "ApproveVolunteer",
            ClerkActionType::RejectVolunteer => "RejectVolunteer",
            ClerkActionType::ApproveThought => "ApproveThought",
            ClerkActionType::RejectThought => "RejectThought",
            ClerkActionType::LookupCitizen => "LookupCitizen",
        }
    }
}

impl fmt::Display for ClerkActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts `SendEmail`, `sendemail`, `send_email` and `SEND-EMAIL` alike.
impl FromStr for ClerkActionType {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        ClerkActionType::ALL
            .into_iter()
            .find(|t| t.name().to_ascii_lowercase() == folded)
            .ok_or_else(|| CivicError::validation(format!("unknown clerk action: {}", s)))
    }
}

impl Serialize for ClerkActionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ClerkActionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Actions a clerk is allowed to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<ClerkActionType>);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        ClerkActionType::ALL.into_iter().collect()
    }

    pub fn allows(&self, action: ClerkActionType) -> bool {
        self.0.contains(&action)
    }

    pub fn grant(&mut self, action: ClerkActionType) {
        self.0.insert(action);
    }

    pub fn iter(&self) -> impl Iterator<Item = ClerkActionType> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ClerkActionType> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = ClerkActionType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A named automated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clerk {
    pub name: String,
    pub capabilities: CapabilitySet,
}

impl Clerk {
    pub fn new(name: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self { name: name.into(), capabilities }
    }

    /// Fails with the verbatim capability message when the action is not granted.
    pub fn authorize(&self, action: ClerkActionType) -> Result<()> {
        if self.capabilities.allows(action) {
            Ok(())
        } else {
            Err(CivicError::CapabilityDenied(format!(
                "Clerk '{}' doesn't have capability for {}",
                self.name, action
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("sendemail".parse::<ClerkActionType>().unwrap(), ClerkActionType::SendEmail);
        assert_eq!("SEND_EMAIL".parse::<ClerkActionType>().unwrap(), ClerkActionType::SendEmail);
        assert_eq!(
            "approve-volunteer".parse::<ClerkActionType>().unwrap(),
            ClerkActionType::ApproveVolunteer
        );
        assert!("DropTables".parse::<ClerkActionType>().is_err());
    }

    #[test]
    fn test_denied_message() {
        let clerk = Clerk::new(
            "greeter",
            [ClerkActionType::AwardPoints].into_iter().collect(),
        );
        assert!(clerk.authorize(ClerkActionType::AwardPoints).is_ok());
        let err = clerk.authorize(ClerkActionType::SendEmail).unwrap_err();
        assert_eq!(err.to_string(), "Clerk 'greeter' doesn't have capability for SendEmail");
    }

    #[test]
    fn test_capability_set_json() {
        let set: CapabilitySet = serde_json::from_str(r#"["award_points", "LookupCitizen"]"#).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.allows(ClerkActionType::LookupCitizen));
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["AwardPoints","LookupCitizen"]"#);
    }
}
