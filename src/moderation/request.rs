//! Moderated request types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CivicError, Result};
use crate::identity::IdentityId;

/// Kinds of request that pass through moderation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    VolunteerApplication,
    Thought,
}

impl RequestKind {
    /// Backing table. Static, never built from input.
    pub(crate) fn table(&self) -> &'static str {
        match self {
            RequestKind::VolunteerApplication => "volunteer_applications",
            RequestKind::Thought => "thoughts",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::VolunteerApplication => "volunteer_application",
            RequestKind::Thought => "thought",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ModerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationStatus::Pending => "pending",
            ModerationStatus::Accepted => "accepted",
            ModerationStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ModerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModerationStatus {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ModerationStatus::Pending),
            "accepted" => Ok(ModerationStatus::Accepted),
            "rejected" => Ok(ModerationStatus::Rejected),
            other => Err(CivicError::Corrupt(format!("moderation status '{}'", other))),
        }
    }
}

/// Reference to one request of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestRef {
    pub kind: RequestKind,
    pub id: i64,
}

impl RequestRef {
    pub fn volunteer(id: i64) -> Self {
        Self { kind: RequestKind::VolunteerApplication, id }
    }

    pub fn thought(id: i64) -> Self {
        Self { kind: RequestKind::Thought, id }
    }
}

impl fmt::Display for RequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind, self.id)
    }
}

/// State of a moderated request as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeratedRequest {
    pub kind: RequestKind,
    pub id: i64,
    pub identity_id: IdentityId,
    pub status: ModerationStatus,
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ModeratedRequest {
    pub fn reference(&self) -> RequestRef {
        RequestRef { kind: self.kind, id: self.id }
    }
}
