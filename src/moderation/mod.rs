//! Moderation
//!
//! Volunteer applications and thoughts wait in `pending` until an
//! administrator (or a clerk) accepts or rejects them. The
//! [`ModerationGuard`] makes the decision and its notification happen once,
//! whatever the number of concurrent or repeated attempts.

mod guard;
mod request;
mod workflows;

pub use guard::{ModerationGuard, TransitionOutcome};
pub use request::{ModeratedRequest, ModerationStatus, RequestKind, RequestRef};
pub use workflows::{ModerationWorkflows, ThoughtSubmission};
