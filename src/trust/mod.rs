//! Trust State Machine
//!
//! ```text
//! anonymous ─► remembered ─► email_verified ─► phone_verified ─► approved_volunteer
//!                                  ▲
//!                 minor without parental consent is clamped here
//! ```
//!
//! Levels only move forward through verification events and role grants.
//! Demotion is an administrator data edit, never a ledger action.

mod level;

pub use level::{awaiting_consent, can_post, level_of, level_of_resolved, TrustLevel};
