//! Clerks
//!
//! Automated agents that act through a bounded list of structured actions.
//! Each clerk is registered with a capability set; an action outside the
//! set is reported as denied and never attempted.

mod capability;
mod executor;

pub use capability::{CapabilitySet, Clerk, ClerkActionType};
pub use executor::{ActionOutcome, ClerkAction, ClerkExecutor};
