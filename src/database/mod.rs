//! SQLite Database Module
//!
//! Provides storage for identities, device bindings, the action ledger,
//! moderated requests and the clerk registry.
//!
//! Methods suffixed `_in` take an open connection so callers can compose
//! them inside one transaction.

pub mod pool;
pub mod identities;
pub mod bindings;
pub mod ledger;
pub mod moderation;
pub mod clerks;

pub use pool::DatabasePool;
pub use identities::IdentityRepository;
pub use bindings::{BindingRepository, ProfileDraft};
pub use ledger::{LedgerRepository, NewEntry};
pub use moderation::ModerationRepository;
pub use clerks::ClerkRepository;
