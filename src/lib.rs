//! Civic Ledger
//!
//! Identity resolution, derived trust levels, an idempotent points ledger
//! and once-only moderation for a civic engagement platform.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Environment configuration
//! ├── context.rs     - Per-request context (session token, request id)
//! ├── error.rs       - Error taxonomy
//! ├── identity/      - Sessions, identities, device binding and merge
//! ├── trust/         - Trust levels derived from verification state
//! ├── ledger/        - Point-earning actions, catalog, totals, history
//! ├── moderation/    - Guarded once-only transitions and workflows
//! ├── clerk/         - Capability-gated automated actions
//! ├── notify/        - Outbound email (HTTP, log, in-memory)
//! ├── api/           - HTTP endpoints and security middleware
//! └── database/      - SQLite persistence and migrations
//! ```

pub mod api;
pub mod clerk;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod moderation;
pub mod notify;
pub mod trust;

pub use api::{build_router, ApiState, SecurityMiddlewareConfig, SecurityState};
pub use clerk::{ActionOutcome, CapabilitySet, Clerk, ClerkAction, ClerkActionType, ClerkExecutor};
pub use config::CivicConfig;
pub use context::RequestContext;
pub use database::DatabasePool;
pub use error::{CivicError, Result};
pub use identity::{
    Actor, BindMode, Identity, IdentityId, IdentityResolver, Resolved, Role, SessionToken,
};
pub use ledger::{ActionLedger, ActionType, LedgerContext, LedgerEntry, PointsCatalog, RecordOutcome};
pub use moderation::{ModerationGuard, ModerationStatus, ModerationWorkflows, RequestRef, TransitionOutcome};
pub use notify::{Email, HttpNotifier, LogNotifier, MemoryNotifier, Notifier};
pub use trust::TrustLevel;
