//! Identity Resolution
//!
//! Maps session tokens to durable identities, binds devices at verification
//! time and merges anonymous session history into the identity.
//!
//! ## Invariants
//!
//! - One binding row per token; a token is rebound in place, never duplicated.
//! - One verified email per identity (unique index), any number of devices.
//! - Binding a token already bound to a different identity is a conflict
//!   unless the caller forces it.

mod model;
mod resolver;

pub use model::{
    normalize_email, Actor, AgeBracket, AnchoredActor, DeviceBinding, Identity, IdentityId,
    Resolved, Role, SessionToken, MAX_TOKEN_LEN, MIN_TOKEN_LEN,
};
pub use resolver::{
    BindMode, BindOutcome, ErasureReport, IdentityResolver, MergeOutcome, VerificationOutcome,
};
