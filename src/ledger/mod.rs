//! Action Ledger
//!
//! Append/aggregate store of point-earning events. Entries are immutable;
//! the only rewrites are the merge that re-anchors a session's entries onto
//! its identity and the erasure of an identity.

mod catalog;
mod entry;
mod manager;

pub use catalog::PointsCatalog;
pub use entry::{
    ActionType, EntryId, LedgerContext, LedgerEntry, RecordOutcome, MAX_CONTEXT_FIELD_LEN,
};
pub use manager::ActionLedger;
