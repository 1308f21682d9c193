//! Core domain types for the Kasi ledger.
//!
//! This crate contains pure domain types with no IO, no async, and minimal
//! dependencies. Everything here can be used from any layer of the
//! application: the ledger engine, read views, and external collaborators
//! (notification fan-out, UI adapters) all speak these types.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod event;
mod governance;
mod group;
mod ids;
mod member;
mod money;
mod score;
mod transaction;

pub use event::{DomainEvent, EventKind};
pub use governance::{
    ConstitutionRule, RuleAcceptance, Tally, Vote, VoteCast, VoteOutcome, VoteStatus, VoteType,
    VoteValue,
};
pub use group::{Frequency, Group, GroupKind, GroupSpec, GroupStatus};
pub use ids::{ExpenseId, GroupId, Round, RuleId, TransactionId, UserId, VoteId};
pub use member::{Member, MemberRole, MemberStatus};
pub use money::Money;
pub use score::commitment_score;
pub use transaction::{Expense, Timeliness, Transaction, TransactionStatus, TransactionType};

use thiserror::Error;

/// Failure to parse a stored enum label back into its Rust type.
///
/// Raised when a TEXT column holds a value outside the closed set a column
/// is allowed to contain (schema drift or manual edits to the database).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {what} label: {value:?}")]
pub struct ParseLabelError {
    pub what: &'static str,
    pub value: String,
}

impl ParseLabelError {
    #[must_use]
    pub fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}
