//! Ledger and rotation engine for community savings groups.
//!
//! This crate owns every invariant-preserving mutation of group and member
//! financial state:
//! - rotating-stokvel contributions, funding checks, payouts, round
//!   advancement,
//! - goal-fund contributions, expenses, derived balances,
//! - the membership directory (joining, roles, payout positions),
//! - governance (constitution rules, acceptances, votes).
//!
//! # Architecture
//!
//! ```text
//! Ledger (one SQLite connection)
//! ├── membership: join / roles / roster
//! ├── rotation:   record_contribution / process_payout
//! ├── goal:       record_goal_contribution / record_expense / goal_balance
//! ├── governance: rules / acceptances / votes
//! └── events:     fire-and-forget sink for the external notifier
//! ```
//!
//! Every mutating operation validates, mutates, and returns inside one
//! immediate SQLite transaction; callers see either a fully applied write
//! or a typed [`LedgerError`], never partial state. Authentication is
//! external: operations receive an already-authenticated [`UserId`] and
//! check only role.
//!
//! [`UserId`]: kasi_types::UserId

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod error;
mod events;
mod goal;
mod governance;
mod membership;
mod rotation;
mod store;

pub use error::{ErrorKind, LedgerError};
pub use events::{EventSink, MemorySink, TracingSink};
pub use store::Ledger;
