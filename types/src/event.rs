//! Domain events for the external notification fan-out.
//!
//! Events describe state transitions that already committed. They are
//! informational only: the notifier fans them out to members (push/email),
//! and a delivery failure never feeds back into ledger state.

use serde::{Deserialize, Serialize};

use crate::{GroupId, UserId};

/// The closed set of transitions worth telling members about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MemberJoined,
    ContributionRecorded,
    PayoutProcessed,
    ExpenseRecorded,
    RuleAccepted,
    VoteOpened,
}

/// A committed state transition, ready for fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub group_id: GroupId,
    pub kind: EventKind,
    pub actor: UserId,
    /// Human-readable one-liner, e.g. "R 100.00 contributed for round 2".
    pub summary: String,
}

impl DomainEvent {
    #[must_use]
    pub fn new(group_id: GroupId, kind: EventKind, actor: UserId, summary: impl Into<String>) -> Self {
        Self {
            group_id,
            kind,
            actor,
            summary: summary.into(),
        }
    }
}
