//! Typed failures for ledger operations.
//!
//! Every mutating operation returns `Result<_, LedgerError>` and leaves no
//! partial state on any error path (each runs in one SQLite transaction).
//! The `kind()` accessor collapses the specific variants into the four
//! caller-facing categories: validation errors point at the offending
//! input, precondition errors are often retryable once group state moves,
//! authorization errors are deliberately generic, and not-found errors name
//! the missing row.

use chrono::{DateTime, Utc};
use thiserror::Error;

use kasi_types::{GroupId, Money, ParseLabelError, Round, RuleId, UserId, VoteId};

/// Caller-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input is malformed; retrying without fixing it will fail again.
    Validation,
    /// Current state disallows the operation; often retryable later.
    Precondition,
    /// The actor's role does not permit the operation.
    Authorization,
    /// A referenced row does not exist.
    NotFound,
    /// Infrastructure failure (SQLite, corrupt row).
    Storage,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    // ── Validation ──────────────────────────────────────────────────────
    #[error("contribution must be exactly {expected}, got {got}")]
    WrongAmount { expected: Money, got: Money },
    #[error("contribution is for round {got} but the group is on round {current}")]
    WrongRound { current: Round, got: Round },
    #[error("amount must be positive")]
    NonPositiveAmount,
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("max_members must be at least 1")]
    InvalidMaxMembers,
    #[error("adjustment type must be penalty or settlement")]
    InvalidAdjustmentType,
    #[error("operation only applies to rotating groups")]
    NotRotating,
    #[error("operation only applies to goal groups")]
    NotGoal,

    // ── Precondition ────────────────────────────────────────────────────
    #[error("group is not active")]
    GroupInactive,
    #[error("group already has its maximum of {max} members")]
    GroupFull { max: u32 },
    #[error("user is already a member of this group")]
    AlreadyMember,
    #[error("user is not an active member of this group")]
    NotActiveMember,
    #[error("member has already contributed for round {round}")]
    AlreadyContributed { round: Round },
    #[error("{paid} of {required} members have contributed; payout needs all of them")]
    NotFullyFunded { paid: u32, required: u32 },
    #[error(
        "recipient holds payout position {position} but the group is on round {current_round}"
    )]
    RecipientMismatch { position: u32, current_round: Round },
    #[error("rotation is complete; no rounds remain")]
    RotationComplete,
    #[error("vote is no longer open")]
    VoteClosed,
    #[error("vote expired at {expires_at}")]
    VoteExpired { expires_at: DateTime<Utc> },

    // ── Authorization ───────────────────────────────────────────────────
    // Deliberately generic: role details never leak to the actor.
    #[error("not permitted")]
    NotPermitted,

    // ── Not found ───────────────────────────────────────────────────────
    #[error("group {0} not found")]
    GroupNotFound(GroupId),
    #[error("user {user} has no membership in group {group}")]
    MemberNotFound { group: GroupId, user: UserId },
    #[error("vote {0} not found")]
    VoteNotFound(VoteId),
    #[error("rule {0} not found")]
    RuleNotFound(RuleId),

    // ── Storage ─────────────────────────────────────────────────────────
    #[error("pool balance overflowed")]
    BalanceOverflow,
    #[error("corrupt ledger row: {0}")]
    Corrupt(#[from] ParseLabelError),
    #[error("failed to prepare database path: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

impl LedgerError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::WrongAmount { .. }
            | Self::WrongRound { .. }
            | Self::NonPositiveAmount
            | Self::EmptyField(_)
            | Self::InvalidMaxMembers
            | Self::InvalidAdjustmentType
            | Self::NotRotating
            | Self::NotGoal => ErrorKind::Validation,

            Self::GroupInactive
            | Self::GroupFull { .. }
            | Self::AlreadyMember
            | Self::NotActiveMember
            | Self::AlreadyContributed { .. }
            | Self::NotFullyFunded { .. }
            | Self::RecipientMismatch { .. }
            | Self::RotationComplete
            | Self::VoteClosed
            | Self::VoteExpired { .. } => ErrorKind::Precondition,

            Self::NotPermitted => ErrorKind::Authorization,

            Self::GroupNotFound(_)
            | Self::MemberNotFound { .. }
            | Self::VoteNotFound(_)
            | Self::RuleNotFound(_) => ErrorKind::NotFound,

            Self::BalanceOverflow | Self::Corrupt(_) | Self::Io(_) | Self::Storage(_) => {
                ErrorKind::Storage
            }
        }
    }
}
