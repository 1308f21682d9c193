//! Constitution rules and group voting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GroupId, ParseLabelError, RuleId, UserId, VoteId};

/// One rule of a group's constitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstitutionRule {
    pub id: RuleId,
    pub group_id: GroupId,
    pub title: String,
    pub description: String,
    /// 1-based position within the constitution, assigned sequentially.
    pub rule_order: u32,
    pub created_at: DateTime<Utc>,
}

/// A member's signature on one constitution rule. Append-only; accepting
/// twice is a no-op, keyed by `(rule_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAcceptance {
    pub rule_id: RuleId,
    pub user_id: UserId,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    General,
    RoleChange,
    RuleChange,
    MemberExit,
}

impl VoteType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::RoleChange => "role_change",
            Self::RuleChange => "rule_change",
            Self::MemberExit => "member_exit",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "general" => Ok(Self::General),
            "role_change" => Ok(Self::RoleChange),
            "rule_change" => Ok(Self::RuleChange),
            "member_exit" => Ok(Self::MemberExit),
            other => Err(ParseLabelError::new("vote type", other)),
        }
    }
}

/// Vote lifecycle: `Active -> {Passed, Rejected}` on explicit resolution,
/// or `Active -> Expired` lazily once `now > expires_at` with no
/// resolution performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    Active,
    Passed,
    Rejected,
    Expired,
}

impl VoteStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Passed => "passed",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "active" => Ok(Self::Active),
            "passed" => Ok(Self::Passed),
            "rejected" => Ok(Self::Rejected),
            "expired" => Ok(Self::Expired),
            other => Err(ParseLabelError::new("vote status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteValue {
    For,
    Against,
}

impl VoteValue {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::For => "for",
            Self::Against => "against",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "for" => Ok(Self::For),
            "against" => Ok(Self::Against),
            other => Err(ParseLabelError::new("vote value", other)),
        }
    }
}

/// A proposal put to the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub group_id: GroupId,
    pub title: String,
    pub description: String,
    pub proposed_by: UserId,
    pub vote_type: VoteType,
    pub status: VoteStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// One member's cast on one vote. Upsert semantics: re-casting before the
/// vote closes overwrites the prior value; only one cast per user counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCast {
    pub vote_id: VoteId,
    pub user_id: UserId,
    pub value: VoteValue,
    pub cast_at: DateTime<Utc>,
}

/// The outcome a tally would produce if the vote were resolved now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    Passed,
    Rejected,
}

/// A read-time count of casts. Never cached; always recomputed from the
/// cast rows so displayed counts cannot go stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub for_votes: u32,
    pub against_votes: u32,
}

impl Tally {
    /// Simple majority of votes cast, not of total membership. Ties reject.
    #[must_use]
    pub fn outcome(self) -> VoteOutcome {
        if self.for_votes > self.against_votes {
            VoteOutcome::Passed
        } else {
            VoteOutcome::Rejected
        }
    }
}
