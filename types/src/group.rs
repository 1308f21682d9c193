//! Savings-group identity and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GroupId, Money, ParseLabelError, Round, UserId};

/// What kind of pooled fund a group runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Classic stokvel: fixed contributions, one rotating payout per round.
    Rotating,
    /// Goal fund: flexible contributions and tracked expenses, no rotation.
    Goal,
}

impl GroupKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rotating => "rotating",
            Self::Goal => "goal",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "rotating" => Ok(Self::Rotating),
            "goal" => Ok(Self::Goal),
            other => Err(ParseLabelError::new("group kind", other)),
        }
    }
}

/// Contribution cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Weekly,
    Monthly,
}

impl Frequency {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(ParseLabelError::new("frequency", other)),
        }
    }
}

/// Group lifecycle status. Groups are never hard-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Active,
    Completed,
    Paused,
}

impl GroupStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Paused => "paused",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "paused" => Ok(Self::Paused),
            other => Err(ParseLabelError::new("group status", other)),
        }
    }
}

/// A savings group.
///
/// For rotating groups `total_rounds == max_members` (each member receives
/// exactly one payout per cycle). `total_pool` is the running balance; for
/// goal groups it is a cache that every write re-derives from the
/// transaction and expense logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: String,
    pub kind: GroupKind,
    pub contribution_amount: Money,
    pub frequency: Frequency,
    pub max_members: u32,
    pub current_round: Round,
    pub total_rounds: u32,
    pub total_pool: Money,
    pub status: GroupStatus,
    pub created_by: UserId,
    pub goal_target_monthly: Option<Money>,
    pub recurring: bool,
    pub goal_description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a new group.
///
/// The founder becomes chairperson at payout position 1; for rotating
/// groups the ledger derives `total_rounds` from `max_members`.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub name: String,
    pub description: String,
    pub kind: GroupKind,
    pub contribution_amount: Money,
    pub frequency: Frequency,
    pub max_members: u32,
    pub goal_target_monthly: Option<Money>,
    pub recurring: bool,
    pub goal_description: Option<String>,
}

impl GroupSpec {
    /// A rotating stokvel with a fixed per-round contribution.
    #[must_use]
    pub fn rotating(
        name: impl Into<String>,
        contribution_amount: Money,
        frequency: Frequency,
        max_members: u32,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind: GroupKind::Rotating,
            contribution_amount,
            frequency,
            max_members,
            goal_target_monthly: None,
            recurring: false,
            goal_description: None,
        }
    }

    /// A goal fund with flexible contributions.
    #[must_use]
    pub fn goal(name: impl Into<String>, frequency: Frequency, max_members: u32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            kind: GroupKind::Goal,
            contribution_amount: Money::ZERO,
            frequency,
            max_members,
            goal_target_monthly: None,
            recurring: false,
            goal_description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_goal_target(mut self, target: Money, recurring: bool) -> Self {
        self.goal_target_monthly = Some(target);
        self.recurring = recurring;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for kind in [GroupKind::Rotating, GroupKind::Goal] {
            assert_eq!(GroupKind::parse(kind.as_str()).unwrap(), kind);
        }
        for status in [GroupStatus::Active, GroupStatus::Completed, GroupStatus::Paused] {
            assert_eq!(GroupStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(GroupKind::parse("pyramid").is_err());
    }
}
