//! Group membership: roles, payout positions, lifetime stats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{GroupId, Money, ParseLabelError, UserId};

/// A member's role within one group.
///
/// Exactly one chairperson per group is a governance concern enforced by
/// vote outcomes, not by this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Chairperson,
    Treasurer,
    Secretary,
    Member,
}

impl MemberRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chairperson => "chairperson",
            Self::Treasurer => "treasurer",
            Self::Secretary => "secretary",
            Self::Member => "member",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "chairperson" => Ok(Self::Chairperson),
            "treasurer" => Ok(Self::Treasurer),
            "secretary" => Ok(Self::Secretary),
            "member" => Ok(Self::Member),
            other => Err(ParseLabelError::new("member role", other)),
        }
    }

    /// Whether this role may move money (payouts, expenses).
    #[must_use]
    pub fn can_disburse(self) -> bool {
        matches!(self, Self::Chairperson | Self::Treasurer)
    }
}

/// Membership status. Members are soft-deleted by status change so that
/// payout-position history stays attributable for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Exited,
    Suspended,
}

impl MemberStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Exited => "exited",
            Self::Suspended => "suspended",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "active" => Ok(Self::Active),
            "exited" => Ok(Self::Exited),
            "suspended" => Ok(Self::Suspended),
            other => Err(ParseLabelError::new("member status", other)),
        }
    }
}

/// One user's membership of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub role: MemberRole,
    /// 1-based place in the payout rotation, assigned at join time and
    /// immutable once assigned.
    pub payout_position: u32,
    pub commitment_score: u8,
    pub total_on_time: u32,
    pub total_payments: u32,
    pub cycles_completed: u32,
    pub lifetime_contributed: Money,
    pub lifetime_received: Money,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disbursing_roles() {
        assert!(MemberRole::Chairperson.can_disburse());
        assert!(MemberRole::Treasurer.can_disburse());
        assert!(!MemberRole::Secretary.can_disburse());
        assert!(!MemberRole::Member.can_disburse());
    }

    #[test]
    fn labels_round_trip() {
        for role in [
            MemberRole::Chairperson,
            MemberRole::Treasurer,
            MemberRole::Secretary,
            MemberRole::Member,
        ] {
            assert_eq!(MemberRole::parse(role.as_str()).unwrap(), role);
        }
        assert!(MemberStatus::parse("ghost").is_err());
    }
}
