//! Append-only money-movement records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExpenseId, GroupId, Money, ParseLabelError, Round, TransactionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Contribution,
    Payout,
    Penalty,
    Settlement,
}

impl TransactionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contribution => "contribution",
            Self::Payout => "payout",
            Self::Penalty => "penalty",
            Self::Settlement => "settlement",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "contribution" => Ok(Self::Contribution),
            "payout" => Ok(Self::Payout),
            "penalty" => Ok(Self::Penalty),
            "settlement" => Ok(Self::Settlement),
            other => Err(ParseLabelError::new("transaction type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Pending,
    Late,
    Missed,
}

impl TransactionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Pending => "pending",
            Self::Late => "late",
            Self::Missed => "missed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ParseLabelError> {
        match value {
            "completed" => Ok(Self::Completed),
            "pending" => Ok(Self::Pending),
            "late" => Ok(Self::Late),
            "missed" => Ok(Self::Missed),
            other => Err(ParseLabelError::new("transaction status", other)),
        }
    }
}

/// Caller-supplied timeliness classification for a contribution.
///
/// The due-date policy lives outside the ledger (reminder scheduling,
/// grace periods); the ledger only records the verdict and feeds it into
/// the commitment-score counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeliness {
    OnTime,
    Late,
}

/// An immutable ledger entry. Once written, never edited or deleted; the
/// transaction log is the single source of truth for money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub group_id: GroupId,
    pub member_id: UserId,
    pub amount: Money,
    pub tx_type: TransactionType,
    pub status: TransactionStatus,
    /// Rotation round, or `Round::GOAL` for goal-fund entries.
    pub round: Round,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A goal-fund expense. Append-only; never reduces the transaction log,
/// only the derived balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub group_id: GroupId,
    pub description: String,
    pub amount: Money,
    pub incurred_on: NaiveDate,
    pub recorded_by: UserId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for tx_type in [
            TransactionType::Contribution,
            TransactionType::Payout,
            TransactionType::Penalty,
            TransactionType::Settlement,
        ] {
            assert_eq!(TransactionType::parse(tx_type.as_str()).unwrap(), tx_type);
        }
        for status in [
            TransactionStatus::Completed,
            TransactionStatus::Pending,
            TransactionStatus::Late,
            TransactionStatus::Missed,
        ] {
            assert_eq!(TransactionStatus::parse(status.as_str()).unwrap(), status);
        }
    }
}
