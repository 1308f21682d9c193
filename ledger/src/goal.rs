//! Goal-fund ledger: flexible contributions, expense tracking, derived
//! balances. No rotation, no rounds, no fixed amounts.
//!
//! The pool balance for a goal group is always *derived* as
//! `sum(completed contributions) - sum(expenses)`. The `total_pool` column
//! is a cache that every write re-derives inside its own transaction, so
//! the two can never diverge; `goal_balance` reads the derived sum, never
//! the cache.

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, TransactionBehavior};

use kasi_types::{
    DomainEvent, EventKind, Expense, ExpenseId, GroupId, GroupKind, GroupStatus, MemberStatus,
    Money, Transaction, TransactionId, UserId, commitment_score,
};

use crate::store::{
    expense_from_row, format_date, format_timestamp, load_group, load_member, require_disburser,
    transaction_from_row,
};
use crate::{Ledger, LedgerError};

/// Balance from the append-only logs. The sole source of truth.
fn derived_balance(conn: &Connection, group: GroupId) -> Result<Money, LedgerError> {
    let contributed: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM transactions
         WHERE group_id = ?1 AND tx_type = 'contribution' AND status = 'completed'",
        [group.value()],
        |row| row.get(0),
    )?;
    let spent: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM expenses WHERE group_id = ?1",
        [group.value()],
        |row| row.get(0),
    )?;
    Money::from_minor(contributed)
        .checked_sub(Money::from_minor(spent))
        .ok_or(LedgerError::BalanceOverflow)
}

/// Refresh the cached `total_pool` from the derived sum.
fn refresh_pool(conn: &Connection, group: GroupId, now_ts: &str) -> Result<Money, LedgerError> {
    let balance = derived_balance(conn, group)?;
    conn.execute(
        "UPDATE groups SET total_pool = ?2, updated_at = ?3 WHERE id = ?1",
        rusqlite::params![group.value(), balance.minor(), now_ts],
    )?;
    Ok(balance)
}

impl Ledger {
    /// Record a goal-fund contribution of any positive amount.
    ///
    /// No round or funding checks apply; lifetime stats and the commitment
    /// score update exactly as for rotating contributions.
    pub fn record_goal_contribution(
        &mut self,
        group_id: GroupId,
        user: UserId,
        amount: Money,
        note: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount);
        }

        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let group = load_group(&tx, group_id)?;
        if group.kind != GroupKind::Goal {
            return Err(LedgerError::NotGoal);
        }
        if group.status != GroupStatus::Active {
            return Err(LedgerError::GroupInactive);
        }

        let member = load_member(&tx, group_id, user)?;
        if member.status != MemberStatus::Active {
            return Err(LedgerError::NotActiveMember);
        }

        let now = Utc::now();
        let now_ts = format_timestamp(now);
        tx.execute(
            "INSERT INTO transactions (group_id, member_id, amount, tx_type, status, round,
                                       note, created_at)
             VALUES (?1, ?2, ?3, 'contribution', 'completed', 0, ?4, ?5)",
            rusqlite::params![group_id.value(), user.value(), amount.minor(), note, now_ts],
        )?;
        let tx_id = TransactionId::new(tx.last_insert_rowid());

        let total_payments = member.total_payments + 1;
        let total_on_time = member.total_on_time + 1;
        let score = commitment_score(total_on_time, total_payments);
        let lifetime = member
            .lifetime_contributed
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow)?;
        tx.execute(
            "UPDATE members SET total_payments = ?3, total_on_time = ?4, commitment_score = ?5,
                                lifetime_contributed = ?6
             WHERE group_id = ?1 AND user_id = ?2",
            rusqlite::params![
                group_id.value(),
                user.value(),
                i64::from(total_payments),
                i64::from(total_on_time),
                i64::from(score),
                lifetime.minor(),
            ],
        )?;

        refresh_pool(&tx, group_id, &now_ts)?;

        let recorded = tx.query_row(
            "SELECT id, group_id, member_id, amount, tx_type, status, round, note, created_at
             FROM transactions WHERE id = ?1",
            [tx_id.value()],
            transaction_from_row,
        )?;
        tx.commit()?;

        self.notify(DomainEvent::new(
            group_id,
            EventKind::ContributionRecorded,
            user,
            format!("{amount} contributed to the goal fund"),
        ));
        Ok(recorded)
    }

    /// Record spending against the goal fund. Chairperson or treasurer only.
    ///
    /// Expenses never touch the transaction log; the balance drops because
    /// the derived sum does.
    pub fn record_expense(
        &mut self,
        group_id: GroupId,
        actor: UserId,
        description: &str,
        amount: Money,
        incurred_on: NaiveDate,
    ) -> Result<Expense, LedgerError> {
        if description.trim().is_empty() {
            return Err(LedgerError::EmptyField("description"));
        }
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount);
        }

        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let group = load_group(&tx, group_id)?;
        if group.kind != GroupKind::Goal {
            return Err(LedgerError::NotGoal);
        }
        if group.status != GroupStatus::Active {
            return Err(LedgerError::GroupInactive);
        }
        require_disburser(&tx, group_id, actor)?;

        let now = Utc::now();
        let now_ts = format_timestamp(now);
        tx.execute(
            "INSERT INTO expenses (group_id, description, amount, incurred_on, recorded_by,
                                   created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                group_id.value(),
                description,
                amount.minor(),
                format_date(incurred_on),
                actor.value(),
                now_ts,
            ],
        )?;
        let expense_id = ExpenseId::new(tx.last_insert_rowid());

        refresh_pool(&tx, group_id, &now_ts)?;

        let recorded = tx.query_row(
            "SELECT id, group_id, description, amount, incurred_on, recorded_by, created_at
             FROM expenses WHERE id = ?1",
            [expense_id.value()],
            expense_from_row,
        )?;
        tx.commit()?;

        self.notify(DomainEvent::new(
            group_id,
            EventKind::ExpenseRecorded,
            actor,
            format!("{amount} spent: {description}"),
        ));
        Ok(recorded)
    }

    /// The goal fund's balance, always computed from the append-only logs.
    pub fn goal_balance(&self, group_id: GroupId) -> Result<Money, LedgerError> {
        let group = load_group(&self.db, group_id)?;
        if group.kind != GroupKind::Goal {
            return Err(LedgerError::NotGoal);
        }
        derived_balance(&self.db, group_id)
    }

    /// All expenses for a group, newest first.
    pub fn expenses(&self, group: GroupId) -> Result<Vec<Expense>, LedgerError> {
        let mut stmt = self.db.prepare(
            "SELECT id, group_id, description, amount, incurred_on, recorded_by, created_at
             FROM expenses
             WHERE group_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([group.value()], expense_from_row)?;
        let mut expenses = Vec::new();
        for row in rows {
            expenses.push(row?);
        }
        Ok(expenses)
    }
}
