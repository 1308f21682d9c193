//! Per-group roster: joining, roles, payout positions, lifetime stats.

use chrono::Utc;
use rusqlite::TransactionBehavior;

use kasi_types::{
    DomainEvent, EventKind, Group, GroupId, GroupKind, GroupSpec, GroupStatus, Member, MemberRole,
    MemberStatus, Money, Round, UserId,
};

use crate::store::{
    active_member_count, format_timestamp, load_group, load_member, member_from_row,
    require_chairperson,
};
use crate::{Ledger, LedgerError};

impl Ledger {
    /// Create a group with the founder as chairperson at payout position 1.
    ///
    /// For rotating groups `total_rounds = max_members`: one round per
    /// member, each receives exactly one payout per cycle.
    pub fn create_group(
        &mut self,
        founder: UserId,
        spec: &GroupSpec,
    ) -> Result<Group, LedgerError> {
        if spec.name.trim().is_empty() {
            return Err(LedgerError::EmptyField("name"));
        }
        if spec.max_members == 0 {
            return Err(LedgerError::InvalidMaxMembers);
        }
        if spec.kind == GroupKind::Rotating && !spec.contribution_amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount);
        }

        let now = format_timestamp(Utc::now());
        let (current_round, total_rounds) = match spec.kind {
            GroupKind::Rotating => (Round::FIRST, spec.max_members),
            GroupKind::Goal => (Round::GOAL, 0),
        };

        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO groups (name, description, kind, contribution_amount, frequency,
                                 max_members, current_round, total_rounds, status, created_by,
                                 goal_target_monthly, recurring, goal_description,
                                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'active', ?9, ?10, ?11, ?12, ?13, ?13)",
            rusqlite::params![
                spec.name,
                spec.description,
                spec.kind.as_str(),
                spec.contribution_amount.minor(),
                spec.frequency.as_str(),
                i64::from(spec.max_members),
                i64::from(current_round.value()),
                i64::from(total_rounds),
                founder.value(),
                spec.goal_target_monthly.map(Money::minor),
                i64::from(spec.recurring),
                spec.goal_description,
                now,
            ],
        )?;
        let group_id = GroupId::new(tx.last_insert_rowid());

        tx.execute(
            "INSERT INTO members (group_id, user_id, role, payout_position, joined_at)
             VALUES (?1, ?2, 'chairperson', 1, ?3)",
            rusqlite::params![group_id.value(), founder.value(), now],
        )?;

        let group = load_group(&tx, group_id)?;
        tx.commit()?;
        Ok(group)
    }

    /// Join a group, taking the next payout position in line.
    ///
    /// A previously exited member re-joining reactivates the same identity
    /// (counters and history stay attributable) but is appended at the end
    /// of the rotation rather than reclaiming the old slot.
    pub fn join(&mut self, group_id: GroupId, user: UserId) -> Result<Member, LedgerError> {
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let group = load_group(&tx, group_id)?;
        if group.status != GroupStatus::Active {
            return Err(LedgerError::GroupInactive);
        }

        let existing = match load_member(&tx, group_id, user) {
            Ok(member) => Some(member),
            Err(LedgerError::MemberNotFound { .. }) => None,
            Err(other) => return Err(other),
        };
        if let Some(member) = &existing
            && member.status != MemberStatus::Exited
        {
            return Err(LedgerError::AlreadyMember);
        }

        let active = active_member_count(&tx, group_id)?;
        if active >= group.max_members {
            return Err(LedgerError::GroupFull { max: group.max_members });
        }
        // Positions stay unique even after exits leave gaps: append past the
        // highest position ever assigned, never refill a vacated slot. MAX
        // ranges over all rows so an exited member's position stays theirs.
        let highest: i64 = tx.query_row(
            "SELECT COALESCE(MAX(payout_position), 0) FROM members WHERE group_id = ?1",
            [group_id.value()],
            |row| row.get(0),
        )?;
        let position = highest as u32 + 1;

        if existing.is_some() {
            // Reactivation: same row, new position at the end of rotation,
            // demoted to plain member. Counters are untouched.
            tx.execute(
                "UPDATE members SET status = 'active', payout_position = ?3, role = 'member'
                 WHERE group_id = ?1 AND user_id = ?2",
                rusqlite::params![group_id.value(), user.value(), i64::from(position)],
            )?;
        } else {
            tx.execute(
                "INSERT INTO members (group_id, user_id, role, payout_position, joined_at)
                 VALUES (?1, ?2, 'member', ?3, ?4)",
                rusqlite::params![
                    group_id.value(),
                    user.value(),
                    i64::from(position),
                    format_timestamp(Utc::now()),
                ],
            )?;
        }

        let member = load_member(&tx, group_id, user)?;
        tx.commit()?;

        self.notify(DomainEvent::new(
            group_id,
            EventKind::MemberJoined,
            user,
            format!("joined at payout position {position}"),
        ));
        Ok(member)
    }

    /// Assign a role to a member. Chairperson only; single-chairperson
    /// discipline is a governance outcome, not enforced here.
    pub fn assign_role(
        &mut self,
        group_id: GroupId,
        actor: UserId,
        user: UserId,
        role: MemberRole,
    ) -> Result<Member, LedgerError> {
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        load_group(&tx, group_id)?;
        require_chairperson(&tx, group_id, actor)?;
        load_member(&tx, group_id, user)?;

        tx.execute(
            "UPDATE members SET role = ?3 WHERE group_id = ?1 AND user_id = ?2",
            rusqlite::params![group_id.value(), user.value(), role.as_str()],
        )?;
        let member = load_member(&tx, group_id, user)?;
        tx.commit()?;
        Ok(member)
    }

    /// Transition a member's status (suspend, exit, reinstate). Chairperson
    /// only. Soft-delete: the row and its payout history are preserved.
    pub fn set_member_status(
        &mut self,
        group_id: GroupId,
        actor: UserId,
        user: UserId,
        status: MemberStatus,
    ) -> Result<Member, LedgerError> {
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        load_group(&tx, group_id)?;
        require_chairperson(&tx, group_id, actor)?;
        load_member(&tx, group_id, user)?;

        tx.execute(
            "UPDATE members SET status = ?3 WHERE group_id = ?1 AND user_id = ?2",
            rusqlite::params![group_id.value(), user.value(), status.as_str()],
        )?;
        let member = load_member(&tx, group_id, user)?;
        tx.commit()?;
        Ok(member)
    }

    /// Transition a group's lifecycle status (pause, reactivate).
    /// Chairperson only. Groups are never hard-deleted.
    pub fn set_group_status(
        &mut self,
        group_id: GroupId,
        actor: UserId,
        status: GroupStatus,
    ) -> Result<Group, LedgerError> {
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        load_group(&tx, group_id)?;
        require_chairperson(&tx, group_id, actor)?;

        tx.execute(
            "UPDATE groups SET status = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![
                group_id.value(),
                status.as_str(),
                format_timestamp(Utc::now()),
            ],
        )?;
        let group = load_group(&tx, group_id)?;
        tx.commit()?;
        Ok(group)
    }

    /// Look up one membership.
    pub fn member(&self, group: GroupId, user: UserId) -> Result<Member, LedgerError> {
        load_member(&self.db, group, user)
    }

    /// Full roster ordered by payout position.
    pub fn roster(&self, group: GroupId) -> Result<Vec<Member>, LedgerError> {
        let mut stmt = self.db.prepare(
            "SELECT group_id, user_id, role, payout_position, commitment_score, total_on_time,
                    total_payments, cycles_completed, lifetime_contributed, lifetime_received,
                    status, joined_at
             FROM members WHERE group_id = ?1
             ORDER BY payout_position ASC",
        )?;
        let rows = stmt.query_map([group.value()], member_from_row)?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Number of active members in a group.
    pub fn active_members(&self, group: GroupId) -> Result<u32, LedgerError> {
        active_member_count(&self.db, group)
    }
}
