//! Rotating-stokvel ledger: contribution recording, funding checks, payout
//! execution, round advancement.
//!
//! Per-group state machine: `current_round` advances monotonically from 1
//! to `total_rounds`; round `r`'s designated recipient is the active member
//! holding payout position `r`. Every operation here is one immediate
//! SQLite transaction, so a payout can never interleave with a mid-flight
//! contribution for the same round, and two payout attempts for one round
//! collapse into one success and one `RecipientMismatch`.

use chrono::Utc;
use rusqlite::TransactionBehavior;

use kasi_types::{
    DomainEvent, EventKind, GroupId, GroupKind, GroupStatus, MemberStatus, Money, Round,
    Timeliness, Transaction, TransactionId, UserId, commitment_score,
};

use crate::store::{
    active_member_count, format_timestamp, is_unique_violation, load_group, load_member,
    require_disburser, transaction_from_row,
};
use crate::{Ledger, LedgerError};

impl Ledger {
    /// Record one member's contribution for the current round.
    ///
    /// The amount is fixed per round (`WrongAmount` otherwise) and the
    /// round must be the group's current one: no paying into past or
    /// future rounds. Timeliness is classified by the caller; the due-date
    /// policy is pluggable and lives outside the ledger.
    pub fn record_contribution(
        &mut self,
        group_id: GroupId,
        user: UserId,
        amount: Money,
        round: Round,
        timeliness: Timeliness,
        note: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount);
        }

        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let group = load_group(&tx, group_id)?;
        if group.kind != GroupKind::Rotating {
            return Err(LedgerError::NotRotating);
        }
        if group.status != GroupStatus::Active {
            return Err(LedgerError::GroupInactive);
        }
        if amount != group.contribution_amount {
            return Err(LedgerError::WrongAmount {
                expected: group.contribution_amount,
                got: amount,
            });
        }
        if round != group.current_round {
            return Err(LedgerError::WrongRound {
                current: group.current_round,
                got: round,
            });
        }

        let member = load_member(&tx, group_id, user)?;
        if member.status != MemberStatus::Active {
            return Err(LedgerError::NotActiveMember);
        }

        let already: i64 = tx.query_row(
            "SELECT COUNT(*) FROM transactions
             WHERE group_id = ?1 AND member_id = ?2 AND round = ?3
               AND tx_type = 'contribution' AND status = 'completed'",
            rusqlite::params![group_id.value(), user.value(), i64::from(round.value())],
            |row| row.get(0),
        )?;
        if already > 0 {
            return Err(LedgerError::AlreadyContributed { round });
        }

        let now = Utc::now();
        // The partial UNIQUE index catches the race where another writer
        // landed the same (member, round) between the check and this insert.
        tx.execute(
            "INSERT INTO transactions (group_id, member_id, amount, tx_type, status, round,
                                       note, created_at)
             VALUES (?1, ?2, ?3, 'contribution', 'completed', ?4, ?5, ?6)",
            rusqlite::params![
                group_id.value(),
                user.value(),
                amount.minor(),
                i64::from(round.value()),
                note,
                format_timestamp(now),
            ],
        )
        .map_err(|err| {
            if is_unique_violation(&err) {
                LedgerError::AlreadyContributed { round }
            } else {
                LedgerError::Storage(err)
            }
        })?;
        let tx_id = TransactionId::new(tx.last_insert_rowid());

        // Counters are monotonic; the score is always recomputed from them,
        // never drifted incrementally.
        let total_payments = member.total_payments + 1;
        let total_on_time =
            member.total_on_time + u32::from(matches!(timeliness, Timeliness::OnTime));
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

        // Pool update stays inside this transaction: concurrent contributors
        // both land, neither overwrites the other's read.
        tx.execute(
            "UPDATE groups SET total_pool = total_pool + ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![group_id.value(), amount.minor(), format_timestamp(now)],
        )?;

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
            format!("{amount} contributed for round {round}"),
        ));
        Ok(recorded)
    }

    /// Pay the pooled contributions out to the current round's recipient
    /// and advance the rotation.
    ///
    /// Requires a disbursing role (chairperson or treasurer) and full
    /// funding: every active member must have a completed contribution for
    /// the current round. After the final round the group transitions to
    /// `Completed`.
    pub fn process_payout(
        &mut self,
        group_id: GroupId,
        actor: UserId,
        recipient: UserId,
    ) -> Result<Transaction, LedgerError> {
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let group = load_group(&tx, group_id)?;
        if group.kind != GroupKind::Rotating {
            return Err(LedgerError::NotRotating);
        }
        match group.status {
            GroupStatus::Active => {}
            GroupStatus::Completed => return Err(LedgerError::RotationComplete),
            GroupStatus::Paused => return Err(LedgerError::GroupInactive),
        }

        require_disburser(&tx, group_id, actor)?;

        let member = load_member(&tx, group_id, recipient)?;
        if member.status != MemberStatus::Active
            || member.payout_position != group.current_round.value()
        {
            return Err(LedgerError::RecipientMismatch {
                position: member.payout_position,
                current_round: group.current_round,
            });
        }

        let required = active_member_count(&tx, group_id)?;
        let paid: i64 = tx.query_row(
            "SELECT COUNT(*) FROM transactions t
             JOIN members m ON m.group_id = t.group_id AND m.user_id = t.member_id
             WHERE t.group_id = ?1 AND t.round = ?2
               AND t.tx_type = 'contribution' AND t.status = 'completed'
               AND m.status = 'active'",
            rusqlite::params![group_id.value(), i64::from(group.current_round.value())],
            |row| row.get(0),
        )?;
        let paid = paid as u32;
        if paid < required {
            return Err(LedgerError::NotFullyFunded { paid, required });
        }

        let amount = group
            .contribution_amount
            .checked_mul(required)
            .ok_or(LedgerError::BalanceOverflow)?;
        let now = Utc::now();
        tx.execute(
            "INSERT INTO transactions (group_id, member_id, amount, tx_type, status, round,
                                       note, created_at)
             VALUES (?1, ?2, ?3, 'payout', 'completed', ?4, NULL, ?5)",
            rusqlite::params![
                group_id.value(),
                recipient.value(),
                amount.minor(),
                i64::from(group.current_round.value()),
                format_timestamp(now),
            ],
        )
        .map_err(|err| {
            // A racing payout for the same round hit the UNIQUE index first.
            if is_unique_violation(&err) {
                LedgerError::RecipientMismatch {
                    position: member.payout_position,
                    current_round: group.current_round,
                }
            } else {
                LedgerError::Storage(err)
            }
        })?;
        let tx_id = TransactionId::new(tx.last_insert_rowid());

        let received = member
            .lifetime_received
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow)?;
        tx.execute(
            "UPDATE members SET lifetime_received = ?3, cycles_completed = cycles_completed + 1
             WHERE group_id = ?1 AND user_id = ?2",
            rusqlite::params![group_id.value(), recipient.value(), received.minor()],
        )?;

        let next_round = group.current_round.next();
        let next_status = if next_round.value() > group.total_rounds {
            GroupStatus::Completed
        } else {
            GroupStatus::Active
        };
        tx.execute(
            "UPDATE groups SET current_round = ?2, total_pool = total_pool - ?3, status = ?4,
                               updated_at = ?5
             WHERE id = ?1",
            rusqlite::params![
                group_id.value(),
                i64::from(next_round.value()),
                amount.minor(),
                next_status.as_str(),
                format_timestamp(now),
            ],
        )?;

        let payout = tx.query_row(
            "SELECT id, group_id, member_id, amount, tx_type, status, round, note, created_at
             FROM transactions WHERE id = ?1",
            [tx_id.value()],
            transaction_from_row,
        )?;
        tx.commit()?;

        self.notify(DomainEvent::new(
            group_id,
            EventKind::PayoutProcessed,
            actor,
            format!("{amount} paid out for round {}", group.current_round),
        ));
        Ok(payout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kasi_types::{Frequency, GroupSpec, TransactionStatus, TransactionType};

    fn three_member_group(ledger: &mut Ledger) -> GroupId {
        let spec =
            GroupSpec::rotating("Ubuntu Savers", Money::from_major(100), Frequency::Monthly, 3);
        let group = ledger.create_group(UserId::new(1), &spec).expect("create");
        ledger.join(group.id, UserId::new(2)).expect("join");
        ledger.join(group.id, UserId::new(3)).expect("join");
        group.id
    }

    fn contribute_all(ledger: &mut Ledger, group: GroupId, round: Round) {
        for user in [1, 2, 3] {
            ledger
                .record_contribution(
                    group,
                    UserId::new(user),
                    Money::from_major(100),
                    round,
                    Timeliness::OnTime,
                    None,
                )
                .expect("contribute");
        }
    }

    #[test]
    fn contribution_updates_member_and_pool() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);

        let recorded = ledger
            .record_contribution(
                group,
                UserId::new(2),
                Money::from_major(100),
                Round::FIRST,
                Timeliness::OnTime,
                Some("first month"),
            )
            .expect("contribute");
        assert_eq!(recorded.tx_type, TransactionType::Contribution);
        assert_eq!(recorded.status, TransactionStatus::Completed);
        assert_eq!(recorded.round, Round::FIRST);

        let member = ledger.member(group, UserId::new(2)).expect("member");
        assert_eq!(member.total_payments, 1);
        assert_eq!(member.total_on_time, 1);
        assert_eq!(member.commitment_score, 100);
        assert_eq!(member.lifetime_contributed, Money::from_major(100));

        assert_eq!(ledger.group(group).expect("group").total_pool, Money::from_major(100));
    }

    #[test]
    fn late_contribution_lowers_score() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);

        ledger
            .record_contribution(
                group,
                UserId::new(2),
                Money::from_major(100),
                Round::FIRST,
                Timeliness::Late,
                None,
            )
            .expect("contribute");

        let member = ledger.member(group, UserId::new(2)).expect("member");
        assert_eq!(member.total_payments, 1);
        assert_eq!(member.total_on_time, 0);
        assert_eq!(member.commitment_score, 0);
    }

    #[test]
    fn wrong_amount_and_wrong_round_are_rejected() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);

        let err = ledger
            .record_contribution(
                group,
                UserId::new(2),
                Money::from_major(50),
                Round::FIRST,
                Timeliness::OnTime,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::WrongAmount { .. }));

        let err = ledger
            .record_contribution(
                group,
                UserId::new(2),
                Money::from_major(100),
                Round::new(2),
                Timeliness::OnTime,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::WrongRound { .. }));

        // Nothing was recorded on either error path.
        assert_eq!(ledger.group(group).expect("group").total_pool, Money::ZERO);
        assert!(ledger.transactions(group, None).expect("txs").is_empty());
    }

    #[test]
    fn duplicate_contribution_is_rejected_not_double_counted() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);

        ledger
            .record_contribution(
                group,
                UserId::new(2),
                Money::from_major(100),
                Round::FIRST,
                Timeliness::OnTime,
                None,
            )
            .expect("contribute");
        let err = ledger
            .record_contribution(
                group,
                UserId::new(2),
                Money::from_major(100),
                Round::FIRST,
                Timeliness::OnTime,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyContributed { round } if round == Round::FIRST));

        let member = ledger.member(group, UserId::new(2)).expect("member");
        assert_eq!(member.total_payments, 1);
        assert_eq!(ledger.group(group).expect("group").total_pool, Money::from_major(100));
    }

    #[test]
    fn payout_requires_full_funding() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);

        ledger
            .record_contribution(
                group,
                UserId::new(1),
                Money::from_major(100),
                Round::FIRST,
                Timeliness::OnTime,
                None,
            )
            .expect("contribute");

        let err = ledger
            .process_payout(group, UserId::new(1), UserId::new(1))
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFullyFunded { paid: 1, required: 3 }));
    }

    #[test]
    fn payout_requires_disbursing_role() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);
        contribute_all(&mut ledger, group, Round::FIRST);

        let err = ledger
            .process_payout(group, UserId::new(3), UserId::new(1))
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotPermitted));

        // Treasurer qualifies once appointed.
        ledger
            .assign_role(group, UserId::new(1), UserId::new(3), kasi_types::MemberRole::Treasurer)
            .expect("assign");
        ledger
            .process_payout(group, UserId::new(3), UserId::new(1))
            .expect("payout");
    }

    #[test]
    fn payout_pays_pool_and_advances_round() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);
        contribute_all(&mut ledger, group, Round::FIRST);
        assert_eq!(ledger.group(group).expect("group").total_pool, Money::from_major(300));

        let payout = ledger
            .process_payout(group, UserId::new(1), UserId::new(1))
            .expect("payout");
        assert_eq!(payout.amount, Money::from_major(300));
        assert_eq!(payout.tx_type, TransactionType::Payout);

        let refreshed = ledger.group(group).expect("group");
        assert_eq!(refreshed.current_round, Round::new(2));
        assert_eq!(refreshed.total_pool, Money::ZERO);

        let recipient = ledger.member(group, UserId::new(1)).expect("member");
        assert_eq!(recipient.lifetime_received, Money::from_major(300));
        assert_eq!(recipient.cycles_completed, 1);
    }

    #[test]
    fn repeated_payout_fails_with_recipient_mismatch() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);
        contribute_all(&mut ledger, group, Round::FIRST);

        ledger
            .process_payout(group, UserId::new(1), UserId::new(1))
            .expect("payout");
        // Stale retry against the advanced round.
        let err = ledger
            .process_payout(group, UserId::new(1), UserId::new(1))
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::RecipientMismatch { position: 1, current_round } if current_round == Round::new(2)
        ));
    }

    #[test]
    fn full_cycle_completes_the_group() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);

        for round in 1..=3u32 {
            contribute_all(&mut ledger, group, Round::new(round));
            ledger
                .process_payout(group, UserId::new(1), UserId::new(round as i64))
                .expect("payout");
        }

        let finished = ledger.group(group).expect("group");
        assert_eq!(finished.status, GroupStatus::Completed);
        assert_eq!(finished.total_pool, Money::ZERO);

        // A completed group accepts no further contributions.
        let err = ledger
            .record_contribution(
                group,
                UserId::new(1),
                Money::from_major(100),
                Round::new(4),
                Timeliness::OnTime,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::GroupInactive));

        let err = ledger
            .process_payout(group, UserId::new(1), UserId::new(1))
            .unwrap_err();
        assert!(matches!(err, LedgerError::RotationComplete));
    }

    #[test]
    fn pool_equals_contributions_minus_payouts() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);

        contribute_all(&mut ledger, group, Round::FIRST);
        ledger
            .process_payout(group, UserId::new(1), UserId::new(1))
            .expect("payout");
        contribute_all(&mut ledger, group, Round::new(2));

        let txs = ledger.transactions(group, None).expect("txs");
        let contributed: Money = txs
            .iter()
            .filter(|t| t.tx_type == TransactionType::Contribution)
            .map(|t| t.amount)
            .sum();
        let paid_out: Money = txs
            .iter()
            .filter(|t| t.tx_type == TransactionType::Payout)
            .map(|t| t.amount)
            .sum();
        let pool = ledger.group(group).expect("group").total_pool;
        assert_eq!(pool, contributed.checked_sub(paid_out).expect("no overflow"));
        assert_eq!(pool, Money::from_major(300));
    }

    #[test]
    fn at_most_one_payout_per_round() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);
        contribute_all(&mut ledger, group, Round::FIRST);
        ledger
            .process_payout(group, UserId::new(1), UserId::new(1))
            .expect("payout");
        let _ = ledger.process_payout(group, UserId::new(1), UserId::new(1));

        let round_one = ledger.transactions(group, Some(Round::FIRST)).expect("txs");
        let payouts = round_one
            .iter()
            .filter(|t| t.tx_type == TransactionType::Payout)
            .count();
        assert_eq!(payouts, 1);
    }

    #[test]
    fn suspended_member_cannot_contribute() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = three_member_group(&mut ledger);
        ledger
            .set_member_status(
                group,
                UserId::new(1),
                UserId::new(3),
                kasi_types::MemberStatus::Suspended,
            )
            .expect("suspend");

        let err = ledger
            .record_contribution(
                group,
                UserId::new(3),
                Money::from_major(100),
                Round::FIRST,
                Timeliness::OnTime,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotActiveMember));
    }
}
