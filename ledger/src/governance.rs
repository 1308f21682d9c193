//! Governance ledger: constitution rules, acceptances, votes.
//!
//! Vote lifecycle is an explicit state machine. Tallying is a read-time
//! count over the cast rows (never cached); resolving a vote to passed or
//! rejected is a separate chairperson action. Expiry is lazy: mutating
//! operations that find `now > expires_at` persist the `expired` state,
//! reads merely report it.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};

use kasi_types::{
    ConstitutionRule, DomainEvent, EventKind, GroupId, MemberStatus, RuleAcceptance, RuleId, Tally,
    UserId, Vote, VoteCast, VoteId, VoteOutcome, VoteStatus, VoteType, VoteValue,
};

use crate::store::{
    format_timestamp, label_col, load_group, load_member, require_chairperson, rule_from_row,
    timestamp_col, vote_from_row,
};
use crate::{Ledger, LedgerError};

fn load_vote(conn: &Connection, id: VoteId) -> Result<Vote, LedgerError> {
    use rusqlite::OptionalExtension;

    conn.query_row(
        "SELECT id, group_id, title, description, proposed_by, vote_type, status, expires_at,
                created_at
         FROM votes WHERE id = ?1",
        [id.value()],
        vote_from_row,
    )
    .optional()?
    .ok_or(LedgerError::VoteNotFound(id))
}

fn count_casts(conn: &Connection, vote: VoteId) -> Result<Tally, LedgerError> {
    let (for_votes, against_votes): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(value = 'for'), 0), COALESCE(SUM(value = 'against'), 0)
         FROM vote_casts WHERE vote_id = ?1",
        [vote.value()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(Tally {
        for_votes: for_votes as u32,
        against_votes: against_votes as u32,
    })
}

/// Persist the lazy `active -> expired` transition.
fn mark_expired(conn: &Connection, vote: VoteId) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE votes SET status = 'expired' WHERE id = ?1",
        [vote.value()],
    )?;
    Ok(())
}

impl Ledger {
    /// Append a constitution rule at the next order index. Chairperson only.
    pub fn add_rule(
        &mut self,
        group_id: GroupId,
        actor: UserId,
        title: &str,
        description: &str,
    ) -> Result<ConstitutionRule, LedgerError> {
        if title.trim().is_empty() {
            return Err(LedgerError::EmptyField("title"));
        }

        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        load_group(&tx, group_id)?;
        require_chairperson(&tx, group_id, actor)?;

        let next_order: i64 = tx.query_row(
            "SELECT COALESCE(MAX(rule_order), 0) + 1 FROM constitution_rules WHERE group_id = ?1",
            [group_id.value()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO constitution_rules (group_id, title, description, rule_order, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                group_id.value(),
                title,
                description,
                next_order,
                format_timestamp(Utc::now()),
            ],
        )?;
        let rule_id = RuleId::new(tx.last_insert_rowid());

        let rule = tx.query_row(
            "SELECT id, group_id, title, description, rule_order, created_at
             FROM constitution_rules WHERE id = ?1",
            [rule_id.value()],
            rule_from_row,
        )?;
        tx.commit()?;
        Ok(rule)
    }

    /// Sign a constitution rule. Idempotent: re-accepting is a no-op, not
    /// an error. Returns whether a new acceptance was recorded.
    pub fn accept_rule(&mut self, rule_id: RuleId, user: UserId) -> Result<bool, LedgerError> {
        use rusqlite::OptionalExtension;

        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let group_id: Option<i64> = tx
            .query_row(
                "SELECT group_id FROM constitution_rules WHERE id = ?1",
                [rule_id.value()],
                |row| row.get(0),
            )
            .optional()?;
        let group_id = GroupId::new(group_id.ok_or(LedgerError::RuleNotFound(rule_id))?);

        let member = load_member(&tx, group_id, user)?;
        if member.status != MemberStatus::Active {
            return Err(LedgerError::NotActiveMember);
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO rule_acceptances (rule_id, user_id, accepted_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![rule_id.value(), user.value(), format_timestamp(Utc::now())],
        )?;
        tx.commit()?;

        let newly_accepted = inserted > 0;
        if newly_accepted {
            self.notify(DomainEvent::new(
                group_id,
                EventKind::RuleAccepted,
                user,
                format!("accepted constitution rule {rule_id}"),
            ));
        }
        Ok(newly_accepted)
    }

    /// Constitution rules in order.
    pub fn rules(&self, group: GroupId) -> Result<Vec<ConstitutionRule>, LedgerError> {
        let mut stmt = self.db.prepare(
            "SELECT id, group_id, title, description, rule_order, created_at
             FROM constitution_rules
             WHERE group_id = ?1
             ORDER BY rule_order ASC",
        )?;
        let rows = stmt.query_map([group.value()], rule_from_row)?;
        let mut rules = Vec::new();
        for row in rows {
            rules.push(row?);
        }
        Ok(rules)
    }

    /// Who has signed a rule, and when, oldest signature first.
    pub fn rule_acceptances(&self, rule: RuleId) -> Result<Vec<RuleAcceptance>, LedgerError> {
        let mut stmt = self.db.prepare(
            "SELECT rule_id, user_id, accepted_at FROM rule_acceptances
             WHERE rule_id = ?1
             ORDER BY accepted_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map([rule.value()], |row| {
            Ok(RuleAcceptance {
                rule_id: RuleId::new(row.get(0)?),
                user_id: UserId::new(row.get(1)?),
                accepted_at: timestamp_col(row, 2)?,
            })
        })?;
        let mut acceptances = Vec::new();
        for row in rows {
            acceptances.push(row?);
        }
        Ok(acceptances)
    }

    /// Put a proposal to the group. Any active member may propose.
    pub fn create_vote(
        &mut self,
        group_id: GroupId,
        proposer: UserId,
        title: &str,
        description: &str,
        vote_type: VoteType,
        expires_at: DateTime<Utc>,
    ) -> Result<Vote, LedgerError> {
        if title.trim().is_empty() {
            return Err(LedgerError::EmptyField("title"));
        }

        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        load_group(&tx, group_id)?;
        let member = load_member(&tx, group_id, proposer)?;
        if member.status != MemberStatus::Active {
            return Err(LedgerError::NotActiveMember);
        }

        tx.execute(
            "INSERT INTO votes (group_id, title, description, proposed_by, vote_type, status,
                                expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?7)",
            rusqlite::params![
                group_id.value(),
                title,
                description,
                proposer.value(),
                vote_type.as_str(),
                format_timestamp(expires_at),
                format_timestamp(Utc::now()),
            ],
        )?;
        let vote_id = VoteId::new(tx.last_insert_rowid());
        let vote = load_vote(&tx, vote_id)?;
        tx.commit()?;

        self.notify(DomainEvent::new(
            group_id,
            EventKind::VoteOpened,
            proposer,
            format!("opened vote: {title}"),
        ));
        Ok(vote)
    }

    /// Cast or change a ballot. Upsert: re-casting before expiry overwrites
    /// the prior value; only one cast per user counts.
    pub fn cast_vote(
        &mut self,
        vote_id: VoteId,
        user: UserId,
        value: VoteValue,
    ) -> Result<(), LedgerError> {
        let now = Utc::now();
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let vote = load_vote(&tx, vote_id)?;
        if vote.status != VoteStatus::Active {
            return Err(LedgerError::VoteClosed);
        }
        if now > vote.expires_at {
            mark_expired(&tx, vote_id)?;
            tx.commit()?;
            return Err(LedgerError::VoteExpired { expires_at: vote.expires_at });
        }

        let member = load_member(&tx, vote.group_id, user)?;
        if member.status != MemberStatus::Active {
            return Err(LedgerError::NotActiveMember);
        }

        tx.execute(
            "INSERT INTO vote_casts (vote_id, user_id, value, cast_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(vote_id, user_id)
             DO UPDATE SET value = excluded.value, cast_at = excluded.cast_at",
            rusqlite::params![
                vote_id.value(),
                user.value(),
                value.as_str(),
                format_timestamp(now),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Read-time tally of a vote: simple majority of votes cast, not of
    /// total membership. Computed on demand, never cached.
    pub fn tally(&self, vote_id: VoteId) -> Result<Tally, LedgerError> {
        load_vote(&self.db, vote_id)?;
        count_casts(&self.db, vote_id)
    }

    /// The individual ballots behind a tally, oldest first.
    pub fn casts(&self, vote_id: VoteId) -> Result<Vec<VoteCast>, LedgerError> {
        load_vote(&self.db, vote_id)?;
        let mut stmt = self.db.prepare(
            "SELECT vote_id, user_id, value, cast_at FROM vote_casts
             WHERE vote_id = ?1
             ORDER BY cast_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map([vote_id.value()], |row| {
            Ok(VoteCast {
                vote_id: VoteId::new(row.get(0)?),
                user_id: UserId::new(row.get(1)?),
                value: label_col(row, 2, VoteValue::parse)?,
                cast_at: timestamp_col(row, 3)?,
            })
        })?;
        let mut casts = Vec::new();
        for row in rows {
            casts.push(row?);
        }
        Ok(casts)
    }

    /// Resolve an active vote to passed or rejected per its tally.
    /// Chairperson only; distinct from display-time tallying.
    pub fn resolve_vote(
        &mut self,
        vote_id: VoteId,
        actor: UserId,
    ) -> Result<(VoteStatus, Tally), LedgerError> {
        let now = Utc::now();
        let tx = self.db.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let vote = load_vote(&tx, vote_id)?;
        require_chairperson(&tx, vote.group_id, actor)?;
        if vote.status != VoteStatus::Active {
            return Err(LedgerError::VoteClosed);
        }
        if now > vote.expires_at {
            mark_expired(&tx, vote_id)?;
            tx.commit()?;
            return Err(LedgerError::VoteExpired { expires_at: vote.expires_at });
        }

        let tally = count_casts(&tx, vote_id)?;
        let status = match tally.outcome() {
            VoteOutcome::Passed => VoteStatus::Passed,
            VoteOutcome::Rejected => VoteStatus::Rejected,
        };
        tx.execute(
            "UPDATE votes SET status = ?2 WHERE id = ?1",
            rusqlite::params![vote_id.value(), status.as_str()],
        )?;
        tx.commit()?;
        Ok((status, tally))
    }

    /// All votes for a group, newest first, each with its live tally.
    ///
    /// Reads never write: a vote past its expiry is *reported* as expired
    /// here, and persisted as such by the next mutating operation that
    /// touches it.
    pub fn votes(&self, group: GroupId) -> Result<Vec<(Vote, Tally)>, LedgerError> {
        let now = Utc::now();
        let mut stmt = self.db.prepare(
            "SELECT id, group_id, title, description, proposed_by, vote_type, status, expires_at,
                    created_at
             FROM votes
             WHERE group_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([group.value()], vote_from_row)?;

        let mut votes = Vec::new();
        for row in rows {
            let mut vote = row?;
            if vote.status == VoteStatus::Active && now > vote.expires_at {
                vote.status = VoteStatus::Expired;
            }
            let tally = count_casts(&self.db, vote.id)?;
            votes.push((vote, tally));
        }
        Ok(votes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use kasi_types::{Frequency, GroupSpec, Money};

    fn group_of_three(ledger: &mut Ledger) -> GroupId {
        let spec =
            GroupSpec::rotating("Ubuntu Savers", Money::from_major(100), Frequency::Monthly, 5);
        let group = ledger.create_group(UserId::new(1), &spec).expect("create");
        ledger.join(group.id, UserId::new(2)).expect("join");
        ledger.join(group.id, UserId::new(3)).expect("join");
        group.id
    }

    fn open_vote(ledger: &mut Ledger, group: GroupId) -> VoteId {
        ledger
            .create_vote(
                group,
                UserId::new(2),
                "Raise the monthly amount",
                "From R100 to R150 starting next cycle",
                VoteType::RuleChange,
                Utc::now() + Duration::days(7),
            )
            .expect("create vote")
            .id
    }

    #[test]
    fn rules_append_in_order() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);

        ledger
            .add_rule(group, UserId::new(1), "Meetings", "First Sunday of the month")
            .expect("add rule");
        ledger
            .add_rule(group, UserId::new(1), "Payments", "Due by the 25th")
            .expect("add rule");

        let rules = ledger.rules(group).expect("rules");
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].rule_order, 1);
        assert_eq!(rules[1].rule_order, 2);
        assert_eq!(rules[1].title, "Payments");
    }

    #[test]
    fn add_rule_is_chairperson_only() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);

        let err = ledger
            .add_rule(group, UserId::new(2), "Meetings", "")
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotPermitted));
    }

    #[test]
    fn rule_acceptance_is_idempotent() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);
        let rule = ledger
            .add_rule(group, UserId::new(1), "Meetings", "")
            .expect("add rule");

        assert!(ledger.accept_rule(rule.id, UserId::new(2)).expect("accept"));
        // Second acceptance: Ok, but nothing new recorded.
        assert!(!ledger.accept_rule(rule.id, UserId::new(2)).expect("re-accept"));

        let signers = ledger.rule_acceptances(rule.id).expect("acceptances");
        assert_eq!(signers.len(), 1);
        assert_eq!(signers[0].user_id, UserId::new(2));
    }

    #[test]
    fn accepting_a_missing_rule_is_not_found() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let _group = group_of_three(&mut ledger);
        let err = ledger.accept_rule(RuleId::new(99), UserId::new(2)).unwrap_err();
        assert!(matches!(err, LedgerError::RuleNotFound(_)));
    }

    #[test]
    fn majority_passes_on_resolution() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);
        let vote = open_vote(&mut ledger, group);

        ledger.cast_vote(vote, UserId::new(1), VoteValue::For).expect("cast");
        ledger.cast_vote(vote, UserId::new(2), VoteValue::For).expect("cast");
        ledger.cast_vote(vote, UserId::new(3), VoteValue::Against).expect("cast");

        let tally = ledger.tally(vote).expect("tally");
        assert_eq!(tally.for_votes, 2);
        assert_eq!(tally.against_votes, 1);

        let (status, tally) = ledger.resolve_vote(vote, UserId::new(1)).expect("resolve");
        assert_eq!(status, VoteStatus::Passed);
        assert_eq!(tally.for_votes, 2);
    }

    #[test]
    fn tie_rejects_on_resolution() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);
        let vote = open_vote(&mut ledger, group);

        ledger.cast_vote(vote, UserId::new(1), VoteValue::For).expect("cast");
        ledger.cast_vote(vote, UserId::new(2), VoteValue::Against).expect("cast");

        let (status, _) = ledger.resolve_vote(vote, UserId::new(1)).expect("resolve");
        assert_eq!(status, VoteStatus::Rejected);
    }

    #[test]
    fn recasting_overwrites_instead_of_double_counting() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);
        let vote = open_vote(&mut ledger, group);

        ledger.cast_vote(vote, UserId::new(2), VoteValue::For).expect("cast");
        ledger.cast_vote(vote, UserId::new(2), VoteValue::Against).expect("recast");

        let tally = ledger.tally(vote).expect("tally");
        assert_eq!(tally.for_votes, 0);
        assert_eq!(tally.against_votes, 1);

        let casts = ledger.casts(vote).expect("casts");
        assert_eq!(casts.len(), 1);
        assert_eq!(casts[0].value, VoteValue::Against);
    }

    #[test]
    fn resolved_vote_accepts_no_more_casts() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);
        let vote = open_vote(&mut ledger, group);

        ledger.cast_vote(vote, UserId::new(1), VoteValue::For).expect("cast");
        ledger.resolve_vote(vote, UserId::new(1)).expect("resolve");

        let err = ledger.cast_vote(vote, UserId::new(2), VoteValue::For).unwrap_err();
        assert!(matches!(err, LedgerError::VoteClosed));
        let err = ledger.resolve_vote(vote, UserId::new(1)).unwrap_err();
        assert!(matches!(err, LedgerError::VoteClosed));
    }

    #[test]
    fn expired_vote_rejects_casts_and_is_lazily_marked() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);
        let vote = ledger
            .create_vote(
                group,
                UserId::new(2),
                "Expired proposal",
                "",
                VoteType::General,
                Utc::now() - Duration::hours(1),
            )
            .expect("create vote")
            .id;

        // Read path reports expiry without writing it.
        let votes = ledger.votes(group).expect("votes");
        assert_eq!(votes[0].0.status, VoteStatus::Expired);

        let err = ledger.cast_vote(vote, UserId::new(1), VoteValue::For).unwrap_err();
        assert!(matches!(err, LedgerError::VoteExpired { .. }));

        // The failed cast persisted the transition.
        let stored = load_vote(&ledger.db, vote).expect("load vote");
        assert_eq!(stored.status, VoteStatus::Expired);
    }

    #[test]
    fn resolution_is_chairperson_only() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);
        let vote = open_vote(&mut ledger, group);

        let err = ledger.resolve_vote(vote, UserId::new(2)).unwrap_err();
        assert!(matches!(err, LedgerError::NotPermitted));
    }

    #[test]
    fn non_member_cannot_propose_or_cast() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);

        let err = ledger
            .create_vote(
                group,
                UserId::new(99),
                "Outsider proposal",
                "",
                VoteType::General,
                Utc::now() + Duration::days(1),
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::MemberNotFound { .. }));

        let vote = open_vote(&mut ledger, group);
        let err = ledger.cast_vote(vote, UserId::new(99), VoteValue::For).unwrap_err();
        assert!(matches!(err, LedgerError::MemberNotFound { .. }));
    }

    #[test]
    fn votes_listing_carries_live_tallies() {
        let mut ledger = Ledger::open_in_memory().expect("open");
        let group = group_of_three(&mut ledger);
        let first = open_vote(&mut ledger, group);
        let _second = open_vote(&mut ledger, group);

        ledger.cast_vote(first, UserId::new(1), VoteValue::For).expect("cast");

        let votes = ledger.votes(group).expect("votes");
        assert_eq!(votes.len(), 2);
        // Newest first; the first-created vote is listed last.
        assert_eq!(votes[1].0.id, first);
        assert_eq!(votes[1].1, Tally { for_votes: 1, against_votes: 0 });
        assert_eq!(votes[0].1, Tally { for_votes: 0, against_votes: 0 });
    }
}
