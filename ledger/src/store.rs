//! SQLite persistence for the ledger.
//!
//! One `Ledger` owns one connection. Every mutating operation elsewhere in
//! this crate runs as a single immediate transaction (read-validate-write as
//! one unit), so shared counters (`total_pool`, `current_round`, the
//! commitment-score inputs) never see lost updates. Duplicate-sensitive
//! writes are additionally backed by UNIQUE indices so a racing writer
//! degrades to the same typed error instead of double-counting.

use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, Row};

use kasi_types::{
    ConstitutionRule, Expense, ExpenseId, Frequency, Group, GroupId, GroupKind, GroupStatus,
    Member, MemberRole, MemberStatus, Money, ParseLabelError, Round, RuleId, Transaction,
    TransactionId, TransactionStatus, TransactionType, UserId, Vote, VoteId, VoteStatus, VoteType,
};

use crate::LedgerError;
use crate::events::{EventSink, TracingSink};

/// The ledger and rotation engine over one SQLite database.
///
/// Mutating operations take `&mut self`; reads take `&self`. All
/// serialization is internal to the per-operation transaction; no locking
/// is exposed to callers.
pub struct Ledger {
    pub(crate) db: Connection,
    pub(crate) events: Box<dyn EventSink>,
}

impl Ledger {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS groups (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            kind TEXT NOT NULL,
            contribution_amount INTEGER NOT NULL DEFAULT 0,
            frequency TEXT NOT NULL,
            max_members INTEGER NOT NULL,
            current_round INTEGER NOT NULL DEFAULT 0,
            total_rounds INTEGER NOT NULL DEFAULT 0,
            total_pool INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            created_by INTEGER NOT NULL,
            goal_target_monthly INTEGER,
            recurring INTEGER NOT NULL DEFAULT 0,
            goal_description TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS members (
            group_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            role TEXT NOT NULL DEFAULT 'member',
            payout_position INTEGER NOT NULL,
            commitment_score INTEGER NOT NULL DEFAULT 100,
            total_on_time INTEGER NOT NULL DEFAULT 0,
            total_payments INTEGER NOT NULL DEFAULT 0,
            cycles_completed INTEGER NOT NULL DEFAULT 0,
            lifetime_contributed INTEGER NOT NULL DEFAULT 0,
            lifetime_received INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            joined_at TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id),
            FOREIGN KEY (group_id) REFERENCES groups(id)
        );

        -- Append-only: rows are inserted, never updated or deleted.
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY,
            group_id INTEGER NOT NULL,
            member_id INTEGER NOT NULL,
            amount INTEGER NOT NULL,
            tx_type TEXT NOT NULL,
            status TEXT NOT NULL,
            round INTEGER NOT NULL DEFAULT 0,
            note TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (group_id) REFERENCES groups(id)
        );

        -- One completed contribution per member per rotation round.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tx_one_contribution
        ON transactions(group_id, member_id, round)
        WHERE tx_type = 'contribution' AND status = 'completed' AND round > 0;

        -- At most one payout per group per round.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_tx_one_payout
        ON transactions(group_id, round)
        WHERE tx_type = 'payout';

        CREATE INDEX IF NOT EXISTS idx_tx_group_round
        ON transactions(group_id, round);

        -- Append-only: goal-fund spending never edits the transaction log.
        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY,
            group_id INTEGER NOT NULL,
            description TEXT NOT NULL,
            amount INTEGER NOT NULL,
            incurred_on TEXT NOT NULL,
            recorded_by INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (group_id) REFERENCES groups(id)
        );

        CREATE TABLE IF NOT EXISTS constitution_rules (
            id INTEGER PRIMARY KEY,
            group_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            rule_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (group_id, rule_order),
            FOREIGN KEY (group_id) REFERENCES groups(id)
        );

        CREATE TABLE IF NOT EXISTS rule_acceptances (
            rule_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            accepted_at TEXT NOT NULL,
            PRIMARY KEY (rule_id, user_id),
            FOREIGN KEY (rule_id) REFERENCES constitution_rules(id)
        );

        CREATE TABLE IF NOT EXISTS votes (
            id INTEGER PRIMARY KEY,
            group_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            proposed_by INTEGER NOT NULL,
            vote_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (group_id) REFERENCES groups(id)
        );

        CREATE TABLE IF NOT EXISTS vote_casts (
            vote_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            value TEXT NOT NULL,
            cast_at TEXT NOT NULL,
            PRIMARY KEY (vote_id, user_id),
            FOREIGN KEY (vote_id) REFERENCES votes(id)
        );
    ";

    /// Open or create the ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        Self::initialize(db)
    }

    /// Open an in-memory ledger (for testing).
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let db = Connection::open_in_memory()?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self, LedgerError> {
        db.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;
        db.execute_batch(Self::SCHEMA)?;
        Ok(Self {
            db,
            events: Box::new(TracingSink),
        })
    }

    /// Replace the default event sink with a custom collaborator.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Box<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Look up a group by id.
    pub fn group(&self, id: GroupId) -> Result<Group, LedgerError> {
        load_group(&self.db, id)
    }

    /// Append a penalty or settlement entry against a member.
    ///
    /// Chairperson or treasurer only. Adjustments are bookkeeping records:
    /// they never touch the pool, the rotation, or the commitment-score
    /// counters.
    pub fn record_adjustment(
        &mut self,
        group_id: GroupId,
        actor: UserId,
        member: UserId,
        amount: Money,
        tx_type: TransactionType,
        status: TransactionStatus,
        note: Option<&str>,
    ) -> Result<Transaction, LedgerError> {
        if !matches!(
            tx_type,
            TransactionType::Penalty | TransactionType::Settlement
        ) {
            return Err(LedgerError::InvalidAdjustmentType);
        }
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount);
        }

        let tx = self
            .db
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let group = load_group(&tx, group_id)?;
        if group.status != GroupStatus::Active {
            return Err(LedgerError::GroupInactive);
        }
        require_disburser(&tx, group_id, actor)?;
        load_member(&tx, group_id, member)?;

        tx.execute(
            "INSERT INTO transactions (group_id, member_id, amount, tx_type, status, round,
                                       note, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7)",
            rusqlite::params![
                group_id.value(),
                member.value(),
                amount.minor(),
                tx_type.as_str(),
                status.as_str(),
                note,
                format_timestamp(Utc::now()),
            ],
        )?;
        let id = tx.last_insert_rowid();

        let recorded = tx.query_row(
            "SELECT id, group_id, member_id, amount, tx_type, status, round, note, created_at
             FROM transactions WHERE id = ?1",
            [id],
            transaction_from_row,
        )?;
        tx.commit()?;
        Ok(recorded)
    }

    /// All transactions for a group, newest first, optionally filtered to
    /// one rotation round.
    pub fn transactions(
        &self,
        group: GroupId,
        round: Option<Round>,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut out = Vec::new();
        match round {
            Some(round) => {
                let mut stmt = self.db.prepare(
                    "SELECT id, group_id, member_id, amount, tx_type, status, round, note, created_at
                     FROM transactions
                     WHERE group_id = ?1 AND round = ?2
                     ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![group.value(), i64::from(round.value())],
                    transaction_from_row,
                )?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = self.db.prepare(
                    "SELECT id, group_id, member_id, amount, tx_type, status, round, note, created_at
                     FROM transactions
                     WHERE group_id = ?1
                     ORDER BY created_at DESC, id DESC",
                )?;
                let rows = stmt.query_map([group.value()], transaction_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }
}

// ── Timestamps ──────────────────────────────────────────────────────────

/// RFC 3339 with millisecond precision, stored as TEXT.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

// ── Row mapping ─────────────────────────────────────────────────────────

fn conversion_err(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn timestamp_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|err| conversion_err(idx, err))
}

pub(crate) fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|err| conversion_err(idx, err))
}

pub(crate) fn label_col<T>(
    row: &Row<'_>,
    idx: usize,
    parse: impl Fn(&str) -> Result<T, ParseLabelError>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).map_err(|err| conversion_err(idx, err))
}

/// Maps `SELECT id, name, description, kind, contribution_amount, frequency,
/// max_members, current_round, total_rounds, total_pool, status, created_by,
/// goal_target_monthly, recurring, goal_description, created_at, updated_at`.
pub(crate) fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: GroupId::new(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        kind: label_col(row, 3, GroupKind::parse)?,
        contribution_amount: Money::from_minor(row.get(4)?),
        frequency: label_col(row, 5, Frequency::parse)?,
        max_members: row.get::<_, i64>(6)? as u32,
        current_round: Round::new(row.get::<_, i64>(7)? as u32),
        total_rounds: row.get::<_, i64>(8)? as u32,
        total_pool: Money::from_minor(row.get(9)?),
        status: label_col(row, 10, GroupStatus::parse)?,
        created_by: UserId::new(row.get(11)?),
        goal_target_monthly: row.get::<_, Option<i64>>(12)?.map(Money::from_minor),
        recurring: row.get::<_, i64>(13)? != 0,
        goal_description: row.get(14)?,
        created_at: timestamp_col(row, 15)?,
        updated_at: timestamp_col(row, 16)?,
    })
}

/// Maps `SELECT group_id, user_id, role, payout_position, commitment_score,
/// total_on_time, total_payments, cycles_completed, lifetime_contributed,
/// lifetime_received, status, joined_at`.
pub(crate) fn member_from_row(row: &Row<'_>) -> rusqlite::Result<Member> {
    Ok(Member {
        group_id: GroupId::new(row.get(0)?),
        user_id: UserId::new(row.get(1)?),
        role: label_col(row, 2, MemberRole::parse)?,
        payout_position: row.get::<_, i64>(3)? as u32,
        commitment_score: row.get::<_, i64>(4)? as u8,
        total_on_time: row.get::<_, i64>(5)? as u32,
        total_payments: row.get::<_, i64>(6)? as u32,
        cycles_completed: row.get::<_, i64>(7)? as u32,
        lifetime_contributed: Money::from_minor(row.get(8)?),
        lifetime_received: Money::from_minor(row.get(9)?),
        status: label_col(row, 10, MemberStatus::parse)?,
        joined_at: timestamp_col(row, 11)?,
    })
}

/// Maps `SELECT id, group_id, member_id, amount, tx_type, status, round,
/// note, created_at`.
pub(crate) fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: TransactionId::new(row.get(0)?),
        group_id: GroupId::new(row.get(1)?),
        member_id: UserId::new(row.get(2)?),
        amount: Money::from_minor(row.get(3)?),
        tx_type: label_col(row, 4, TransactionType::parse)?,
        status: label_col(row, 5, TransactionStatus::parse)?,
        round: Round::new(row.get::<_, i64>(6)? as u32),
        note: row.get(7)?,
        created_at: timestamp_col(row, 8)?,
    })
}

/// Maps `SELECT id, group_id, description, amount, incurred_on, recorded_by,
/// created_at`.
pub(crate) fn expense_from_row(row: &Row<'_>) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: ExpenseId::new(row.get(0)?),
        group_id: GroupId::new(row.get(1)?),
        description: row.get(2)?,
        amount: Money::from_minor(row.get(3)?),
        incurred_on: date_col(row, 4)?,
        recorded_by: UserId::new(row.get(5)?),
        created_at: timestamp_col(row, 6)?,
    })
}

/// Maps `SELECT id, group_id, title, description, rule_order, created_at`.
pub(crate) fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<ConstitutionRule> {
    Ok(ConstitutionRule {
        id: RuleId::new(row.get(0)?),
        group_id: GroupId::new(row.get(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        rule_order: row.get::<_, i64>(4)? as u32,
        created_at: timestamp_col(row, 5)?,
    })
}

/// Maps `SELECT id, group_id, title, description, proposed_by, vote_type,
/// status, expires_at, created_at`.
pub(crate) fn vote_from_row(row: &Row<'_>) -> rusqlite::Result<Vote> {
    Ok(Vote {
        id: VoteId::new(row.get(0)?),
        group_id: GroupId::new(row.get(1)?),
        title: row.get(2)?,
        description: row.get(3)?,
        proposed_by: UserId::new(row.get(4)?),
        vote_type: label_col(row, 5, VoteType::parse)?,
        status: label_col(row, 6, VoteStatus::parse)?,
        expires_at: timestamp_col(row, 7)?,
        created_at: timestamp_col(row, 8)?,
    })
}

// ── Shared lookups ──────────────────────────────────────────────────────

pub(crate) fn load_group(conn: &Connection, id: GroupId) -> Result<Group, LedgerError> {
    use rusqlite::OptionalExtension;

    conn.query_row(
        "SELECT id, name, description, kind, contribution_amount, frequency, max_members,
                current_round, total_rounds, total_pool, status, created_by,
                goal_target_monthly, recurring, goal_description, created_at, updated_at
         FROM groups WHERE id = ?1",
        [id.value()],
        group_from_row,
    )
    .optional()?
    .ok_or(LedgerError::GroupNotFound(id))
}

pub(crate) fn load_member(
    conn: &Connection,
    group: GroupId,
    user: UserId,
) -> Result<Member, LedgerError> {
    use rusqlite::OptionalExtension;

    conn.query_row(
        "SELECT group_id, user_id, role, payout_position, commitment_score, total_on_time,
                total_payments, cycles_completed, lifetime_contributed, lifetime_received,
                status, joined_at
         FROM members WHERE group_id = ?1 AND user_id = ?2",
        [group.value(), user.value()],
        member_from_row,
    )
    .optional()?
    .ok_or(LedgerError::MemberNotFound { group, user })
}

/// Centralized capability gate: the actor must be an active member whose
/// role may move money (chairperson or treasurer).
pub(crate) fn require_disburser(
    conn: &Connection,
    group: GroupId,
    actor: UserId,
) -> Result<Member, LedgerError> {
    let member = load_member(conn, group, actor).map_err(|err| match err {
        LedgerError::MemberNotFound { .. } => LedgerError::NotPermitted,
        other => other,
    })?;
    if member.status != MemberStatus::Active || !member.role.can_disburse() {
        return Err(LedgerError::NotPermitted);
    }
    Ok(member)
}

/// Capability gate for chairperson-only operations (rule changes, role
/// assignment, vote resolution).
pub(crate) fn require_chairperson(
    conn: &Connection,
    group: GroupId,
    actor: UserId,
) -> Result<Member, LedgerError> {
    let member = load_member(conn, group, actor).map_err(|err| match err {
        LedgerError::MemberNotFound { .. } => LedgerError::NotPermitted,
        other => other,
    })?;
    if member.status != MemberStatus::Active || member.role != MemberRole::Chairperson {
        return Err(LedgerError::NotPermitted);
    }
    Ok(member)
}

pub(crate) fn active_member_count(conn: &Connection, group: GroupId) -> Result<u32, LedgerError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM members WHERE group_id = ?1 AND status = 'active'",
        [group.value()],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

/// Whether a rusqlite error is a UNIQUE constraint violation, meaning a
/// racing writer already landed the conflicting row.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::ConstraintViolation)
    )
}
