//! Row-level access to batches, transaction records and match groups.
//!
//! Every function takes a bare connection so callers decide the transaction
//! boundary; the reconciler runs each operation inside one.

use chrono::{DateTime, NaiveDate, Utc};
use matchbook_core::{
    AccountId, BatchId, BatchStatus, DateRange, GroupId, ImportBatch, MatchLink, MatchProvenance,
    Money, NormalizedRecord, ReconState, RecordId, RecordKind, RetainedFingerprint, SourceKind,
    TransactionRecord,
};
use matchbook_import::{Signature, SignatureIndex};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};

use crate::error::{Result, StorageError};

const RECORD_COLUMNS: &str = "id, account_id, batch_id, source_kind, type_tag, date, amount_cents, \
    narration, reference, balance_cents, signature, is_reconciled, reconciled_with_id, \
    reconciled_with_type, match_group_id, match_provenance, fp_account_id, fp_date, \
    fp_amount_cents, fp_narration_prefix";

const BATCH_COLUMNS: &str = "id, account_id, source_kind, status, staged_count, duplicate_count, \
    imported_count, skipped_count, restored_count, created_at, completed_at";

#[derive(Debug, FromRow)]
struct RecordRow {
    id: i64,
    account_id: i64,
    batch_id: Option<i64>,
    source_kind: String,
    type_tag: String,
    date: NaiveDate,
    amount_cents: i64,
    narration: String,
    reference: Option<String>,
    balance_cents: Option<i64>,
    signature: String,
    is_reconciled: bool,
    reconciled_with_id: Option<i64>,
    reconciled_with_type: Option<String>,
    match_group_id: Option<i64>,
    match_provenance: Option<String>,
    fp_account_id: Option<i64>,
    fp_date: Option<NaiveDate>,
    fp_amount_cents: Option<i64>,
    fp_narration_prefix: Option<String>,
}

impl RecordRow {
    fn into_record(self) -> Result<TransactionRecord> {
        let source: SourceKind = self.source_kind.parse().map_err(StorageError::Corrupt)?;
        let kind = RecordKind::parse(source, &self.type_tag)
            .map_err(|e| StorageError::Corrupt(format!("record {}: {e}", self.id)))?;

        let state = if self.is_reconciled {
            let corrupt = |what: &str| StorageError::Corrupt(format!("record {}: {what}", self.id));
            let group = GroupId(self.match_group_id.ok_or_else(|| corrupt("matched without group"))?);
            let provenance: MatchProvenance = self
                .match_provenance
                .as_deref()
                .unwrap_or("manual")
                .parse()
                .map_err(StorageError::Corrupt)?;
            let link = match self.reconciled_with_type.as_deref() {
                Some("group") => MatchLink::Group,
                Some(other) => MatchLink::Counterpart {
                    id: RecordId(
                        self.reconciled_with_id
                            .ok_or_else(|| corrupt("pairwise match without counterpart"))?,
                    ),
                    kind: other.parse().map_err(StorageError::Corrupt)?,
                },
                None => return Err(corrupt("matched without counterpart type")),
            };
            ReconState::Matched {
                group,
                link,
                provenance,
            }
        } else {
            ReconState::Unmatched
        };

        let retained = match (self.fp_account_id, self.fp_date, self.fp_amount_cents) {
            (Some(account), Some(date), Some(cents)) => Some(RetainedFingerprint {
                account_id: AccountId(account),
                date,
                amount: Money::from_cents(cents),
                narration_prefix: self.fp_narration_prefix,
            }),
            _ => None,
        };

        Ok(TransactionRecord {
            id: RecordId(self.id),
            account_id: AccountId(self.account_id),
            batch_id: self.batch_id.map(BatchId),
            date: self.date,
            amount: Money::from_cents(self.amount_cents),
            kind,
            narration: self.narration,
            reference: self.reference,
            balance: self.balance_cents.map(Money::from_cents),
            signature: self.signature,
            retained,
            state,
        })
    }
}

fn into_records(rows: Vec<RecordRow>) -> Result<Vec<TransactionRecord>> {
    rows.into_iter().map(RecordRow::into_record).collect()
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: i64,
    account_id: i64,
    source_kind: String,
    status: String,
    staged_count: i64,
    duplicate_count: i64,
    imported_count: i64,
    skipped_count: i64,
    restored_count: i64,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

fn count(n: i64) -> u32 {
    u32::try_from(n).unwrap_or(0)
}

impl BatchRow {
    fn into_batch(self) -> Result<ImportBatch> {
        Ok(ImportBatch {
            id: BatchId(self.id),
            account_id: AccountId(self.account_id),
            source_kind: self.source_kind.parse().map_err(StorageError::Corrupt)?,
            status: self.status.parse().map_err(StorageError::Corrupt)?,
            staged_count: count(self.staged_count),
            duplicate_count: count(self.duplicate_count),
            imported_count: count(self.imported_count),
            skipped_count: count(self.skipped_count),
            restored_count: count(self.restored_count),
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

// ── Import batches ────────────────────────────────────────────────────────────

pub async fn insert_batch(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    source_kind: SourceKind,
    staged: usize,
    duplicates: usize,
) -> Result<BatchId> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO import_batches (account_id, source_kind, status, staged_count, duplicate_count, created_at) VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(account_id.0)
    .bind(source_kind.as_str())
    .bind(BatchStatus::Pending.as_str())
    .bind(staged as i64)
    .bind(duplicates as i64)
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;
    Ok(BatchId(id))
}

pub async fn get_batch(conn: &mut SqliteConnection, id: BatchId) -> Result<Option<ImportBatch>> {
    let row = sqlx::query_as::<_, BatchRow>(&format!(
        "SELECT {BATCH_COLUMNS} FROM import_batches WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(BatchRow::into_batch).transpose()
}

pub async fn complete_batch(
    conn: &mut SqliteConnection,
    id: BatchId,
    imported: u32,
    skipped: u32,
    restored: u32,
) -> Result<()> {
    sqlx::query(
        "UPDATE import_batches SET status = ?, imported_count = ?, skipped_count = ?, restored_count = ?, completed_at = ? WHERE id = ?",
    )
    .bind(BatchStatus::Completed.as_str())
    .bind(imported as i64)
    .bind(skipped as i64)
    .bind(restored as i64)
    .bind(Utc::now())
    .bind(id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Soft delete: the batch stays as history, its records lose the tag.
pub async fn detach_batch(conn: &mut SqliteConnection, id: BatchId) -> Result<u64> {
    let detached = sqlx::query("UPDATE transactions SET batch_id = NULL WHERE batch_id = ?")
        .bind(id.0)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    sqlx::query("UPDATE import_batches SET status = ? WHERE id = ?")
        .bind(BatchStatus::Detached.as_str())
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(detached)
}

/// Hard delete of a batch and its records. Callers release match groups
/// first; a matched record here would leave its counterparts one-sided.
pub async fn delete_batch(conn: &mut SqliteConnection, id: BatchId) -> Result<u64> {
    let deleted = sqlx::query("DELETE FROM transactions WHERE batch_id = ? AND is_reconciled = 0")
        .bind(id.0)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    let left: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE batch_id = ?")
        .bind(id.0)
        .fetch_one(&mut *conn)
        .await?;
    if left > 0 {
        return Err(StorageError::Corrupt(format!(
            "batch {id} still has {left} matched records"
        )));
    }
    sqlx::query("DELETE FROM import_batches WHERE id = ?")
        .bind(id.0)
        .execute(&mut *conn)
        .await?;
    Ok(deleted)
}

// ── Transaction records ───────────────────────────────────────────────────────

pub async fn existing_signatures(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    source_kind: SourceKind,
) -> Result<SignatureIndex> {
    let rows: Vec<String> = sqlx::query_scalar(
        "SELECT signature FROM transactions WHERE account_id = ? AND source_kind = ?",
    )
    .bind(account_id.0)
    .bind(source_kind.as_str())
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(Signature::from).collect())
}

pub async fn insert_record(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    batch_id: BatchId,
    record: &NormalizedRecord,
    signature: &Signature,
) -> Result<RecordId> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO transactions
            (account_id, batch_id, source_kind, type_tag, date, amount_cents, narration, reference, balance_cents, signature)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(account_id.0)
    .bind(batch_id.0)
    .bind(record.kind.source_kind().as_str())
    .bind(record.kind.tag())
    .bind(record.date)
    .bind(record.amount.to_cents())
    .bind(&record.narration)
    .bind(&record.reference)
    .bind(record.balance.map(Money::to_cents))
    .bind(signature.as_str())
    .fetch_one(&mut *conn)
    .await?;
    Ok(RecordId(id))
}

pub async fn get_record(
    conn: &mut SqliteConnection,
    id: RecordId,
) -> Result<Option<TransactionRecord>> {
    let row = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM transactions WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(RecordRow::into_record).transpose()
}

/// Loads the given records in id order. Missing ids are simply absent.
pub async fn get_records(
    conn: &mut SqliteConnection,
    ids: &[RecordId],
) -> Result<Vec<TransactionRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {RECORD_COLUMNS} FROM transactions WHERE id IN ("
    ));
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.0);
    }
    separated.push_unseparated(") ORDER BY id");
    let rows = qb
        .build_query_as::<RecordRow>()
        .fetch_all(&mut *conn)
        .await?;
    into_records(rows)
}

pub async fn group_members(
    conn: &mut SqliteConnection,
    group: GroupId,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM transactions WHERE match_group_id = ? ORDER BY id"
    ))
    .bind(group.0)
    .fetch_all(&mut *conn)
    .await?;
    into_records(rows)
}

pub async fn batch_records(
    conn: &mut SqliteConnection,
    batch: BatchId,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM transactions WHERE batch_id = ? ORDER BY id"
    ))
    .bind(batch.0)
    .fetch_all(&mut *conn)
    .await?;
    into_records(rows)
}

/// Unmatched records of one side within `range`, optionally limited to one
/// account.
pub async fn unmatched_in_range(
    conn: &mut SqliteConnection,
    source_kind: SourceKind,
    account_id: Option<AccountId>,
    range: DateRange,
) -> Result<Vec<TransactionRecord>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {RECORD_COLUMNS} FROM transactions WHERE is_reconciled = 0 AND source_kind = "
    ));
    qb.push_bind(source_kind.as_str());
    qb.push(" AND date >= ").push_bind(range.start);
    qb.push(" AND date <= ").push_bind(range.end);
    if let Some(account_id) = account_id {
        qb.push(" AND account_id = ").push_bind(account_id.0);
    }
    qb.push(" ORDER BY date, id");
    let rows = qb
        .build_query_as::<RecordRow>()
        .fetch_all(&mut *conn)
        .await?;
    into_records(rows)
}

/// Unmatched ledger entries whose retained fingerprint names `account_id`.
pub async fn fingerprinted_for_account(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> Result<Vec<TransactionRecord>> {
    let rows = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM transactions WHERE source_kind = 'ledger' AND is_reconciled = 0 AND fp_account_id = ? ORDER BY id"
    ))
    .bind(account_id.0)
    .fetch_all(&mut *conn)
    .await?;
    into_records(rows)
}

/// Accounts owning ledger entries that remember a match in `account_id`.
pub async fn fingerprint_holder_accounts(
    conn: &mut SqliteConnection,
    account_id: AccountId,
) -> Result<Vec<AccountId>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT DISTINCT account_id FROM transactions WHERE source_kind = 'ledger' AND is_reconciled = 0 AND fp_account_id = ?",
    )
    .bind(account_id.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(AccountId).collect())
}

pub async fn count_records(conn: &mut SqliteConnection, account_id: AccountId) -> Result<u64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE account_id = ?")
        .bind(account_id.0)
        .fetch_one(&mut *conn)
        .await?;
    Ok(u64::try_from(n).unwrap_or(0))
}

pub async fn write_fingerprint(
    conn: &mut SqliteConnection,
    id: RecordId,
    fingerprint: &RetainedFingerprint,
) -> Result<()> {
    sqlx::query(
        "UPDATE transactions SET fp_account_id = ?, fp_date = ?, fp_amount_cents = ?, fp_narration_prefix = ? WHERE id = ? AND source_kind = 'ledger'",
    )
    .bind(fingerprint.account_id.0)
    .bind(fingerprint.date)
    .bind(fingerprint.amount.to_cents())
    .bind(&fingerprint.narration_prefix)
    .bind(id.0)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// ── Match groups ──────────────────────────────────────────────────────────────

pub async fn insert_group(
    conn: &mut SqliteConnection,
    provenance: MatchProvenance,
    score: Option<u32>,
) -> Result<GroupId> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO match_groups (provenance, score, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(provenance.as_str())
    .bind(score.map(i64::from))
    .bind(Utc::now())
    .fetch_one(&mut *conn)
    .await?;
    Ok(GroupId(id))
}

/// Moves an unmatched record into `state`. Fails with `AlreadyMatched` if
/// the record was matched in the meantime, so a link is never overwritten.
pub async fn link_record(
    conn: &mut SqliteConnection,
    id: RecordId,
    state: &ReconState,
) -> Result<()> {
    let ReconState::Matched {
        group, provenance, ..
    } = state
    else {
        return Err(StorageError::Corrupt(format!(
            "record {id}: link requested with an unmatched state"
        )));
    };
    let (with_id, with_type) = state
        .reconciled_with()
        .map(|(id, kind)| (Some(id), Some(kind)))
        .unwrap_or((None, None));

    let updated = sqlx::query(
        r#"
        UPDATE transactions
        SET is_reconciled = 1, reconciled_with_id = ?, reconciled_with_type = ?,
            match_group_id = ?, match_provenance = ?
        WHERE id = ? AND is_reconciled = 0
        "#,
    )
    .bind(with_id)
    .bind(with_type)
    .bind(group.0)
    .bind(provenance.as_str())
    .bind(id.0)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 1 {
        Ok(())
    } else {
        Err(matchbook_core::ReconcileError::AlreadyMatched(id).into())
    }
}

/// Returns every member of `group` to unmatched and drops the group row.
pub async fn release_group(conn: &mut SqliteConnection, group: GroupId) -> Result<u64> {
    let released = sqlx::query(
        r#"
        UPDATE transactions
        SET is_reconciled = 0, reconciled_with_id = NULL, reconciled_with_type = NULL,
            match_group_id = NULL, match_provenance = NULL
        WHERE match_group_id = ?
        "#,
    )
    .bind(group.0)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    sqlx::query("DELETE FROM match_groups WHERE id = ?")
        .bind(group.0)
        .execute(&mut *conn)
        .await?;
    Ok(released)
}

pub async fn group_provenance(
    conn: &mut SqliteConnection,
    group: GroupId,
) -> Result<Option<(MatchProvenance, Option<u32>)>> {
    let row = sqlx::query_as::<_, (String, Option<i64>)>(
        "SELECT provenance, score FROM match_groups WHERE id = ?",
    )
    .bind(group.0)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|(p, score)| -> Result<(MatchProvenance, Option<u32>)> {
        Ok((
            p.parse().map_err(StorageError::Corrupt)?,
            score.and_then(|s| u32::try_from(s).ok()),
        ))
    })
    .transpose()
}
