//! The reconciliation engine over SQLite: imports, auto-match proposals,
//! manual grouping, unmatching and the batch lifecycle.
//!
//! Every mutating operation takes the locks of all accounts it touches and
//! then runs inside a single transaction, re-reading whatever it looked at
//! before locking. A failure anywhere rolls the whole operation back.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use matchbook_core::{
    Account, AccountId, BatchId, BatchStatus, DateRange, EngineConfig, GroupId, ImportBatch,
    MatchProvenance, NormalizedRecord, ReconcileError, RecordId, SourceKind, TransactionRecord,
};
use matchbook_import::grouping::{check_ids, check_members, release_fingerprints};
use matchbook_import::{
    restore, AutoMatchEngine, GroupDraft, GroupTotals, MatchCandidate, Partition, Signed,
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};

use crate::db::{self, DbPool};
use crate::error::{Result, StorageError};
use crate::locks::{AccountGuard, AccountLocks};
use crate::records;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportPreview {
    pub batch_id: BatchId,
    pub new: Vec<NormalizedRecord>,
    pub duplicates: Vec<NormalizedRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub imported: u32,
    /// Staged lines the caller chose not to persist.
    pub skipped: u32,
    pub restored: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPair {
    pub bank_id: RecordId,
    pub ledger_id: RecordId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_id: GroupId,
    pub totals: GroupTotals,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub group_id: GroupId,
    pub provenance: MatchProvenance,
    pub score: Option<u32>,
    pub bank_side: Vec<TransactionRecord>,
    pub ledger_side: Vec<TransactionRecord>,
    pub totals: GroupTotals,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeOutcome {
    pub deleted: u64,
    pub released_groups: u32,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    pool: DbPool,
    engine: AutoMatchEngine,
    locks: AccountLocks,
}

impl Reconciler {
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        Self {
            pool,
            engine: AutoMatchEngine::new(config.matching),
            locks: AccountLocks::new(),
        }
    }

    pub async fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        let pool = db::create_db(path).await?;
        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn engine(&self) -> &AutoMatchEngine {
        &self.engine
    }

    // ── Accounts, batches, records ────────────────────────────────────────────

    #[tracing::instrument(skip(self))]
    pub async fn create_account(&self, name: &str, source_kind: SourceKind) -> Result<Account> {
        let mut conn = self.pool.acquire().await?;
        let account = db::insert_account(&mut conn, name, source_kind).await?;
        info!(account_id = %account.id, "account created");
        Ok(account)
    }

    pub async fn account(&self, id: AccountId) -> Result<Account> {
        let mut conn = self.pool.acquire().await?;
        db::get_account(&mut conn, id)
            .await?
            .ok_or_else(|| ReconcileError::UnknownAccount(id).into())
    }

    pub async fn accounts(&self) -> Result<Vec<Account>> {
        let mut conn = self.pool.acquire().await?;
        db::get_all_accounts(&mut conn).await
    }

    pub async fn batch(&self, id: BatchId) -> Result<ImportBatch> {
        let mut conn = self.pool.acquire().await?;
        load_batch(&mut conn, id).await
    }

    pub async fn record(&self, id: RecordId) -> Result<TransactionRecord> {
        let mut conn = self.pool.acquire().await?;
        load_record(&mut conn, id).await
    }

    // ── Import ────────────────────────────────────────────────────────────────

    /// Classifies `records` against what the account already holds and opens
    /// a pending batch. Nothing but the batch row is written.
    #[tracing::instrument(skip(self, records), fields(staged = records.len()))]
    pub async fn import_batch(
        &self,
        account_id: AccountId,
        source_kind: SourceKind,
        records: Vec<NormalizedRecord>,
    ) -> Result<ImportPreview> {
        validate_records(source_kind, &records)?;
        // Unknown ids must not leave a mutex behind in the lock table.
        self.account(account_id).await?;
        let _guard = self.locks.lock([account_id]).await;
        let mut tx = self.pool.begin().await?;

        let account = db::get_account(&mut tx, account_id)
            .await?
            .ok_or(ReconcileError::UnknownAccount(account_id))?;
        if account.source_kind != source_kind {
            return Err(ReconcileError::SourceMismatch {
                account: account_id,
                expected: account.source_kind,
                got: source_kind,
            }
            .into());
        }

        let index = records::existing_signatures(&mut tx, account_id, source_kind).await?;
        let staged = records.len();
        let Partition { new, duplicates } = matchbook_import::signature::partition(&index, records);
        let batch_id =
            records::insert_batch(&mut tx, account_id, source_kind, staged, duplicates.len())
                .await?;
        tx.commit().await?;

        info!(
            batch_id = %batch_id,
            new = new.len(),
            duplicates = duplicates.len(),
            "import batch staged"
        );
        Ok(ImportPreview {
            batch_id,
            new,
            duplicates,
        })
    }

    /// Persists `records` into a pending batch and marks it completed. For
    /// bank batches, retained fingerprints are then matched against the
    /// fresh lines; a failed restore pass is rolled back on its own and the
    /// import still succeeds.
    #[tracing::instrument(skip(self, records), fields(count = records.len()))]
    pub async fn confirm_import(
        &self,
        batch_id: BatchId,
        records: Vec<NormalizedRecord>,
    ) -> Result<ImportOutcome> {
        let (account_id, holders) = {
            let mut conn = self.pool.acquire().await?;
            let batch = load_batch(&mut conn, batch_id).await?;
            let holders = match batch.source_kind {
                SourceKind::Bank => {
                    records::fingerprint_holder_accounts(&mut conn, batch.account_id).await?
                }
                SourceKind::Ledger => Vec::new(),
            };
            (batch.account_id, holders)
        };

        let guard = self
            .locks
            .lock(std::iter::once(account_id).chain(holders))
            .await;
        let mut tx = self.pool.begin().await?;

        let batch = load_batch(&mut tx, batch_id).await?;
        match batch.status {
            BatchStatus::Pending => {}
            BatchStatus::Completed => return Err(ReconcileError::AlreadyImported(batch_id).into()),
            BatchStatus::Detached => return Err(ReconcileError::BatchClosed(batch_id).into()),
        }
        validate_records(batch.source_kind, &records)?;

        let mut inserted = Vec::with_capacity(records.len());
        for record in &records {
            let signature = record.signature();
            inserted.push(
                records::insert_record(&mut tx, batch.account_id, batch_id, record, &signature)
                    .await?,
            );
        }
        let imported = count_u32(inserted.len());
        let skipped = batch.staged_count.saturating_sub(imported);

        let restored = if batch.source_kind == SourceKind::Bank && !inserted.is_empty() {
            let mut savepoint = Connection::begin(&mut *tx).await?;
            match restore_matches(&mut savepoint, batch.account_id, &inserted, &guard).await {
                Ok(n) => {
                    savepoint.commit().await?;
                    n
                }
                Err(err) => {
                    warn!(batch_id = %batch_id, error = %err, "fingerprint restore rolled back");
                    savepoint.rollback().await?;
                    0
                }
            }
        } else {
            0
        };

        records::complete_batch(&mut tx, batch_id, imported, skipped, restored).await?;
        tx.commit().await?;

        info!(batch_id = %batch_id, imported, skipped, restored, "import confirmed");
        Ok(ImportOutcome {
            imported,
            skipped,
            restored,
        })
    }

    /// Soft delete: the batch is closed and its records lose their batch tag
    /// but keep their links.
    #[tracing::instrument(skip(self))]
    pub async fn detach_batch(&self, batch_id: BatchId) -> Result<u64> {
        let account_id = self.batch(batch_id).await?.account_id;
        let _guard = self.locks.lock([account_id]).await;
        let mut tx = self.pool.begin().await?;

        let batch = load_batch(&mut tx, batch_id).await?;
        if batch.status == BatchStatus::Detached {
            return Err(ReconcileError::BatchClosed(batch_id).into());
        }
        let detached = records::detach_batch(&mut tx, batch_id).await?;
        tx.commit().await?;

        info!(batch_id = %batch_id, detached, "import batch detached");
        Ok(detached)
    }

    /// Withdraws a batch: every group touching its records is dissolved,
    /// leaving fingerprints as an unmatch would, then the records and the
    /// batch are deleted.
    #[tracing::instrument(skip(self))]
    pub async fn purge_batch(&self, batch_id: BatchId) -> Result<PurgeOutcome> {
        let accounts = {
            let mut conn = self.pool.acquire().await?;
            let batch = load_batch(&mut conn, batch_id).await?;
            let mut accounts = BTreeSet::from([batch.account_id]);
            for group in touched_groups(&records::batch_records(&mut conn, batch_id).await?) {
                for member in records::group_members(&mut conn, group).await? {
                    accounts.insert(member.account_id);
                }
            }
            accounts
        };

        let guard = self.locks.lock(accounts).await;
        let mut tx = self.pool.begin().await?;

        load_batch(&mut tx, batch_id).await?;
        let members = records::batch_records(&mut tx, batch_id).await?;
        let groups = touched_groups(&members);
        for group in &groups {
            dissolve(&mut tx, *group, &guard).await?;
        }
        let deleted = records::delete_batch(&mut tx, batch_id).await?;
        tx.commit().await?;

        let released_groups = count_u32(groups.len());
        info!(batch_id = %batch_id, deleted, released_groups, "import batch purged");
        Ok(PurgeOutcome {
            deleted,
            released_groups,
        })
    }

    // ── Matching ──────────────────────────────────────────────────────────────

    /// Ranked one-to-one suggestions for the bank account's unmatched lines in
    /// `range`. Ledger entries are searched in the range widened by the date
    /// window so that lines near the edges still find their counterparts.
    #[tracing::instrument(skip(self))]
    pub async fn propose_auto_matches(
        &self,
        account_id: AccountId,
        range: DateRange,
    ) -> Result<Vec<MatchCandidate>> {
        let mut conn = self.pool.acquire().await?;
        let account = db::get_account(&mut conn, account_id)
            .await?
            .ok_or(ReconcileError::UnknownAccount(account_id))?;
        if account.source_kind != SourceKind::Bank {
            return Err(ReconcileError::SourceMismatch {
                account: account_id,
                expected: SourceKind::Bank,
                got: account.source_kind,
            }
            .into());
        }

        let window = u64::try_from(self.engine.config().max_date_days).unwrap_or(0);
        let bank =
            records::unmatched_in_range(&mut conn, SourceKind::Bank, Some(account_id), range)
                .await?;
        let ledger =
            records::unmatched_in_range(&mut conn, SourceKind::Ledger, None, range.widen(window))
                .await?;

        Ok(self.engine.propose(&bank, &ledger))
    }

    /// Commits accepted bank/ledger pairs as pairwise auto matches. Each pair
    /// is re-scored against current data; a pair that no longer scores fails
    /// the whole call.
    #[tracing::instrument(skip(self, pairs), fields(pairs = pairs.len()))]
    pub async fn apply_matches(&self, pairs: Vec<MatchPair>) -> Result<Vec<GroupId>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(pairs.len() * 2);
        for pair in &pairs {
            for id in [pair.bank_id, pair.ledger_id] {
                if !seen.insert(id) {
                    return Err(ReconcileError::DuplicateRecordId(id).into());
                }
                ids.push(id);
            }
        }

        let accounts = self.accounts_of(&ids).await?;
        let _guard = self.locks.lock(accounts).await;
        let mut tx = self.pool.begin().await?;

        let mut loaded = by_id(records::get_records(&mut tx, &ids).await?);
        let mut groups = Vec::with_capacity(pairs.len());
        for pair in &pairs {
            let bank = take(&mut loaded, pair.bank_id)?;
            let ledger = take(&mut loaded, pair.ledger_id)?;
            let draft = GroupDraft::new(vec![bank], vec![ledger])?;

            let score = self.engine.score(&draft.bank()[0], &draft.ledger()[0]);
            if score == 0 {
                return Err(ReconcileError::NotACandidate {
                    bank: pair.bank_id,
                    ledger: pair.ledger_id,
                }
                .into());
            }
            debug!(bank_id = %pair.bank_id, ledger_id = %pair.ledger_id, score, "pair accepted");
            groups.push(commit_draft(&mut tx, &draft, MatchProvenance::Auto, Some(score)).await?);
        }
        tx.commit().await?;

        info!(groups = groups.len(), "auto matches applied");
        Ok(groups)
    }

    /// Running totals for a prospective group, without committing anything.
    pub async fn preview_group(
        &self,
        bank_ids: &[RecordId],
        ledger_ids: &[RecordId],
    ) -> Result<GroupTotals> {
        check_ids(bank_ids, ledger_ids)?;
        let mut conn = self.pool.acquire().await?;
        let draft = load_draft(&mut conn, bank_ids, ledger_ids).await?;
        Ok(draft.totals())
    }

    /// Manual many-to-many reconciliation. Either every listed record ends up
    /// in the new group or none does.
    #[tracing::instrument(skip(self))]
    pub async fn apply_group(
        &self,
        bank_ids: &[RecordId],
        ledger_ids: &[RecordId],
    ) -> Result<GroupSummary> {
        check_ids(bank_ids, ledger_ids)?;
        let ids: Vec<RecordId> = bank_ids.iter().chain(ledger_ids).copied().collect();

        let accounts = self.accounts_of(&ids).await?;
        let _guard = self.locks.lock(accounts).await;
        let mut tx = self.pool.begin().await?;

        let draft = load_draft(&mut tx, bank_ids, ledger_ids).await?;
        let group_id = commit_draft(&mut tx, &draft, MatchProvenance::Manual, None).await?;
        tx.commit().await?;

        let totals = draft.totals();
        info!(
            group_id = %group_id,
            bank = bank_ids.len(),
            ledger = ledger_ids.len(),
            difference = %totals.difference,
            "match group applied"
        );
        Ok(GroupSummary { group_id, totals })
    }

    /// Dissolves the group `record_id` belongs to and returns every released
    /// member.
    #[tracing::instrument(skip(self))]
    pub async fn unmatch(&self, record_id: RecordId) -> Result<Vec<RecordId>> {
        let (group, accounts) = {
            let mut conn = self.pool.acquire().await?;
            let group = matched_group(&load_record(&mut conn, record_id).await?)?;
            let accounts: BTreeSet<AccountId> = records::group_members(&mut conn, group)
                .await?
                .iter()
                .map(|m| m.account_id)
                .collect();
            (group, accounts)
        };

        let guard = self.locks.lock(accounts).await;
        let mut tx = self.pool.begin().await?;

        if matched_group(&load_record(&mut tx, record_id).await?)? != group {
            return Err(ReconcileError::StaleGroup(group).into());
        }
        let released = dissolve(&mut tx, group, &guard).await?;
        tx.commit().await?;

        info!(group_id = %group, released = released.len(), "match group released");
        Ok(released)
    }

    pub async fn match_details(&self, record_id: RecordId) -> Result<MatchDetails> {
        let mut conn = self.pool.acquire().await?;
        let group_id = matched_group(&load_record(&mut conn, record_id).await?)?;
        let members = records::group_members(&mut conn, group_id).await?;
        let (provenance, score) = records::group_provenance(&mut conn, group_id)
            .await?
            .ok_or_else(|| StorageError::Corrupt(format!("match group {group_id} has no row")))?;

        let (bank_side, ledger_side): (Vec<_>, Vec<_>) =
            members.into_iter().partition(TransactionRecord::is_bank);
        let totals = GroupTotals::of(&bank_side, &ledger_side);
        Ok(MatchDetails {
            group_id,
            provenance,
            score,
            bank_side,
            ledger_side,
            totals,
        })
    }

    /// Owning accounts of the given records, read before any lock is taken.
    async fn accounts_of(&self, ids: &[RecordId]) -> Result<BTreeSet<AccountId>> {
        let mut conn = self.pool.acquire().await?;
        let found = records::get_records(&mut conn, ids).await?;
        if let Some(missing) = ids.iter().find(|id| !found.iter().any(|r| r.id == **id)) {
            return Err(ReconcileError::RecordNotFound(*missing).into());
        }
        Ok(found.iter().map(|r| r.account_id).collect())
    }
}

/// Amounts are magnitudes and every line must belong to the batch's side.
fn validate_records(
    source_kind: SourceKind,
    records: &[NormalizedRecord],
) -> Result<(), ReconcileError> {
    for (index, record) in records.iter().enumerate() {
        let got = record.kind.source_kind();
        if got != source_kind {
            return Err(ReconcileError::KindMismatch {
                index,
                expected: source_kind,
                got,
            });
        }
        if record.amount.is_negative() {
            return Err(ReconcileError::NegativeAmount(index));
        }
    }
    Ok(())
}

fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn matched_group(record: &TransactionRecord) -> Result<GroupId, ReconcileError> {
    record
        .state
        .group()
        .ok_or(ReconcileError::NotMatched(record.id))
}

fn touched_groups(records: &[TransactionRecord]) -> BTreeSet<GroupId> {
    records.iter().filter_map(|r| r.state.group()).collect()
}

fn by_id(records: Vec<TransactionRecord>) -> HashMap<RecordId, TransactionRecord> {
    records.into_iter().map(|r| (r.id, r)).collect()
}

fn take(
    loaded: &mut HashMap<RecordId, TransactionRecord>,
    id: RecordId,
) -> Result<TransactionRecord, ReconcileError> {
    loaded.remove(&id).ok_or(ReconcileError::RecordNotFound(id))
}

async fn load_batch(conn: &mut SqliteConnection, id: BatchId) -> Result<ImportBatch> {
    records::get_batch(conn, id)
        .await?
        .ok_or_else(|| ReconcileError::UnknownBatch(id).into())
}

async fn load_record(conn: &mut SqliteConnection, id: RecordId) -> Result<TransactionRecord> {
    records::get_record(conn, id)
        .await?
        .ok_or_else(|| ReconcileError::RecordNotFound(id).into())
}

async fn load_draft(
    conn: &mut SqliteConnection,
    bank_ids: &[RecordId],
    ledger_ids: &[RecordId],
) -> Result<GroupDraft> {
    let ids: Vec<RecordId> = bank_ids.iter().chain(ledger_ids).copied().collect();
    let mut loaded = by_id(records::get_records(conn, &ids).await?);
    let bank = bank_ids
        .iter()
        .map(|id| take(&mut loaded, *id))
        .collect::<Result<Vec<_>, _>>()?;
    let ledger = ledger_ids
        .iter()
        .map(|id| take(&mut loaded, *id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(GroupDraft::new(bank, ledger)?)
}

async fn commit_draft(
    conn: &mut SqliteConnection,
    draft: &GroupDraft,
    provenance: MatchProvenance,
    score: Option<u32>,
) -> Result<GroupId> {
    let group = records::insert_group(conn, provenance, score).await?;
    for (id, state) in draft.member_states(group, provenance) {
        records::link_record(conn, id, &state).await?;
    }
    Ok(group)
}

/// Releases `group`, writing retained fingerprints first. Every member must
/// belong to an account the caller holds.
async fn dissolve(
    conn: &mut SqliteConnection,
    group: GroupId,
    guard: &AccountGuard,
) -> Result<Vec<RecordId>> {
    let members = records::group_members(conn, group).await?;
    check_members(group, &members)?;
    if members.iter().any(|m| !guard.covers(m.account_id)) {
        return Err(ReconcileError::StaleGroup(group).into());
    }

    for (id, fingerprint) in release_fingerprints(&members) {
        records::write_fingerprint(conn, id, &fingerprint).await?;
    }
    records::release_group(conn, group).await?;
    Ok(members.iter().map(|m| m.id).collect())
}

/// Re-links ledger entries whose fingerprint names one of the fresh bank
/// lines. Only entries in accounts held by `guard` are considered.
async fn restore_matches(
    conn: &mut SqliteConnection,
    account_id: AccountId,
    fresh: &[RecordId],
    guard: &AccountGuard,
) -> Result<u32> {
    let ledger: Vec<TransactionRecord> = records::fingerprinted_for_account(conn, account_id)
        .await?
        .into_iter()
        .filter(|r| guard.covers(r.account_id))
        .collect();
    if ledger.is_empty() {
        return Ok(0);
    }
    let bank = records::get_records(conn, fresh).await?;

    let mut ledger_by_id = by_id(ledger.clone());
    let mut bank_by_id = by_id(bank.clone());
    let mut restored = 0;
    for restoration in restore::plan(&ledger, &bank) {
        let bank = take(&mut bank_by_id, restoration.bank_id)?;
        let entry = take(&mut ledger_by_id, restoration.ledger_id)?;
        let draft = GroupDraft::new(vec![bank], vec![entry])?;
        let group = commit_draft(conn, &draft, MatchProvenance::Restored, None).await?;
        debug!(
            group_id = %group,
            bank_id = %restoration.bank_id,
            ledger_id = %restoration.ledger_id,
            "match restored from fingerprint"
        );
        restored += 1;
    }
    Ok(restored)
}
