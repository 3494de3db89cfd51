use matchbook_core::{Account, AccountId, ReconcileError, SourceKind};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite, SqliteConnection};
use std::path::Path;
use std::time::Duration;

use crate::error::StorageError;

pub type DbPool = Pool<Sqlite>;

/// Opens (creating if needed) the database at `path` and brings the schema
/// up to date. A single connection keeps SQLite's writer story simple.
pub async fn create_db(path: &Path) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000))
        .pragma("cache_size", "-32000");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            source_kind TEXT NOT NULL CHECK (source_kind IN ('bank', 'ledger')),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_batches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            source_kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            staged_count INTEGER NOT NULL DEFAULT 0,
            duplicate_count INTEGER NOT NULL DEFAULT 0,
            imported_count INTEGER NOT NULL DEFAULT 0,
            skipped_count INTEGER NOT NULL DEFAULT 0,
            restored_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            completed_at TEXT,
            FOREIGN KEY (account_id) REFERENCES accounts(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS match_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provenance TEXT NOT NULL,
            score INTEGER,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // fp_* columns hold the retained fingerprint. fp_account_id is a plain
    // value, deliberately without a foreign key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            batch_id INTEGER,
            source_kind TEXT NOT NULL,
            type_tag TEXT NOT NULL,
            date TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            narration TEXT NOT NULL,
            reference TEXT,
            balance_cents INTEGER,
            signature TEXT NOT NULL,
            is_reconciled INTEGER NOT NULL DEFAULT 0,
            reconciled_with_id INTEGER,
            reconciled_with_type TEXT,
            match_group_id INTEGER,
            match_provenance TEXT,
            fp_account_id INTEGER,
            fp_date TEXT,
            fp_amount_cents INTEGER,
            fp_narration_prefix TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (account_id) REFERENCES accounts(id),
            FOREIGN KEY (batch_id) REFERENCES import_batches(id) ON DELETE SET NULL,
            FOREIGN KEY (match_group_id) REFERENCES match_groups(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    for index in [
        "CREATE INDEX IF NOT EXISTS idx_transactions_signature ON transactions (account_id, source_kind, signature)",
        "CREATE INDEX IF NOT EXISTS idx_transactions_group ON transactions (match_group_id)",
        "CREATE INDEX IF NOT EXISTS idx_transactions_batch ON transactions (batch_id)",
        "CREATE INDEX IF NOT EXISTS idx_transactions_fingerprint ON transactions (fp_account_id)",
        "CREATE INDEX IF NOT EXISTS idx_transactions_open ON transactions (source_kind, is_reconciled, date)",
    ] {
        sqlx::query(index).execute(pool).await?;
    }

    Ok(())
}

fn parse_kind(raw: &str) -> Result<SourceKind, StorageError> {
    raw.parse().map_err(StorageError::Corrupt)
}

pub async fn insert_account(
    conn: &mut SqliteConnection,
    name: &str,
    source_kind: SourceKind,
) -> Result<Account, StorageError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO accounts (name, source_kind) VALUES (?, ?) RETURNING id",
    )
    .bind(name)
    .bind(source_kind.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::from(ReconcileError::AccountNameTaken(name.to_string()))
        }
        other => StorageError::from(other),
    })?;

    Ok(Account {
        id: AccountId(id),
        name: name.to_string(),
        source_kind,
    })
}

pub async fn get_account(
    conn: &mut SqliteConnection,
    id: AccountId,
) -> Result<Option<Account>, StorageError> {
    let row = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT id, name, source_kind FROM accounts WHERE id = ?",
    )
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|r| -> Result<Account, StorageError> {
        Ok(Account {
            id: AccountId(r.0),
            name: r.1,
            source_kind: parse_kind(&r.2)?,
        })
    })
    .transpose()
}

pub async fn get_all_accounts(conn: &mut SqliteConnection) -> Result<Vec<Account>, StorageError> {
    let rows = sqlx::query_as::<_, (i64, String, String)>(
        "SELECT id, name, source_kind FROM accounts ORDER BY name",
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|r| -> Result<Account, StorageError> {
            Ok(Account {
                id: AccountId(r.0),
                name: r.1,
                source_kind: parse_kind(&r.2)?,
            })
        })
        .collect()
}
