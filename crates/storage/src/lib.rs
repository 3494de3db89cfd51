pub mod db;
pub mod error;
pub mod locks;
pub mod reconciler;
pub mod records;

pub use db::{create_db, get_account, get_all_accounts, insert_account, DbPool};
pub use error::{Result, StorageError};
pub use locks::{AccountGuard, AccountLocks};
pub use reconciler::{
    GroupSummary, ImportOutcome, ImportPreview, MatchDetails, MatchPair, PurgeOutcome, Reconciler,
};
