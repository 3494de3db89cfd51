pub mod account;
pub mod batch;
pub mod config;
pub mod error;
pub mod money;
pub mod period;
pub mod transaction;

pub use account::{Account, AccountId, BatchId, GroupId, RecordId, SourceKind};
pub use batch::{BatchStatus, ImportBatch};
pub use config::{ConfigError, EngineConfig, MatchingConfig};
pub use error::ReconcileError;
pub use money::Money;
pub use period::{days_apart, DateRange};
pub use transaction::{
    BankDirection, Flow, LedgerType, MatchLink, MatchProvenance, NormalizedRecord, ReconState,
    RecordKind, RetainedFingerprint, TransactionRecord,
};

/// Characters of narration kept in signatures and retained fingerprints.
pub const NARRATION_PREFIX_LEN: usize = 50;
