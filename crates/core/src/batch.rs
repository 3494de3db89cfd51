use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::account::{AccountId, BatchId, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Duplicate detection has run; nothing persisted yet.
    Pending,
    Completed,
    /// Soft-deleted: records survive without a batch tag.
    Detached,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Completed => "completed",
            BatchStatus::Detached => "detached",
        }
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "completed" => Ok(BatchStatus::Completed),
            "detached" => Ok(BatchStatus::Detached),
            other => Err(format!("Unknown batch status: '{other}'")),
        }
    }
}

/// Provenance of one upload, with its per-batch counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: BatchId,
    pub account_id: AccountId,
    pub source_kind: SourceKind,
    pub status: BatchStatus,
    pub staged_count: u32,
    pub duplicate_count: u32,
    pub imported_count: u32,
    pub skipped_count: u32,
    pub restored_count: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportBatch {
    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }
}
