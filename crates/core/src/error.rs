use thiserror::Error;

use super::account::{AccountId, BatchId, GroupId, RecordId, SourceKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    #[error("Account not found: {0}")]
    UnknownAccount(AccountId),
    #[error("An account named '{0}' already exists")]
    AccountNameTaken(String),
    #[error("Import batch not found: {0}")]
    UnknownBatch(BatchId),
    #[error("Transaction record not found: {0}")]
    RecordNotFound(RecordId),
    #[error("Import batch {0} was already imported")]
    AlreadyImported(BatchId),
    #[error("Import batch {0} is no longer open")]
    BatchClosed(BatchId),
    #[error("Account {account} holds {expected} records, not {got}")]
    SourceMismatch {
        account: AccountId,
        expected: SourceKind,
        got: SourceKind,
    },
    #[error("Record at position {index} is a {got} record in a {expected} import")]
    KindMismatch {
        index: usize,
        expected: SourceKind,
        got: SourceKind,
    },
    #[error("Invalid type tag: '{0}'")]
    InvalidTypeTag(String),
    #[error("Record at position {0} has a negative amount")]
    NegativeAmount(usize),
    #[error("Record {0} is already matched")]
    AlreadyMatched(RecordId),
    #[error("Record {0} is not matched")]
    NotMatched(RecordId),
    #[error("Match group {0} changed while it was being updated")]
    StaleGroup(GroupId),
    #[error("A match group needs at least one {0} record")]
    EmptyGroupSide(SourceKind),
    #[error("Record {id} is not a {expected} record")]
    WrongSide { id: RecordId, expected: SourceKind },
    #[error("Record {0} appears more than once in the request")]
    DuplicateRecordId(RecordId),
    #[error("Records {bank} and {ledger} are not a match candidate")]
    NotACandidate { bank: RecordId, ledger: RecordId },
}

impl ReconcileError {
    /// Re-confirming a completed batch is a no-op for callers, not a retry case.
    pub fn is_already_imported(&self) -> bool {
        matches!(self, ReconcileError::AlreadyImported(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReconcileError::UnknownAccount(_)
                | ReconcileError::UnknownBatch(_)
                | ReconcileError::RecordNotFound(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ReconcileError::AlreadyImported(_)
                | ReconcileError::AccountNameTaken(_)
                | ReconcileError::BatchClosed(_)
                | ReconcileError::AlreadyMatched(_)
                | ReconcileError::StaleGroup(_)
        )
    }
}
