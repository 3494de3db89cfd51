use matchbook_core::ReconcileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// The domain error, if this is one rather than an infrastructure failure.
    pub fn reconcile(&self) -> Option<&ReconcileError> {
        match self {
            StorageError::Reconcile(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_already_imported(&self) -> bool {
        self.reconcile().is_some_and(ReconcileError::is_already_imported)
    }
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;
