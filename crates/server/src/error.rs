use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use matchbook_core::ReconcileError;
use matchbook_storage::StorageError;
use serde::Serialize;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Reconcile(ReconcileError),
    Storage(StorageError),
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        ApiError::Reconcile(err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Reconcile(e) => ApiError::Reconcile(e),
            other => ApiError::Storage(other),
        }
    }
}

/// Stable machine-readable name for a domain error; `already_imported` lets
/// clients treat a repeated confirm as done.
fn error_code(err: &ReconcileError) -> &'static str {
    match err {
        ReconcileError::UnknownAccount(_) => "unknown_account",
        ReconcileError::AccountNameTaken(_) => "account_name_taken",
        ReconcileError::UnknownBatch(_) => "unknown_batch",
        ReconcileError::RecordNotFound(_) => "record_not_found",
        ReconcileError::AlreadyImported(_) => "already_imported",
        ReconcileError::BatchClosed(_) => "batch_closed",
        ReconcileError::SourceMismatch { .. } => "source_mismatch",
        ReconcileError::KindMismatch { .. } => "kind_mismatch",
        ReconcileError::InvalidTypeTag(_) => "invalid_type_tag",
        ReconcileError::NegativeAmount(_) => "negative_amount",
        ReconcileError::AlreadyMatched(_) => "already_matched",
        ReconcileError::NotMatched(_) => "not_matched",
        ReconcileError::StaleGroup(_) => "stale_group",
        ReconcileError::EmptyGroupSide(_) => "empty_group_side",
        ReconcileError::WrongSide { .. } => "wrong_side",
        ReconcileError::DuplicateRecordId(_) => "duplicate_record_id",
        ReconcileError::NotACandidate { .. } => "not_a_candidate",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
            code: &'static str,
        }

        let (status, error, code) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "bad_request"),
            ApiError::Reconcile(err) => {
                let status = if err.is_not_found() {
                    StatusCode::NOT_FOUND
                } else if err.is_conflict() {
                    StatusCode::CONFLICT
                } else {
                    StatusCode::BAD_REQUEST
                };
                (status, err.to_string(), error_code(&err))
            }
            ApiError::Storage(err) => {
                tracing::error!(error = %err, "storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "internal",
                )
            }
        };

        (status, Json(ErrorResponse { error, code })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
