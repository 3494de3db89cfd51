use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use matchbook_core::{
    Account, AccountId, BatchId, DateRange, GroupId, MatchProvenance, Money, NormalizedRecord,
    ReconcileError, RecordId, RecordKind, RetainedFingerprint, SourceKind, TransactionRecord,
};
use matchbook_import::{GroupTotals, MatchCandidate};
use matchbook_storage::{GroupSummary, ImportOutcome, MatchDetails, MatchPair, PurgeOutcome};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

// ── Wire types ────────────────────────────────────────────────────────────────

/// One statement or ledger line as parsers submit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineInput {
    pub date: NaiveDate,
    pub amount: Decimal,
    /// `credit`/`debit` for bank lines, the entry type for ledger lines.
    #[serde(rename = "type")]
    pub type_tag: String,
    pub narration: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub balance: Option<Decimal>,
}

impl LineInput {
    fn normalize(self, source_kind: SourceKind) -> Result<NormalizedRecord, ReconcileError> {
        Ok(NormalizedRecord {
            date: self.date,
            amount: Money::from_decimal(self.amount),
            kind: RecordKind::parse(source_kind, &self.type_tag)?,
            narration: self.narration,
            reference: self.reference,
            balance: self.balance.map(Money::from_decimal),
        })
    }
}

impl From<NormalizedRecord> for LineInput {
    fn from(r: NormalizedRecord) -> Self {
        LineInput {
            date: r.date,
            amount: r.amount.as_decimal(),
            type_tag: r.kind.tag().to_string(),
            narration: r.narration,
            reference: r.reference,
            balance: r.balance.map(Money::as_decimal),
        }
    }
}

fn normalize_all(
    lines: Vec<LineInput>,
    source_kind: SourceKind,
) -> Result<Vec<NormalizedRecord>, ReconcileError> {
    lines.into_iter().map(|l| l.normalize(source_kind)).collect()
}

/// A persisted record in the shape collaborators read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordView {
    pub id: RecordId,
    pub account_id: AccountId,
    pub batch_id: Option<BatchId>,
    pub source_kind: SourceKind,
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub narration: String,
    pub reference: Option<String>,
    pub is_reconciled: bool,
    pub reconciled_with_id: Option<i64>,
    pub reconciled_with_type: Option<String>,
    pub match_group_id: Option<GroupId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retained_fingerprint: Option<RetainedFingerprint>,
}

impl From<TransactionRecord> for RecordView {
    fn from(r: TransactionRecord) -> Self {
        let with = r.state.reconciled_with();
        RecordView {
            id: r.id,
            account_id: r.account_id,
            batch_id: r.batch_id,
            source_kind: r.source_kind(),
            date: r.date,
            amount: r.amount.as_decimal(),
            type_tag: r.kind.tag().to_string(),
            is_reconciled: r.state.is_matched(),
            reconciled_with_id: with.map(|(id, _)| id),
            reconciled_with_type: with.map(|(_, kind)| kind.to_string()),
            match_group_id: r.state.group(),
            narration: r.narration,
            reference: r.reference,
            retained_fingerprint: r.retained,
        }
    }
}

fn views(records: Vec<TransactionRecord>) -> Vec<RecordView> {
    records.into_iter().map(RecordView::from).collect()
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub source_kind: SourceKind,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub source_kind: SourceKind,
    pub records: Vec<LineInput>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportPreviewResponse {
    pub batch_id: BatchId,
    pub new: Vec<LineInput>,
    pub duplicates: Vec<LineInput>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub records: Vec<LineInput>,
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct ApplyMatchesRequest {
    pub pairs: Vec<MatchPair>,
}

#[derive(Debug, Deserialize)]
pub struct GroupRequest {
    pub bank_ids: Vec<RecordId>,
    pub ledger_ids: Vec<RecordId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MatchDetailsResponse {
    pub group_id: GroupId,
    pub provenance: MatchProvenance,
    pub score: Option<u32>,
    pub bank_side: Vec<RecordView>,
    pub ledger_side: Vec<RecordView>,
    pub totals: GroupTotals,
}

impl From<MatchDetails> for MatchDetailsResponse {
    fn from(d: MatchDetails) -> Self {
        MatchDetailsResponse {
            group_id: d.group_id,
            provenance: d.provenance,
            score: d.score,
            bank_side: views(d.bank_side),
            ledger_side: views(d.ledger_side),
            totals: d.totals,
        }
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "matchbook",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    let account = state
        .reconciler
        .create_account(req.name.trim(), req.source_kind)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn stage_import(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(req): Json<ImportRequest>,
) -> ApiResult<Json<ImportPreviewResponse>> {
    let records = normalize_all(req.records, req.source_kind)?;
    let preview = state
        .reconciler
        .import_batch(account_id, req.source_kind, records)
        .await?;
    Ok(Json(ImportPreviewResponse {
        batch_id: preview.batch_id,
        new: preview.new.into_iter().map(LineInput::from).collect(),
        duplicates: preview.duplicates.into_iter().map(LineInput::from).collect(),
    }))
}

pub async fn confirm_import(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
    Json(req): Json<ConfirmRequest>,
) -> ApiResult<Json<ImportOutcome>> {
    let batch = state.reconciler.batch(batch_id).await?;
    let records = normalize_all(req.records, batch.source_kind)?;
    let outcome = state.reconciler.confirm_import(batch_id, records).await?;
    Ok(Json(outcome))
}

pub async fn detach_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> ApiResult<Json<serde_json::Value>> {
    let detached = state.reconciler.detach_batch(batch_id).await?;
    Ok(Json(json!({ "batch_id": batch_id, "detached": detached })))
}

pub async fn purge_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<BatchId>,
) -> ApiResult<Json<PurgeOutcome>> {
    Ok(Json(state.reconciler.purge_batch(batch_id).await?))
}

pub async fn auto_matches(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<Vec<MatchCandidate>>> {
    let range = DateRange::new(range.start, range.end);
    if range.is_empty() {
        return Err(ApiError::BadRequest(format!("empty date range: {range}")));
    }
    let proposals = state
        .reconciler
        .propose_auto_matches(account_id, range)
        .await?;
    Ok(Json(proposals))
}

pub async fn apply_matches(
    State(state): State<AppState>,
    Json(req): Json<ApplyMatchesRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let groups = state.reconciler.apply_matches(req.pairs).await?;
    Ok(Json(json!({ "group_ids": groups })))
}

pub async fn preview_group(
    State(state): State<AppState>,
    Json(req): Json<GroupRequest>,
) -> ApiResult<Json<GroupTotals>> {
    let totals = state
        .reconciler
        .preview_group(&req.bank_ids, &req.ledger_ids)
        .await?;
    Ok(Json(totals))
}

pub async fn apply_group(
    State(state): State<AppState>,
    Json(req): Json<GroupRequest>,
) -> ApiResult<(StatusCode, Json<GroupSummary>)> {
    let summary = state
        .reconciler
        .apply_group(&req.bank_ids, &req.ledger_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> ApiResult<Json<RecordView>> {
    let record = state.reconciler.record(record_id).await?;
    Ok(Json(record.into()))
}

pub async fn match_details(
    State(state): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> ApiResult<Json<MatchDetailsResponse>> {
    let details = state.reconciler.match_details(record_id).await?;
    Ok(Json(details.into()))
}

pub async fn unmatch(
    State(state): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> ApiResult<Json<serde_json::Value>> {
    let released = state.reconciler.unmatch(record_id).await?;
    Ok(Json(json!({ "released": released })))
}
