use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use matchbook_core::EngineConfig;
use matchbook_server::{build_router, AppState};
use matchbook_storage::Reconciler;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt;

async fn app() -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let reconciler = Reconciler::open(&dir.path().join("api.db"), EngineConfig::default())
        .await
        .unwrap();
    (dir, build_router(AppState::new(reconciler)))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn account(app: &Router, name: &str, kind: &str) -> i64 {
    let (status, body) = send(
        app,
        Method::POST,
        "/accounts",
        Some(json!({ "name": name, "source_kind": kind })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_i64().unwrap()
}

/// Stages and confirms `records`, returning the batch id.
async fn import(app: &Router, account: i64, kind: &str, records: Value) -> i64 {
    let (status, preview) = send(
        app,
        Method::POST,
        &format!("/accounts/{account}/imports"),
        Some(json!({ "source_kind": kind, "records": records })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let batch = preview["batch_id"].as_i64().unwrap();
    let (status, _) = send(
        app,
        Method::POST,
        &format!("/imports/{batch}/confirm"),
        Some(json!({ "records": preview["new"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    batch
}

#[tokio::test]
async fn health_reports_ok() {
    let (_dir, app) = app().await;
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn repeated_confirm_is_a_distinguishable_conflict() {
    let (_dir, app) = app().await;
    let bank = account(&app, "Current", "bank").await;
    let (_, preview) = send(
        &app,
        Method::POST,
        &format!("/accounts/{bank}/imports"),
        Some(json!({
            "source_kind": "bank",
            "records": [{ "date": "2024-03-05", "amount": "50.00", "type": "credit", "narration": "A" }]
        })),
    )
    .await;
    let batch = preview["batch_id"].as_i64().unwrap();
    let confirm = json!({ "records": preview["new"] });

    let (status, outcome) = send(
        &app,
        Method::POST,
        &format!("/imports/{batch}/confirm"),
        Some(confirm.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["imported"], 1);

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/imports/{batch}/confirm"),
        Some(confirm),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_imported");
}

#[tokio::test]
async fn unknown_account_and_bad_tag_are_rejected() {
    let (_dir, app) = app().await;
    let line = json!([{ "date": "2024-03-05", "amount": "1.00", "type": "credit", "narration": "A" }]);
    let (status, body) = send(
        &app,
        Method::POST,
        "/accounts/77/imports",
        Some(json!({ "source_kind": "bank", "records": line })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "unknown_account");

    let bank = account(&app, "Current", "bank").await;
    let bad = json!([{ "date": "2024-03-05", "amount": "1.00", "type": "sideways", "narration": "A" }]);
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/accounts/{bank}/imports"),
        Some(json!({ "source_kind": "bank", "records": bad })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_type_tag");
}

#[tokio::test]
async fn propose_apply_inspect_and_unmatch() {
    let (_dir, app) = app().await;
    let bank = account(&app, "Current", "bank").await;
    let books = account(&app, "Books", "ledger").await;
    let bank_batch = import(
        &app,
        bank,
        "bank",
        json!([{ "date": "2024-03-05", "amount": "5000.00", "type": "credit", "narration": "NEFT CR ACME TRADING" }]),
    )
    .await;
    import(
        &app,
        books,
        "ledger",
        json!([{ "date": "2024-03-04", "amount": "5000.00", "type": "Sale", "narration": "Acme Trading" }]),
    )
    .await;

    let (status, proposals) = send(
        &app,
        Method::GET,
        &format!("/accounts/{bank}/auto-matches?start=2024-03-01&end=2024-03-31"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(proposals.as_array().unwrap().len(), 1);
    assert_eq!(proposals[0]["score"], 145);
    assert_eq!(proposals[0]["band"], "likely");
    let bank_id = proposals[0]["bank_id"].as_i64().unwrap();
    let ledger_id = proposals[0]["ledger_id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        Method::POST,
        "/matches",
        Some(json!({ "pairs": [{ "bank_id": bank_id, "ledger_id": ledger_id }] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, record) = send(&app, Method::GET, &format!("/records/{ledger_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["is_reconciled"], true);
    assert_eq!(record["reconciled_with_id"], bank_id);
    assert_eq!(record["reconciled_with_type"], "bank");

    let (status, details) =
        send(&app, Method::GET, &format!("/records/{bank_id}/match"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(details["provenance"], "auto");
    assert_eq!(details["ledger_side"][0]["id"], ledger_id);

    let (status, body) =
        send(&app, Method::DELETE, &format!("/records/{bank_id}/match"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"].as_array().unwrap().len(), 2);

    let (_, record) = send(&app, Method::GET, &format!("/records/{ledger_id}"), None).await;
    assert_eq!(record["is_reconciled"], false);
    assert_eq!(record["retained_fingerprint"]["account_id"], bank);
    assert_eq!(record["retained_fingerprint"]["date"], "2024-03-05");

    let (status, purged) =
        send(&app, Method::DELETE, &format!("/imports/{bank_batch}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(purged["deleted"], 1);
}

#[tokio::test]
async fn group_endpoints_report_totals_and_conflicts() {
    let (_dir, app) = app().await;
    let bank = account(&app, "Current", "bank").await;
    let books = account(&app, "Books", "ledger").await;
    let bank_batch = import(
        &app,
        bank,
        "bank",
        json!([{ "date": "2024-03-05", "amount": "100.00", "type": "debit", "narration": "VENDOR" }]),
    )
    .await;
    let ledger_batch = import(
        &app,
        books,
        "ledger",
        json!([
            { "date": "2024-03-01", "amount": "60.00", "type": "Purchase", "narration": "Bill 1" },
            { "date": "2024-03-02", "amount": "30.00", "type": "Payment-Out", "narration": "Bill 2" }
        ]),
    )
    .await;
    assert_ne!(bank_batch, ledger_batch);

    // Records are numbered in insertion order across the table.
    let group = json!({ "bank_ids": [1], "ledger_ids": [2, 3] });
    let (status, totals) = send(&app, Method::POST, "/match-groups/preview", Some(group.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(totals["difference"], "10.00");

    let (status, summary) = send(&app, Method::POST, "/match-groups", Some(group.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(summary["group_id"].as_i64().is_some());

    let (status, body) = send(&app, Method::POST, "/match-groups", Some(group)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "already_matched");

    let (status, body) = send(
        &app,
        Method::POST,
        "/match-groups",
        Some(json!({ "bank_ids": [], "ledger_ids": [2] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "empty_group_side");
}
