//! HTTP surface of the reconciliation engine. Handlers only translate JSON
//! to engine calls; all state changes happen inside [`Reconciler`].

pub mod config;
pub mod error;
pub mod routes;

use axum::{
    routing::{delete, get, post},
    Router,
};
use matchbook_storage::Reconciler;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
}

impl AppState {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/accounts", post(routes::create_account))
        .route("/accounts/{id}/imports", post(routes::stage_import))
        .route("/accounts/{id}/auto-matches", get(routes::auto_matches))
        .route("/imports/{batch_id}/confirm", post(routes::confirm_import))
        .route("/imports/{batch_id}/detach", post(routes::detach_batch))
        .route("/imports/{batch_id}", delete(routes::purge_batch))
        .route("/matches", post(routes::apply_matches))
        .route("/match-groups/preview", post(routes::preview_group))
        .route("/match-groups", post(routes::apply_group))
        .route("/records/{id}", get(routes::get_record))
        .route(
            "/records/{id}/match",
            get(routes::match_details).delete(routes::unmatch),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
