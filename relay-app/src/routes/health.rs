use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

const SERVICE_NAME: &str = "order-relay";

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/", get(get_banner))
        .route("/health", get(get_health))
}

async fn get_banner() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "routes": ["GET /health", "POST /notify", "GET /tg", "POST /tg"],
    }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "pending_revisions": state.pending.len(),
        "open_intakes": state.gateway.open_intakes(),
    }))
}
