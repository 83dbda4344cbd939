pub mod health;
pub mod notify;
pub mod telegram;

use axum::Router;
use axum::http::StatusCode;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

/// `/tg` sits outside the request timeout: a webhook call cut short is
/// redelivered by Telegram and would repeat its side effects.
pub fn router(http_timeout: Duration) -> Router {
    Router::new()
        .merge(health::router())
        .merge(notify::router())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            http_timeout,
        ))
        .merge(telegram::router())
}

/// `{"status":"error", ...}` body shared by every non-auth failure.
pub(crate) fn error_response(
    status: axum::http::StatusCode,
    code: &str,
    message: impl Into<String>,
) -> axum::response::Response {
    use axum::response::IntoResponse;
    (
        status,
        axum::Json(serde_json::json!({
            "status": "error",
            "error": message.into(),
            "error_code": code,
        })),
    )
        .into_response()
}
