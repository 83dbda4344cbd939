use super::error_response;
use crate::http_auth::require_notify_auth;
use crate::order::OrderEvent;
use crate::render::render_notification;
use crate::server::AppState;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json, middleware};
use relay_channels::OutboundMessage;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/notify", post(notify))
        .route_layer(middleware::from_fn(require_notify_auth))
}

#[tracing::instrument(level = "info", skip_all)]
async fn notify(Extension(state): Extension<Arc<AppState>>, body: Bytes) -> Response {
    let event = match parse_event(&body) {
        Ok(event) => event,
        Err(message) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_payload", message);
        }
    };

    let rendered = render_notification(&event, &state.triggers);
    let buttons = rendered.button_count();
    let triggers = rendered
        .triggers
        .iter()
        .map(|trigger| trigger.as_str())
        .collect::<Vec<_>>();
    tracing::info!(
        order_id = ?event.order_id(),
        triggers = ?triggers,
        buttons,
        "order notification rendered"
    );

    let mut message = OutboundMessage::text(rendered.text);
    if let Some(keyboard) = rendered.keyboard {
        message = message.with_keyboard(keyboard);
    }
    match state.notifier.send_message(&state.chat_id, message).await {
        Ok(sent) => Json(serde_json::json!({
            "status": "ok",
            "chat_id": sent.chat_id,
            "message_id": sent.message_id,
            "order_id": event.order_id(),
            "buttons": buttons,
            "triggers": triggers,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(order_id = ?event.order_id(), error = %e, "order notification delivery failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({
                    "status": "error",
                    "error": "telegram delivery failed",
                    "error_code": "delivery_failed",
                    "detail": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

fn parse_event(body: &[u8]) -> Result<OrderEvent, String> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("body is not valid JSON: {e}"))?;
    if !value.is_object() {
        return Err("body must be a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("invalid order event: {e}"))
}
