use super::error_response;
use crate::http_auth::require_webhook_secret;
use crate::server::AppState;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json, middleware};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/tg", get(probe).post(webhook))
        .route_layer(middleware::from_fn(require_webhook_secret))
}

async fn probe() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "hint": "Telegram delivers updates here with POST",
    }))
}

/// Answers 200 for every well-formed update, including ones that failed
/// downstream: anything else makes Telegram redeliver it.
#[tracing::instrument(level = "info", skip_all)]
async fn webhook(Extension(state): Extension<Arc<AppState>>, body: Bytes) -> Response {
    let raw = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(raw) => raw,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_update",
                format!("body is not valid JSON: {e}"),
            );
        }
    };

    let update = relay_channels::parse_update(raw);
    let update_id = update.update_id();
    let outcome = state.gateway.handle_update(update).await;
    Json(serde_json::json!({
        "status": "ok",
        "update_id": update_id,
        "result": outcome,
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use crate::http_auth::TELEGRAM_SECRET_HEADER;
    use crate::testing::{
        RecordingBackend, RecordingNotifier, WEBHOOK_SECRET_TOKEN, response_json, test_app,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use relay_sheets::StatusUpdate;
    use serde_json::json;
    use std::time::Duration;
    use tower::util::ServiceExt;

    fn webhook_request(body: String, secret: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/tg")
            .header(TELEGRAM_SECRET_HEADER, secret)
            .body(Body::from(body))
            .expect("request")
    }

    fn callback_update(update_id: i64, payload: &str) -> String {
        json!({
            "update_id": update_id,
            "callback_query": {
                "id": format!("cb-{update_id}"),
                "from": { "id": 42, "is_bot": false, "first_name": "Olga", "username": "olga" },
                "message": {
                    "message_id": 55,
                    "date": 1_700_000_000,
                    "chat": { "id": -100200300, "type": "supergroup", "title": "Orders" }
                },
                "data": payload
            }
        })
        .to_string()
    }

    fn text_update(update_id: i64, text: &str) -> String {
        json!({
            "update_id": update_id,
            "message": {
                "message_id": 77,
                "date": 1_700_000_000,
                "from": { "id": 42, "is_bot": false, "first_name": "Olga", "username": "olga" },
                "chat": { "id": -100200300, "type": "supergroup", "title": "Orders" },
                "text": text
            }
        })
        .to_string()
    }

    fn photo_update(update_id: i64, file_id: &str) -> String {
        json!({
            "update_id": update_id,
            "message": {
                "message_id": 78,
                "date": 1_700_000_000,
                "from": { "id": 42, "is_bot": false, "first_name": "Olga", "username": "olga" },
                "chat": { "id": -100200300, "type": "supergroup", "title": "Orders" },
                "photo": [
                    { "file_id": "small", "file_unique_id": "s", "width": 90, "height": 90 },
                    { "file_id": file_id, "file_unique_id": "l", "width": 1280, "height": 960 }
                ]
            }
        })
        .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn slow_collaborators_do_not_time_out_the_webhook() {
        let app = test_app(
            RecordingNotifier::default().with_delay(Duration::from_secs(6)),
            RecordingBackend::default().with_delay(Duration::from_secs(19)),
        );
        let response = app
            .router
            .oneshot(webhook_request(callback_update(1, "approve|123"), WEBHOOK_SECRET_TOKEN))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["result"]["applied"], true);

        assert_eq!(app.backend.calls(), vec![StatusUpdate::new("123", "Согласовано")]);
        assert_eq!(app.notifier.answers().len(), 1);
        assert_eq!(
            app.notifier.calls(),
            vec!["answerCallbackQuery", "editMessageReplyMarkup", "sendMessage"]
        );
    }

    #[tokio::test]
    async fn neworder_wizard_runs_over_webhook() {
        let app = test_app(RecordingNotifier::default(), RecordingBackend::default());
        let updates = [
            text_update(1, "/neworder"),
            text_update(2, "Фильтр салона"),
            callback_update(3, "new:prio:2"),
            text_update(4, "3"),
            photo_update(5, "photo-large"),
            callback_update(6, "new:skip"),
            callback_update(7, "new:skip"),
            text_update(8, "к пятнице"),
        ];
        for body in updates {
            let response = app
                .router
                .clone()
                .oneshot(webhook_request(body, WEBHOOK_SECRET_TOKEN))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(app.state.gateway.open_intakes(), 1);

        let response = app
            .router
            .clone()
            .oneshot(webhook_request(callback_update(9, "new:confirm"), WEBHOOK_SECRET_TOKEN))
            .await
            .expect("response");
        let json = response_json(response).await;
        assert_eq!(json["result"]["outcome"], "intake_submitted");
        assert_eq!(json["result"]["applied"], true);

        let orders = app.backend.orders();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].title, "Фильтр салона");
        assert_eq!(orders[0].priority, "Планово");
        assert_eq!(orders[0].qty, "3");
        assert_eq!(orders[0].photo, "photo-large");
        assert_eq!(orders[0].part_no, "");
        assert_eq!(orders[0].vin_or_sor, "");
        assert_eq!(orders[0].comment, "к пятнице");
        assert_eq!(orders[0].applicant, "@olga");
        assert!(app.backend.calls().is_empty());
        assert_eq!(app.notifier.answers().len(), 4);
        assert_eq!(app.state.gateway.open_intakes(), 0);
    }

    #[tokio::test]
    async fn revise_then_comment_round_trips_through_webhook() {
        let app = test_app(RecordingNotifier::default(), RecordingBackend::default());

        let response = app
            .router
            .clone()
            .oneshot(webhook_request(callback_update(1, "revise|123"), WEBHOOK_SECRET_TOKEN))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["result"]["outcome"], "revision_requested");

        let response = app
            .router
            .clone()
            .oneshot(webhook_request(text_update(2, "please expedite"), WEBHOOK_SECRET_TOKEN))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["result"]["outcome"], "comment_resolved");
        assert_eq!(json["result"]["applied"], true);

        assert_eq!(
            app.backend.calls(),
            vec![StatusUpdate::new("123", "На доработке").with_comment("please expedite")]
        );
        assert_eq!(app.notifier.answers().len(), 1);
    }

    #[tokio::test]
    async fn failed_mutation_still_answers_200() {
        let app = test_app(RecordingNotifier::default(), RecordingBackend::failing());
        let response = app
            .router
            .oneshot(webhook_request(callback_update(3, "approve|9"), WEBHOOK_SECRET_TOKEN))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["result"]["applied"], false);
        let answers = app.notifier.answers();
        assert_eq!(answers.len(), 1);
        assert!(answers[0].show_alert);
    }

    #[tokio::test]
    async fn unrecognized_update_is_acknowledged() {
        let app = test_app(RecordingNotifier::default(), RecordingBackend::default());
        let body = json!({ "update_id": 4, "my_chat_member": { "date": 1 } }).to_string();
        let response = app
            .router
            .oneshot(webhook_request(body, WEBHOOK_SECRET_TOKEN))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["result"]["outcome"], "ignored");
        assert!(app.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn non_json_body_is_a_bad_request() {
        let app = test_app(RecordingNotifier::default(), RecordingBackend::default());
        let response = app
            .router
            .oneshot(webhook_request("<xml/>".to_string(), WEBHOOK_SECRET_TOKEN))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn wrong_secret_token_is_rejected_before_routing() {
        let app = test_app(RecordingNotifier::default(), RecordingBackend::default());
        let response = app
            .router
            .oneshot(webhook_request(callback_update(5, "approve|1"), "forged"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(app.backend.calls().is_empty());
        assert!(app.notifier.answers().is_empty());
    }

    #[tokio::test]
    async fn probe_answers_get() {
        let app = test_app(RecordingNotifier::default(), RecordingBackend::default());
        let response = app
            .router
            .oneshot(
                Request::builder()
                    .uri("/tg")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
