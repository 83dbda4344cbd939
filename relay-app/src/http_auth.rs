use axum::Json;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

pub const TELEGRAM_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Shared secret the back office presents as `Authorization: Bearer <secret>`.
#[derive(Debug, Clone, Default)]
pub struct NotifyAuthPolicy {
    pub secret: String,
}

#[derive(Debug, Clone)]
pub struct NotifyAuthPolicyExt(pub NotifyAuthPolicy);

/// Secret Telegram echoes back in `X-Telegram-Bot-Api-Secret-Token` when the
/// webhook was registered with one. `None` disables the check.
#[derive(Debug, Clone, Default)]
pub struct WebhookSecretPolicy {
    pub secret_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebhookSecretPolicyExt(pub WebhookSecretPolicy);

fn parse_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    let max_len = left.len().max(right.len());
    let mut diff = left.len() ^ right.len();
    for idx in 0..max_len {
        let l = left.get(idx).copied().unwrap_or(0);
        let r = right.get(idx).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

fn unauthorized(code: &str, message: impl Into<String>) -> Response {
    let message = message.into();
    tracing::warn!(error_code = code, error = %message, "request rejected");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "status": "error",
            "error": message,
            "error_code": code,
        })),
    )
        .into_response()
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_notify_auth(req: Request<Body>, next: Next) -> Response {
    let policy = req
        .extensions()
        .get::<NotifyAuthPolicyExt>()
        .map(|v| v.0.clone())
        .unwrap_or_default();
    let expected = policy.secret.trim();
    if expected.is_empty() {
        return unauthorized(
            "missing_notify_auth_config",
            "notify requests require notify.secret",
        );
    }

    let Some(provided) = parse_bearer_token(req.headers()) else {
        return unauthorized("missing_bearer_token", "missing bearer token");
    };
    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        return unauthorized("invalid_bearer_token", "invalid bearer token");
    }
    next.run(req).await
}

/// Only POSTs carry updates; the GET probe on the same path stays open.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_webhook_secret(req: Request<Body>, next: Next) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }
    let policy = req
        .extensions()
        .get::<WebhookSecretPolicyExt>()
        .map(|v| v.0.clone())
        .unwrap_or_default();
    let Some(expected) = policy.secret_token.as_deref().filter(|s| !s.is_empty()) else {
        return next.run(req).await;
    };

    let provided = req
        .headers()
        .get(TELEGRAM_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        return unauthorized("invalid_webhook_secret", "invalid webhook secret token");
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::{
        NotifyAuthPolicy, NotifyAuthPolicyExt, TELEGRAM_SECRET_HEADER, WebhookSecretPolicy,
        WebhookSecretPolicyExt, constant_time_eq, parse_bearer_token, require_notify_auth,
        require_webhook_secret,
    };
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::header::AUTHORIZATION;
    use axum::http::{HeaderMap, Request, StatusCode};
    use axum::middleware;
    use axum::routing::post;
    use axum::{Extension, Json};
    use serde_json::json;
    use tower::util::ServiceExt;

    fn notify_router(secret: &str) -> Router {
        Router::new()
            .route("/notify", post(|| async { Json(json!({ "status": "ok" })) }))
            .layer(middleware::from_fn(require_notify_auth))
            .layer(Extension(NotifyAuthPolicyExt(NotifyAuthPolicy {
                secret: secret.to_string(),
            })))
    }

    fn webhook_router(secret_token: Option<&str>) -> Router {
        Router::new()
            .route(
                "/tg",
                post(|| async { Json(json!({ "status": "ok" })) })
                    .get(|| async { Json(json!({ "status": "ok" })) }),
            )
            .layer(middleware::from_fn(require_webhook_secret))
            .layer(Extension(WebhookSecretPolicyExt(WebhookSecretPolicy {
                secret_token: secret_token.map(str::to_string),
            })))
    }

    async fn response_body_json(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        serde_json::from_slice(&body).expect("response json")
    }

    fn post_request(uri: &str, header: Option<(&str, &str)>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).expect("request")
    }

    #[test]
    fn parse_bearer_token_accepts_case_insensitive_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            "bEaReR      token-value".parse().expect("header value"),
        );
        assert_eq!(parse_bearer_token(&headers).as_deref(), Some("token-value"));
    }

    #[test]
    fn parse_bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic abc".parse().expect("header value"));
        assert_eq!(parse_bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer   ".parse().expect("header value"));
        assert_eq!(parse_bearer_token(&headers), None);
    }

    #[test]
    fn constant_time_eq_compares_length_and_content() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret-longer"));
        assert!(!constant_time_eq(b"", b"x"));
    }

    #[tokio::test]
    async fn notify_auth_accepts_matching_bearer() {
        let response = notify_router("s3cret")
            .oneshot(post_request(
                "/notify",
                Some((AUTHORIZATION.as_str(), "bearer s3cret")),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn notify_auth_rejects_missing_and_wrong_bearer() {
        let response = notify_router("s3cret")
            .oneshot(post_request("/notify", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response_body_json(response).await;
        assert_eq!(body["error_code"], "missing_bearer_token");
        assert_eq!(body["status"], "error");

        let response = notify_router("s3cret")
            .oneshot(post_request(
                "/notify",
                Some((AUTHORIZATION.as_str(), "Bearer wrong")),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response_body_json(response).await;
        assert_eq!(body["error_code"], "invalid_bearer_token");
    }

    #[tokio::test]
    async fn notify_auth_fails_closed_without_configured_secret() {
        let response = notify_router("  ")
            .oneshot(post_request(
                "/notify",
                Some((AUTHORIZATION.as_str(), "Bearer anything")),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = response_body_json(response).await;
        assert_eq!(body["error_code"], "missing_notify_auth_config");
    }

    #[tokio::test]
    async fn webhook_secret_is_checked_only_when_configured() {
        let response = webhook_router(None)
            .oneshot(post_request("/tg", None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = webhook_router(Some("tg-secret"))
            .oneshot(post_request("/tg", Some((TELEGRAM_SECRET_HEADER, "nope"))))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = webhook_router(Some("tg-secret"))
            .oneshot(post_request(
                "/tg",
                Some((TELEGRAM_SECRET_HEADER, "tg-secret")),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_probe_skips_secret_check() {
        let response = webhook_router(Some("tg-secret"))
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/tg")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
