//! Order relay server.
//!
//! Wires the Telegram adapter, the sheet client and the in-memory pending
//! store into one axum app, plus the one-shot CLI operations.

use crate::config::RelayConfig;
use crate::gateway::Gateway;
use crate::http_auth::{
    NotifyAuthPolicy, NotifyAuthPolicyExt, WebhookSecretPolicy, WebhookSecretPolicyExt,
};
use crate::pending::{InMemoryPendingActions, PendingActionStore};
use crate::render::TriggerRules;
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request};
use axum::response::Response;
use relay_channels::{ChatId, ChatNotifier, OutboundMessage, TelegramAdapter};
use relay_sheets::SheetsClient;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub notifier: Arc<dyn ChatNotifier>,
    pub gateway: Arc<Gateway>,
    pub pending: Arc<dyn PendingActionStore>,
    /// Group chat that receives order notifications.
    pub chat_id: ChatId,
    pub triggers: TriggerRules,
    pub started_at: Instant,
}

/// Routes with state, auth policies and the per-route timeout attached; no
/// transport layers.
pub fn build_router(
    state: Arc<AppState>,
    notify_policy: NotifyAuthPolicy,
    webhook_policy: WebhookSecretPolicy,
    http_timeout: Duration,
) -> axum::Router {
    routes::router(http_timeout)
        .layer(Extension(NotifyAuthPolicyExt(notify_policy)))
        .layer(Extension(WebhookSecretPolicyExt(webhook_policy)))
        .layer(Extension(state))
}

fn build_telegram(cfg: &RelayConfig) -> Result<TelegramAdapter> {
    Ok(TelegramAdapter::new(&cfg.telegram.bot_token)?
        .with_timeout(cfg.telegram_timeout())?
        .with_api_base_url(&cfg.telegram.api_base_url)?)
}

fn build_sheets(cfg: &RelayConfig) -> Result<SheetsClient> {
    Ok(SheetsClient::new(&cfg.sheet.script_url, &cfg.sheet.secret)?
        .with_timeout(cfg.sheet_timeout())?)
}

/// Configured username, else whatever `getMe` reports. Without one,
/// `/cmd@suffix` commands are ignored.
async fn resolve_bot_username(cfg: &RelayConfig, telegram: &TelegramAdapter) -> Option<String> {
    if let Some(username) = cfg.bot_username() {
        return Some(username.to_string());
    }
    match telegram.get_me().await {
        Ok(identity) => {
            tracing::info!(bot_id = identity.id, bot_username = ?identity.username, "bot identity resolved");
            identity.username
        }
        Err(e) => {
            tracing::warn!(error = %e, "getMe failed; suffixed commands will be ignored");
            None
        }
    }
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = RelayConfig::load_with_path(config_path).await?;
    let telegram = build_telegram(&cfg)?;
    let sheets = build_sheets(&cfg)?;
    let identity = telegram
        .get_me()
        .await
        .map_err(|e| anyhow::anyhow!("telegram getMe failed: {e}"))?;
    tracing::info!(
        config_path = %path.display(),
        bind_addr = %cfg.bind_addr()?,
        chat_id = %cfg.telegram.chat_id,
        bot_id = identity.id,
        bot_username = ?identity.username,
        sheet_script_url = %sheets.script_url(),
        webhook_secret_configured = cfg.webhook_secret_token().is_some(),
        "config ok"
    );
    Ok(())
}

pub async fn send_one_shot(config_path: Option<PathBuf>, text: &str) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let telegram = build_telegram(&cfg)?;
    let chat_id = ChatId::new(cfg.telegram.chat_id.trim());
    let sent = telegram
        .send_message(&chat_id, OutboundMessage::text(text))
        .await?;
    tracing::info!(chat_id = %sent.chat_id, message_id = %sent.message_id, "message sent");
    Ok(())
}

pub async fn set_webhook(config_path: Option<PathBuf>, url: &str) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let telegram = build_telegram(&cfg)?;
    telegram
        .set_webhook(url, cfg.webhook_secret_token())
        .await?;
    tracing::info!(
        url,
        secret_token = cfg.webhook_secret_token().is_some(),
        "webhook registered"
    );
    Ok(())
}

pub async fn delete_webhook(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    build_telegram(&cfg)?.delete_webhook().await?;
    tracing::info!("webhook removed");
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = RelayConfig::load_with_path(config_path).await?;
    let started_at = Instant::now();
    let addr = cfg.bind_addr()?;
    tracing::info!(
        config_path = %cfg_path.display(),
        bind_addr = %addr,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        chat_id = %cfg.telegram.chat_id,
        telegram_api_base_url = %cfg.telegram.api_base_url,
        telegram_timeout_seconds = cfg.telegram.timeout_seconds,
        sheet_timeout_seconds = cfg.sheet.timeout_seconds,
        webhook_secret_configured = cfg.webhook_secret_token().is_some(),
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let telegram = build_telegram(&cfg)?;
    let sheets = build_sheets(&cfg)?;
    tracing::info!(sheet_script_url = %sheets.script_url(), "sheet client ready");
    let bot_username = resolve_bot_username(&cfg, &telegram).await;

    let notifier: Arc<dyn ChatNotifier> = Arc::new(telegram);
    let pending: Arc<dyn PendingActionStore> = Arc::new(InMemoryPendingActions::new());
    let gateway = Arc::new(
        Gateway::new(
            notifier.clone(),
            Arc::new(sheets),
            pending.clone(),
            cfg.workflow.status_labels(),
            bot_username,
        )
        .with_priorities(cfg.workflow.priorities.clone()),
    );
    let state = Arc::new(AppState {
        notifier,
        gateway,
        pending,
        chat_id: ChatId::new(cfg.telegram.chat_id.trim()),
        triggers: cfg.workflow.trigger_rules(),
        started_at,
    });

    let router = build_router(
        state,
        NotifyAuthPolicy {
            secret: cfg.notify.secret.clone(),
        },
        WebhookSecretPolicy {
            secret_token: cfg.webhook_secret_token().map(str::to_string),
        },
        cfg.http_timeout(),
    );

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = router
        .layer(GlobalConcurrencyLimitLayer::new(
            cfg.server.http_max_in_flight,
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "order relay serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("http server shutdown completed");
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
}
