//! Recording doubles for the notifier and the sheet backend.

use crate::config::RelayConfig;
use crate::gateway::{Gateway, StatusLabels};
use crate::http_auth::{NotifyAuthPolicy, WebhookSecretPolicy};
use crate::pending::InMemoryPendingActions;
use crate::render::TriggerRules;
use crate::server::{AppState, build_router};
use async_trait::async_trait;
use axum::body::to_bytes;
use relay_channels::{
    ChannelError, ChatId, ChatNotifier, InlineKeyboard, InteractionId, MessageId,
    OutboundMessage, SentMessage,
};
use relay_sheets::{NewOrder, SheetBackend, SheetError, StatusUpdate};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const NOTIFY_SECRET: &str = "notify-secret";
pub const WEBHOOK_SECRET_TOKEN: &str = "tg-secret";
pub const GROUP_CHAT_ID: &str = "-100200300";

pub struct TestApp {
    pub router: axum::Router,
    pub notifier: Arc<RecordingNotifier>,
    pub backend: Arc<RecordingBackend>,
    pub state: Arc<AppState>,
}

/// Full route tree over recording doubles, with both secrets configured.
pub fn test_app(notifier: RecordingNotifier, backend: RecordingBackend) -> TestApp {
    let notifier = Arc::new(notifier);
    let backend = Arc::new(backend);
    let pending = Arc::new(InMemoryPendingActions::new());
    let gateway = Arc::new(Gateway::new(
        notifier.clone(),
        backend.clone(),
        pending.clone(),
        StatusLabels {
            approved: "Согласовано".to_string(),
            rejected: "Отклонено".to_string(),
            revision: "На доработке".to_string(),
            received: "Получено".to_string(),
        },
        Some("OrderRelayBot".to_string()),
    ));
    let state = Arc::new(AppState {
        notifier: notifier.clone(),
        gateway,
        pending,
        chat_id: ChatId::new(GROUP_CHAT_ID),
        triggers: TriggerRules::new("Доставлено в ТК", "требуется согласование"),
        started_at: Instant::now(),
    });
    let router = build_router(
        state.clone(),
        NotifyAuthPolicy {
            secret: NOTIFY_SECRET.to_string(),
        },
        WebhookSecretPolicy {
            secret_token: Some(WEBHOOK_SECRET_TOKEN.to_string()),
        },
        RelayConfig::default().http_timeout(),
    );
    TestApp {
        router,
        notifier,
        backend,
        state,
    }
}

pub async fn response_json(response: axum::response::Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body");
    serde_json::from_slice(&body).expect("response json")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAnswer {
    pub interaction_id: InteractionId,
    pub notice: Option<String>,
    pub show_alert: bool,
}

/// Simulated latency; follows tokio's clock, so paused-time tests skip it.
async fn pause(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub fail_sends: bool,
    delay: Option<Duration>,
    next_message_id: AtomicI64,
    calls: Mutex<Vec<&'static str>>,
    sent: Mutex<Vec<(ChatId, OutboundMessage)>>,
    keyboard_edits: Mutex<Vec<(ChatId, MessageId, Option<InlineKeyboard>)>>,
    answers: Mutex<Vec<RecordedAnswer>>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Bot API method names in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("calls lock").clone()
    }

    async fn record(&self, method: &'static str) {
        self.calls.lock().expect("calls lock").push(method);
        pause(self.delay).await;
    }

    pub fn sent(&self) -> Vec<(ChatId, OutboundMessage)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn keyboard_edits(&self) -> Vec<(ChatId, MessageId, Option<InlineKeyboard>)> {
        self.keyboard_edits.lock().expect("edits lock").clone()
    }

    pub fn answers(&self) -> Vec<RecordedAnswer> {
        self.answers.lock().expect("answers lock").clone()
    }
}

#[async_trait]
impl ChatNotifier for RecordingNotifier {
    async fn send_message(
        &self,
        chat_id: &ChatId,
        message: OutboundMessage,
    ) -> relay_channels::Result<SentMessage> {
        self.record("sendMessage").await;
        if self.fail_sends {
            return Err(ChannelError::Api {
                method: "sendMessage".to_string(),
                code: 400,
                description: "Bad Request: chat not found".to_string(),
            });
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((chat_id.clone(), message));
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1000;
        Ok(SentMessage {
            chat_id: chat_id.clone(),
            message_id: MessageId::new(id.to_string()),
        })
    }

    async fn edit_keyboard(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        keyboard: Option<InlineKeyboard>,
    ) -> relay_channels::Result<()> {
        self.record("editMessageReplyMarkup").await;
        self.keyboard_edits.lock().expect("edits lock").push((
            chat_id.clone(),
            message_id.clone(),
            keyboard,
        ));
        Ok(())
    }

    async fn answer_interaction(
        &self,
        interaction_id: &InteractionId,
        notice: Option<&str>,
        show_alert: bool,
    ) -> relay_channels::Result<()> {
        self.record("answerCallbackQuery").await;
        self.answers.lock().expect("answers lock").push(RecordedAnswer {
            interaction_id: interaction_id.clone(),
            notice: notice.map(str::to_string),
            show_alert,
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub fail: bool,
    delay: Option<Duration>,
    calls: Mutex<Vec<StatusUpdate>>,
    orders: Mutex<Vec<NewOrder>>,
}

impl RecordingBackend {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<StatusUpdate> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn orders(&self) -> Vec<NewOrder> {
        self.orders.lock().expect("orders lock").clone()
    }

    fn outcome(&self) -> relay_sheets::Result<()> {
        if self.fail {
            return Err(SheetError::Status {
                status: 500,
                body: "script error".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SheetBackend for RecordingBackend {
    async fn update_status(&self, update: &StatusUpdate) -> relay_sheets::Result<()> {
        pause(self.delay).await;
        self.calls.lock().expect("calls lock").push(update.clone());
        self.outcome()
    }

    async fn append_order(&self, order: &NewOrder) -> relay_sheets::Result<()> {
        pause(self.delay).await;
        let result = self.outcome();
        if result.is_ok() {
            self.orders.lock().expect("orders lock").push(order.clone());
        }
        result
    }
}
