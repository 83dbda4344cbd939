use crate::error::{ChannelError, Result};
use crate::traits::ChatNotifier;
use crate::types::{
    Actor, BotIdentity, ButtonInteraction, ChatId, InboundMessage, InboundUpdate, InlineKeyboard,
    InteractionId, MessageId, OutboundMessage, SentMessage,
};
use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

const TELEGRAM_DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";
const TELEGRAM_DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const TELEGRAM_PARSE_MODE: &str = "HTML";
const TELEGRAM_WEBHOOK_ALLOWED_UPDATES: [&str; 3] = ["message", "channel_post", "callback_query"];
const TELEGRAM_NOT_MODIFIED: &str = "message is not modified";

#[derive(Clone)]
pub struct TelegramAdapter {
    http: reqwest::Client,
    bot_token: String,
    api_base_url: String,
}

impl TelegramAdapter {
    pub fn new(bot_token: &str) -> Result<Self> {
        let bot_token = bot_token.trim();
        if bot_token.is_empty() {
            return Err(ChannelError::InvalidInput(
                "telegram bot token is required".to_string(),
            ));
        }
        Ok(Self {
            http: build_http_client(TELEGRAM_DEFAULT_TIMEOUT)?,
            bot_token: bot_token.to_string(),
            api_base_url: TELEGRAM_DEFAULT_API_BASE_URL.to_string(),
        })
    }

    /// Every Bot API call is bounded by this timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(ChannelError::InvalidInput(
                "telegram timeout must be > 0".to_string(),
            ));
        }
        self.http = build_http_client(timeout)?;
        Ok(self)
    }

    /// Point the adapter at a self-hosted Bot API server.
    pub fn with_api_base_url(mut self, api_base_url: &str) -> Result<Self> {
        let trimmed = api_base_url.trim().trim_end_matches('/');
        let parsed = Url::parse(trimmed).map_err(|e| {
            ChannelError::InvalidInput(format!("invalid telegram api base url {trimmed:?}: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ChannelError::InvalidInput(format!(
                "telegram api base url must be http or https, got {trimmed:?}"
            )));
        }
        self.api_base_url = trimmed.to_string();
        Ok(self)
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Url::parse(&format!(
            "{}/bot{}/{}",
            self.api_base_url, self.bot_token, method
        ))
        .map_err(|e| ChannelError::InvalidInput(format!("invalid telegram api url: {e}")))
    }

    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn call<T: DeserializeOwned>(&self, method: &str, body: &serde_json::Value) -> Result<T> {
        let url = self.api_url(method)?;
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        decode_api_response(method, status, &text)
    }

    /// Edits fail with "message is not modified" when a duplicate click
    /// re-applies the same keyboard; that is not an error for us.
    async fn call_edit(&self, method: &str, body: &serde_json::Value) -> Result<()> {
        match self.call::<serde_json::Value>(method, body).await {
            Ok(_) => Ok(()),
            Err(ChannelError::Api { description, .. })
                if description.contains(TELEGRAM_NOT_MODIFIED) =>
            {
                tracing::debug!(method, "telegram edit was a no-op");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    pub async fn get_me(&self) -> Result<BotIdentity> {
        let user: TelegramUser = self.call("getMe", &serde_json::json!({})).await?;
        Ok(BotIdentity {
            id: user.id,
            username: user.username,
        })
    }

    pub async fn set_webhook(&self, url: &str, secret_token: Option<&str>) -> Result<()> {
        let url = url.trim();
        let parsed = Url::parse(url)
            .map_err(|e| ChannelError::InvalidInput(format!("invalid webhook url {url:?}: {e}")))?;
        if parsed.scheme() != "https" {
            return Err(ChannelError::InvalidInput(
                "telegram only delivers webhooks to https urls".to_string(),
            ));
        }
        let mut body = serde_json::json!({
            "url": url,
            "allowed_updates": TELEGRAM_WEBHOOK_ALLOWED_UPDATES,
        });
        if let Some(secret_token) = secret_token.map(str::trim).filter(|s| !s.is_empty()) {
            body["secret_token"] = serde_json::json!(secret_token);
        }
        let _: bool = self.call("setWebhook", &body).await?;
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self.call("deleteWebhook", &serde_json::json!({})).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChatNotifier for TelegramAdapter {
    #[tracing::instrument(level = "info", skip_all, fields(chat_id = %chat_id))]
    async fn send_message(
        &self,
        chat_id: &ChatId,
        message: OutboundMessage,
    ) -> Result<SentMessage> {
        if message.text.trim().is_empty() {
            return Err(ChannelError::InvalidInput(
                "message text is empty".to_string(),
            ));
        }
        let body = send_message_body(chat_id, &message);
        let sent: TelegramMessage = self.call("sendMessage", &body).await?;
        let chat_id = sent
            .chat
            .map(|chat| ChatId::new(chat.id.to_string()))
            .unwrap_or_else(|| chat_id.clone());
        let message_id = sent.message_id.ok_or_else(|| {
            ChannelError::ResponseFormat("sendMessage result has no message_id".to_string())
        })?;
        Ok(SentMessage {
            chat_id,
            message_id: MessageId::new(message_id.to_string()),
        })
    }

    #[tracing::instrument(level = "info", skip_all, fields(chat_id = %chat_id, message_id = %message_id))]
    async fn edit_keyboard(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": numeric_message_id(message_id)?,
            "reply_markup": keyboard.unwrap_or_default(),
        });
        self.call_edit("editMessageReplyMarkup", &body).await
    }

    #[tracing::instrument(level = "info", skip_all, fields(interaction_id = %interaction_id))]
    async fn answer_interaction(
        &self,
        interaction_id: &InteractionId,
        notice: Option<&str>,
        show_alert: bool,
    ) -> Result<()> {
        let mut body = serde_json::json!({ "callback_query_id": interaction_id });
        if let Some(notice) = notice.map(str::trim).filter(|n| !n.is_empty()) {
            body["text"] = serde_json::json!(notice);
            if show_alert {
                body["show_alert"] = serde_json::json!(true);
            }
        }
        let _: bool = self.call("answerCallbackQuery", &body).await?;
        Ok(())
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn send_message_body(chat_id: &ChatId, message: &OutboundMessage) -> serde_json::Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": message.text,
        "parse_mode": TELEGRAM_PARSE_MODE,
        "link_preview_options": { "is_disabled": true },
    });
    if let Some(keyboard) = message.keyboard.as_ref().filter(|k| !k.is_empty()) {
        body["reply_markup"] = serde_json::json!(keyboard);
    }
    if let Some(reply_to) = message.reply_to_message_id.as_ref() {
        if let Ok(reply_to) = reply_to.parse::<i64>() {
            body["reply_parameters"] = serde_json::json!({
                "message_id": reply_to,
                "allow_sending_without_reply": true,
            });
        }
    }
    body
}

fn numeric_message_id(message_id: &MessageId) -> Result<i64> {
    message_id.parse::<i64>().map_err(|_| {
        ChannelError::InvalidInput(format!("telegram message id must be numeric: {message_id}"))
    })
}

fn decode_api_response<T: DeserializeOwned>(
    method: &str,
    status: StatusCode,
    body: &str,
) -> Result<T> {
    let envelope: TelegramApiResponse<T> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(error) => {
            if status.is_success() {
                return Err(ChannelError::ResponseFormat(format!(
                    "telegram {method} returned undecodable body: {error}"
                )));
            }
            return Err(ChannelError::Api {
                method: method.to_string(),
                code: status.as_u16(),
                description: body.chars().take(512).collect(),
            });
        }
    };

    if !envelope.ok || !status.is_success() {
        return Err(ChannelError::Api {
            method: method.to_string(),
            code: envelope.error_code.unwrap_or(status.as_u16()),
            description: envelope
                .description
                .unwrap_or_else(|| "no description".to_string()),
        });
    }

    envelope.result.ok_or_else(|| {
        ChannelError::ResponseFormat(format!("telegram {method} returned ok without result"))
    })
}

/// Decode one webhook update. Never fails: shapes we do not act on become
/// `InboundUpdate::Other` so the webhook can still acknowledge them.
pub fn parse_update(raw: serde_json::Value) -> InboundUpdate {
    let update_kind = update_kind(&raw);
    let update: TelegramUpdate = match serde_json::from_value(raw) {
        Ok(update) => update,
        Err(error) => {
            tracing::debug!(%error, "telegram update did not match the expected shape");
            return InboundUpdate::Other {
                update_id: 0,
                update_kind: "unrecognized".to_string(),
            };
        }
    };

    if let Some(callback) = update.callback_query {
        return InboundUpdate::Interaction(build_interaction(update.update_id, callback));
    }

    let message = update.message.or(update.channel_post);
    if let Some(inbound) = message.and_then(|m| build_message(update.update_id, m)) {
        return InboundUpdate::Message(inbound);
    }

    InboundUpdate::Other {
        update_id: update.update_id,
        update_kind,
    }
}

fn update_kind(raw: &serde_json::Value) -> String {
    raw.as_object()
        .and_then(|object| object.keys().find(|key| key.as_str() != "update_id"))
        .cloned()
        .unwrap_or_else(|| "unrecognized".to_string())
}

fn build_interaction(update_id: i64, callback: TelegramCallbackQuery) -> ButtonInteraction {
    let chat_id = callback
        .message
        .as_ref()
        .and_then(|message| message.chat.as_ref())
        .map(|chat| ChatId::new(chat.id.to_string()));
    let message_id = callback
        .message
        .as_ref()
        .and_then(|message| message.message_id)
        .map(|id| MessageId::new(id.to_string()));

    ButtonInteraction {
        update_id,
        interaction_id: InteractionId::new(callback.id),
        actor: actor_from_user(&callback.from),
        chat_id,
        message_id,
        payload: callback.data.filter(|data| !data.is_empty()),
        received_at: Utc::now(),
    }
}

fn build_message(update_id: i64, message: TelegramMessage) -> Option<InboundMessage> {
    let chat = message.chat.as_ref()?;
    let photo_file_id = largest_photo(&message);
    let text = match extract_message_text(&message) {
        Some(text) => text,
        None if photo_file_id.is_some() => String::new(),
        None => return None,
    };
    let actor = match message.from.as_ref() {
        Some(user) => actor_from_user(user),
        None => {
            let sender_chat = message.sender_chat.as_ref().unwrap_or(chat);
            Actor {
                id: format!("chat:{}", sender_chat.id).into(),
                username: sender_chat.username.clone(),
                first_name: sender_chat.title.clone(),
            }
        }
    };
    let message_id = message
        .message_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| format!("update:{update_id}:message"));

    Some(InboundMessage {
        update_id,
        message_id: message_id.into(),
        chat_id: chat.id.to_string().into(),
        actor,
        text,
        photo_file_id,
        received_at: Utc::now(),
    })
}

fn actor_from_user(user: &TelegramUser) -> Actor {
    Actor {
        id: user.id.to_string().into(),
        username: user.username.clone(),
        first_name: user.first_name.clone(),
    }
}

fn extract_message_text(message: &TelegramMessage) -> Option<String> {
    [message.text.as_deref(), message.caption.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(ToOwned::to_owned)
}

/// Telegram lists photo sizes smallest first.
fn largest_photo(message: &TelegramMessage) -> Option<String> {
    message
        .photo
        .as_ref()?
        .last()
        .map(|size| size.file_id.clone())
        .filter(|file_id| !file_id.is_empty())
}

#[derive(Debug, Deserialize)]
struct TelegramApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    #[serde(default)]
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    channel_post: Option<TelegramMessage>,
    #[serde(default)]
    callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TelegramCallbackQuery {
    id: String,
    from: TelegramUser,
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    #[serde(default)]
    message_id: Option<i64>,
    #[serde(default)]
    from: Option<TelegramUser>,
    #[serde(default)]
    sender_chat: Option<TelegramChat>,
    #[serde(default)]
    chat: Option<TelegramChat>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    photo: Option<Vec<TelegramPhotoSize>>,
}

#[derive(Debug, Deserialize)]
struct TelegramPhotoSize {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::{
        TelegramAdapter, decode_api_response, numeric_message_id, parse_update,
        send_message_body,
    };
    use crate::error::ChannelError;
    use crate::types::{
        ChatId, InboundUpdate, InlineButton, InlineKeyboard, MessageId, OutboundMessage,
    };
    use reqwest::StatusCode;

    #[test]
    fn parse_update_decodes_callback_query() {
        let update = parse_update(serde_json::json!({
            "update_id": 10,
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 42, "username": "olga", "first_name": "Olga" },
                "message": { "message_id": 7, "chat": { "id": -100, "type": "supergroup" } },
                "data": "approve|123"
            }
        }));
        let InboundUpdate::Interaction(interaction) = update else {
            panic!("expected interaction");
        };
        assert_eq!(interaction.update_id, 10);
        assert_eq!(interaction.interaction_id.as_str(), "cb-1");
        assert_eq!(interaction.actor.id.as_str(), "42");
        assert_eq!(interaction.chat_id.as_deref(), Some("-100"));
        assert_eq!(interaction.message_id.as_deref(), Some("7"));
        assert_eq!(interaction.payload.as_deref(), Some("approve|123"));
    }

    #[test]
    fn parse_update_decodes_group_text_message() {
        let update = parse_update(serde_json::json!({
            "update_id": 11,
            "message": {
                "message_id": 5,
                "from": { "id": 42, "first_name": "Olga" },
                "chat": { "id": -100, "type": "group" },
                "text": "  please expedite  "
            }
        }));
        let InboundUpdate::Message(message) = update else {
            panic!("expected message");
        };
        assert_eq!(message.text, "please expedite");
        assert_eq!(message.actor.id.as_str(), "42");
        assert_eq!(message.chat_id.as_str(), "-100");
        assert_eq!(message.photo_file_id, None);
    }

    #[test]
    fn channel_post_without_sender_uses_chat_actor() {
        let update = parse_update(serde_json::json!({
            "update_id": 12,
            "channel_post": {
                "message_id": 9,
                "chat": { "id": -200, "type": "channel", "title": "Snab" },
                "text": "/id"
            }
        }));
        let InboundUpdate::Message(message) = update else {
            panic!("expected message");
        };
        assert_eq!(message.actor.id.as_str(), "chat:-200");
        assert_eq!(message.actor.display_name(), "Snab");
    }

    #[test]
    fn caption_is_used_when_text_is_absent() {
        let update = parse_update(serde_json::json!({
            "update_id": 13,
            "message": {
                "message_id": 1,
                "from": { "id": 1 },
                "chat": { "id": 1, "type": "private" },
                "photo": [{ "file_id": "abc" }],
                "caption": "see photo"
            }
        }));
        let InboundUpdate::Message(message) = update else {
            panic!("expected message");
        };
        assert_eq!(message.text, "see photo");
        assert_eq!(message.photo_file_id.as_deref(), Some("abc"));
    }

    #[test]
    fn photo_without_caption_keeps_largest_size() {
        let update = parse_update(serde_json::json!({
            "update_id": 16,
            "message": {
                "message_id": 3,
                "from": { "id": 42 },
                "chat": { "id": -100, "type": "group" },
                "photo": [
                    { "file_id": "small", "width": 90, "height": 90 },
                    { "file_id": "large", "width": 1280, "height": 1280 }
                ]
            }
        }));
        let InboundUpdate::Message(message) = update else {
            panic!("expected message");
        };
        assert_eq!(message.text, "");
        assert_eq!(message.photo_file_id.as_deref(), Some("large"));
    }

    #[test]
    fn unsupported_updates_become_other_with_their_kind() {
        let edited = parse_update(serde_json::json!({
            "update_id": 14,
            "edited_message": { "message_id": 1, "chat": { "id": 1, "type": "private" }, "text": "x" }
        }));
        assert_eq!(edited.kind(), "edited_message");
        assert_eq!(edited.update_id(), 14);

        let media_only = parse_update(serde_json::json!({
            "update_id": 15,
            "message": { "message_id": 1, "chat": { "id": 1, "type": "private" }, "sticker": {} }
        }));
        assert_eq!(media_only.kind(), "message");
        assert!(matches!(media_only, InboundUpdate::Other { .. }));

        let garbage = parse_update(serde_json::json!(["not", "an", "update"]));
        assert_eq!(garbage.kind(), "unrecognized");
    }

    #[test]
    fn decode_api_response_maps_failures() {
        let ok: bool = decode_api_response(
            "answerCallbackQuery",
            StatusCode::OK,
            r#"{"ok":true,"result":true}"#,
        )
        .expect("ok response");
        assert!(ok);

        let err = decode_api_response::<bool>(
            "sendMessage",
            StatusCode::BAD_REQUEST,
            r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#,
        )
        .expect_err("api error");
        match err {
            ChannelError::Api { method, code, description } => {
                assert_eq!(method, "sendMessage");
                assert_eq!(code, 400);
                assert!(description.contains("chat not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err =
            decode_api_response::<bool>("getMe", StatusCode::BAD_GATEWAY, "<html>oops</html>")
                .expect_err("gateway error");
        assert!(matches!(err, ChannelError::Api { code: 502, .. }));
    }

    #[test]
    fn send_message_body_includes_keyboard_and_html_mode() {
        let message = OutboundMessage::text("<b>hi</b>")
            .with_keyboard(InlineKeyboard::single(InlineButton::callback("OK", "received|1")))
            .replying_to(MessageId::new("77"));
        let body = send_message_body(&ChatId::new("-100"), &message);
        assert_eq!(body["chat_id"], "-100");
        assert_eq!(body["parse_mode"], "HTML");
        assert_eq!(
            body["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "received|1"
        );
        assert_eq!(body["reply_parameters"]["message_id"], 77);
    }

    #[test]
    fn numeric_message_id_rejects_synthetic_ids() {
        assert_eq!(numeric_message_id(&MessageId::new("12")).expect("numeric"), 12);
        assert!(numeric_message_id(&MessageId::new("update:1:message")).is_err());
    }

    #[test]
    fn adapter_validates_token_and_base_url() {
        assert!(TelegramAdapter::new("  ").is_err());
        let adapter = TelegramAdapter::new("123:abc").expect("adapter");
        assert!(adapter.clone().with_api_base_url("ftp://example.com").is_err());
        let adapter = adapter
            .with_api_base_url("http://127.0.0.1:8081/")
            .expect("base url");
        assert_eq!(
            adapter.api_url("getMe").expect("url").as_str(),
            "http://127.0.0.1:8081/bot123:abc/getMe"
        );
    }
}
