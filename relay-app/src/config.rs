//! Relay configuration loader.
//!
//! Sources, later wins: built-in defaults, the TOML file, environment
//! variables (including a `.env` file loaded at startup).

use crate::gateway::StatusLabels;
use crate::intake::DEFAULT_PRIORITIES;
use crate::render::TriggerRules;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "ORDER_RELAY_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "order-relay.toml";
const MAX_TIMEOUT_SECONDS: u64 = 60;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub sheet: SheetConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Group chat that receives order notifications.
    #[serde(default)]
    pub chat_id: String,
    /// Used to accept `/cmd@username`. Looked up via `getMe` when empty.
    #[serde(default)]
    pub bot_username: Option<String>,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` on webhook calls.
    #[serde(default)]
    pub webhook_secret_token: Option<String>,
    #[serde(default = "default_telegram_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_telegram_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_telegram_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_timeout_seconds() -> u64 {
    15
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            bot_username: None,
            webhook_secret_token: None,
            api_base_url: default_telegram_api_base_url(),
            timeout_seconds: default_telegram_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    /// Bearer token the back office presents on `POST /notify`.
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SheetConfig {
    #[serde(default)]
    pub script_url: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_sheet_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_sheet_timeout_seconds() -> u64 {
    20
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            script_url: String::new(),
            secret: String::new(),
            timeout_seconds: default_sheet_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowConfig {
    #[serde(default = "default_approved_status")]
    pub approved_status: String,
    #[serde(default = "default_rejected_status")]
    pub rejected_status: String,
    #[serde(default = "default_revision_status")]
    pub revision_status: String,
    #[serde(default = "default_received_status")]
    pub received_status: String,
    /// Event status that offers the "received" button.
    #[serde(default = "default_delivered_status")]
    pub delivered_status: String,
    /// Comment phrase that offers approve / revise / reject.
    #[serde(default = "default_approval_phrase")]
    pub approval_phrase: String,
    /// Choices offered by the `/neworder` priority keyboard, in order.
    #[serde(default = "default_priorities")]
    pub priorities: Vec<String>,
}

fn default_approved_status() -> String {
    "Согласовано".to_string()
}

fn default_rejected_status() -> String {
    "Отклонено".to_string()
}

fn default_revision_status() -> String {
    "На доработке".to_string()
}

fn default_received_status() -> String {
    "Получено".to_string()
}

fn default_delivered_status() -> String {
    "Доставлено в ТК".to_string()
}

fn default_approval_phrase() -> String {
    "требуется согласование".to_string()
}

fn default_priorities() -> Vec<String> {
    DEFAULT_PRIORITIES.iter().map(|p| p.to_string()).collect()
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            approved_status: default_approved_status(),
            rejected_status: default_rejected_status(),
            revision_status: default_revision_status(),
            received_status: default_received_status(),
            delivered_status: default_delivered_status(),
            approval_phrase: default_approval_phrase(),
            priorities: default_priorities(),
        }
    }
}

impl WorkflowConfig {
    pub fn status_labels(&self) -> StatusLabels {
        StatusLabels {
            approved: self.approved_status.clone(),
            rejected: self.rejected_status.clone(),
            revision: self.revision_status.clone(),
            received: self.received_status.clone(),
        }
    }

    pub fn trigger_rules(&self) -> TriggerRules {
        TriggerRules::new(&self.delivered_status, &self.approval_phrase)
    }
}

impl RelayConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    /// Resolves the file from `path`, then `ORDER_RELAY_CONFIG`, then
    /// `./order-relay.toml`. Only the last may be missing.
    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let explicit = path.or_else(|| {
            std::env::var(CONFIG_PATH_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
        });
        let (path, required) = match explicit {
            Some(path) => (path, true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::parse(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(config_path = %path.display(), "no config file; using defaults and environment");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides_from(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BOT_TOKEN") {
            self.telegram.bot_token = v;
        }
        if let Some(v) = get("CHAT_ID") {
            self.telegram.chat_id = v;
        }
        if let Some(v) = get("BOT_USERNAME") {
            self.telegram.bot_username = Some(v);
        }
        if let Some(v) = get("TELEGRAM_SECRET_TOKEN") {
            self.telegram.webhook_secret_token = Some(v);
        }
        if let Some(v) = get("WEBHOOK_SECRET") {
            self.notify.secret = v;
        }
        if let Some(v) = get("SHEET_SCRIPT_URL") {
            self.sheet.script_url = v;
        }
        if let Some(v) = get("SHEET_SECRET") {
            self.sheet.secret = v;
        }
        if let Some(v) = get("PORT") {
            self.server.bind_addr = format!("0.0.0.0:{}", v.trim());
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let required = [
            ("telegram.bot_token (BOT_TOKEN)", &self.telegram.bot_token),
            ("telegram.chat_id (CHAT_ID)", &self.telegram.chat_id),
            ("notify.secret (WEBHOOK_SECRET)", &self.notify.secret),
            ("sheet.script_url (SHEET_SCRIPT_URL)", &self.sheet.script_url),
            ("sheet.secret (SHEET_SECRET)", &self.sheet.secret),
        ];
        let missing = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(anyhow::anyhow!(
                "missing required config: {}",
                missing.join(", ")
            ));
        }

        self.bind_addr()?;
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        for (name, seconds) in [
            ("server.http_timeout_seconds", self.server.http_timeout_seconds),
            ("telegram.timeout_seconds", self.telegram.timeout_seconds),
            ("sheet.timeout_seconds", self.sheet.timeout_seconds),
        ] {
            if !(1..=MAX_TIMEOUT_SECONDS).contains(&seconds) {
                return Err(anyhow::anyhow!(
                    "{name} must be between 1 and {MAX_TIMEOUT_SECONDS}, got {seconds}"
                ));
            }
        }
        if self.workflow.delivered_status.trim().is_empty()
            || self.workflow.approval_phrase.trim().is_empty()
        {
            return Err(anyhow::anyhow!(
                "workflow.delivered_status and workflow.approval_phrase must not be empty"
            ));
        }
        if self.workflow.priorities.is_empty()
            || self.workflow.priorities.iter().any(|p| p.trim().is_empty())
        {
            return Err(anyhow::anyhow!(
                "workflow.priorities must list at least one non-empty priority"
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| {
                anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", self.server.bind_addr)
            })
    }

    pub fn telegram_timeout(&self) -> Duration {
        Duration::from_secs(self.telegram.timeout_seconds)
    }

    pub fn sheet_timeout(&self) -> Duration {
        Duration::from_secs(self.sheet.timeout_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.server.http_timeout_seconds)
    }

    pub fn bot_username(&self) -> Option<&str> {
        self.telegram
            .bot_username
            .as_deref()
            .map(|name| name.trim().trim_start_matches('@'))
            .filter(|name| !name.is_empty())
    }

    pub fn webhook_secret_token(&self) -> Option<&str> {
        self.telegram
            .webhook_secret_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}
