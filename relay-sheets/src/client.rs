use crate::error::{Result, SheetError};
use crate::traits::{NewOrder, SheetBackend, StatusUpdate};
use reqwest::{StatusCode, Url};
use std::time::Duration;

const SHEET_DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const SHEET_UPDATE_ACTION: &str = "update_status";
const SHEET_NEW_ORDER_ACTION: &str = "new_order";
const SHEET_AUTH_HEADER: &str = "X-Auth";
const SHEET_ERROR_BODY_LIMIT: usize = 512;

#[derive(Clone)]
pub struct SheetsClient {
    http: reqwest::Client,
    script_url: Url,
    secret: String,
}

impl std::fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsClient")
            .field("script_url", &self.script_url.as_str())
            .finish_non_exhaustive()
    }
}

impl SheetsClient {
    pub fn new(script_url: &str, secret: &str) -> Result<Self> {
        let script_url = script_url.trim();
        let parsed = Url::parse(script_url).map_err(|e| {
            SheetError::InvalidInput(format!("invalid sheet script url {script_url:?}: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SheetError::InvalidInput(format!(
                "sheet script url must be http or https, got {script_url:?}"
            )));
        }
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(SheetError::InvalidInput(
                "sheet secret is required".to_string(),
            ));
        }
        Ok(Self {
            http: build_http_client(SHEET_DEFAULT_TIMEOUT)?,
            script_url: parsed,
            secret: secret.to_string(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(SheetError::InvalidInput(
                "sheet timeout must be > 0".to_string(),
            ));
        }
        self.http = build_http_client(timeout)?;
        Ok(self)
    }

    pub fn script_url(&self) -> &str {
        self.script_url.as_str()
    }

    async fn post(&self, body: &serde_json::Value) -> Result<()> {
        let response = self
            .http
            .post(self.script_url.clone())
            .header(SHEET_AUTH_HEADER, &self.secret)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        interpret_response(status, &text)
    }
}

#[async_trait::async_trait]
impl SheetBackend for SheetsClient {
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(order_id = %update.order_id, status = %update.status, has_comment = update.comment.is_some())
    )]
    async fn update_status(&self, update: &StatusUpdate) -> Result<()> {
        if update.order_id.trim().is_empty() {
            return Err(SheetError::InvalidInput("order id is empty".to_string()));
        }
        self.post(&request_body(&self.secret, update)).await?;
        tracing::info!("sheet status updated");
        Ok(())
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(priority = %order.priority, applicant = %order.applicant)
    )]
    async fn append_order(&self, order: &NewOrder) -> Result<()> {
        if order.title.trim().is_empty() {
            return Err(SheetError::InvalidInput("order title is empty".to_string()));
        }
        self.post(&new_order_body(&self.secret, order)?).await?;
        tracing::info!("sheet order appended");
        Ok(())
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn request_body(secret: &str, update: &StatusUpdate) -> serde_json::Value {
    let mut body = serde_json::json!({
        "secret": secret,
        "action": SHEET_UPDATE_ACTION,
        "order_id": update.order_id,
        "status": update.status,
    });
    if let Some(comment) = update.comment.as_deref() {
        body["comment"] = serde_json::json!(comment);
    }
    body
}

/// The order's fields sit at the top level next to the credential.
fn new_order_body(secret: &str, order: &NewOrder) -> Result<serde_json::Value> {
    let mut body = serde_json::to_value(order)
        .map_err(|e| SheetError::InvalidInput(format!("order is not serializable: {e}")))?;
    body["secret"] = serde_json::json!(secret);
    body["action"] = serde_json::json!(SHEET_NEW_ORDER_ACTION);
    Ok(body)
}

/// A 2xx reply counts as success unless it is a JSON object carrying
/// `"ok": false`. Script deployments that answer with plain text or an
/// HTML page still count as success when the status is 2xx.
fn interpret_response(status: StatusCode, body: &str) -> Result<()> {
    if !status.is_success() {
        return Err(SheetError::Status {
            status: status.as_u16(),
            body: truncate(body),
        });
    }

    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) else {
        tracing::debug!("sheet script replied with a non-json body; treating as success");
        return Ok(());
    };
    if parsed.get("ok").and_then(serde_json::Value::as_bool) == Some(false) {
        let message = parsed
            .get("error")
            .or_else(|| parsed.get("message"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("no error message")
            .to_string();
        return Err(SheetError::Rejected(message));
    }
    Ok(())
}

fn truncate(body: &str) -> String {
    body.chars().take(SHEET_ERROR_BODY_LIMIT).collect()
}
