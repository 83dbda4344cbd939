use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub order_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl StatusUpdate {
    pub fn new(order_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            status: status.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// A purchase request collected in chat, appended as a new sheet row.
/// Optional fields the requester skipped are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewOrder {
    /// `dd.mm.yyyy`, local time of the relay.
    pub date: String,
    pub title: String,
    pub priority: String,
    pub qty: String,
    /// Telegram `file_id`, or a link or description typed instead.
    pub photo: String,
    pub part_no: String,
    pub vin_or_sor: String,
    pub comment: String,
    pub applicant: String,
}

/// Persists order changes in the back office.
#[async_trait]
pub trait SheetBackend: Send + Sync {
    /// Overwrites the status column, so repeating an update is harmless.
    async fn update_status(&self, update: &StatusUpdate) -> Result<()>;

    /// Not idempotent: every call appends a row.
    async fn append_order(&self, order: &NewOrder) -> Result<()>;
}
