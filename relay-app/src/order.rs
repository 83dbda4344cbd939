//! Order events posted by the back office.
//!
//! Spreadsheet scripts are loose about types: the same column may arrive as a
//! string in one row and a number in the next. Every scalar field is therefore
//! accepted as a string, number, or boolean and normalized to a trimmed string,
//! with empty values treated as absent.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEvent {
    #[serde(default, deserialize_with = "lenient_string")]
    pub order_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub ship_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub arrival_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub carrier: Option<String>,
    #[serde(default, alias = "ttn", deserialize_with = "lenient_string")]
    pub waybill: Option<String>,
    #[serde(default, alias = "requester", deserialize_with = "lenient_string")]
    pub applicant: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub recipient: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub comment: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub invoice_url: Option<String>,
    #[serde(default)]
    pub responsible: Option<Responsible>,
}

impl OrderEvent {
    pub fn order_id(&self) -> Option<&str> {
        self.order_id.as_deref()
    }
}

/// Person in charge of the order, rendered as a mention line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Responsible {
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: Option<String>,
}

impl Responsible {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.username.is_none() && self.user_id.is_none()
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let text = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a string, number, or boolean, got {}",
                json_kind(&other)
            )));
        }
    };
    let trimmed = text.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
        _ => "a scalar",
    }
}
