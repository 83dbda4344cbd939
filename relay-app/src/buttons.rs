//! Callback payloads attached to inline buttons.
//!
//! Wire form is `<tag>|<order_id>`. The order id may itself contain `|`;
//! decoding splits on the first separator only.

use relay_channels::InlineButton;

const PAYLOAD_SEPARATOR: char = '|';

/// Telegram rejects `callback_data` longer than this many bytes.
pub const MAX_CALLBACK_DATA_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonTag {
    Approve,
    Reject,
    Revise,
    Received,
    /// Inert button left behind once an action has been taken.
    Noop,
}

impl ButtonTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Revise => "revise",
            Self::Received => "received",
            Self::Noop => "noop",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            "revise" => Some(Self::Revise),
            "received" => Some(Self::Received),
            "noop" => Some(Self::Noop),
            _ => None,
        }
    }
}

impl std::fmt::Display for ButtonTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonAction {
    pub tag: ButtonTag,
    pub order_id: String,
}

impl ButtonAction {
    pub fn new(tag: ButtonTag, order_id: impl Into<String>) -> Self {
        Self {
            tag,
            order_id: order_id.into(),
        }
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        if self.order_id.is_empty() {
            return Err(anyhow::anyhow!("button payload requires an order id"));
        }
        let payload = format!("{}{PAYLOAD_SEPARATOR}{}", self.tag, self.order_id);
        if payload.len() > MAX_CALLBACK_DATA_BYTES {
            return Err(anyhow::anyhow!(
                "button payload is {} bytes; limit is {MAX_CALLBACK_DATA_BYTES}",
                payload.len()
            ));
        }
        Ok(payload)
    }

    /// `None` for anything we did not produce: unknown tag, missing separator,
    /// or an empty order id.
    pub fn decode(payload: &str) -> Option<Self> {
        let (tag, order_id) = payload.split_once(PAYLOAD_SEPARATOR)?;
        let tag = ButtonTag::parse(tag)?;
        if order_id.is_empty() {
            return None;
        }
        Some(Self::new(tag, order_id))
    }

    pub fn button(&self, label: impl Into<String>) -> anyhow::Result<InlineButton> {
        Ok(InlineButton::callback(label, self.encode()?))
    }
}
