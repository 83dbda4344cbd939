//! Order notification rendering.
//!
//! Turns an [`OrderEvent`] into an HTML message body plus the decision
//! buttons its state calls for. Pure: no I/O, no clock.

use crate::buttons::{ButtonAction, ButtonTag};
use crate::order::{OrderEvent, Responsible};
use relay_channels::{InlineButton, InlineKeyboard};

const HEADER: &str = "📦 <b>Уведомление о заявке</b>";

const LABEL_APPROVE: &str = "✅ Согласовать";
const LABEL_REVISE: &str = "✏️ На доработку";
const LABEL_REJECT: &str = "❌ Отклонить";
const LABEL_RECEIVED: &str = "📦 Получено";
const LABEL_INVOICE: &str = "Открыть счёт";

/// Case-fold and collapse whitespace so `"Доставлено  в тк"` matches
/// `"Доставлено в ТК"`.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Phrases that decide which buttons an event gets. Stored normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRules {
    delivered_status: String,
    approval_phrase: String,
}

impl TriggerRules {
    pub fn new(delivered_status: &str, approval_phrase: &str) -> Self {
        Self {
            delivered_status: normalize(delivered_status),
            approval_phrase: normalize(approval_phrase),
        }
    }

    /// Status equals the delivered-to-carrier label.
    pub fn is_delivered_to_carrier(&self, event: &OrderEvent) -> bool {
        !self.delivered_status.is_empty()
            && event
                .status
                .as_deref()
                .is_some_and(|status| normalize(status) == self.delivered_status)
    }

    /// Comment mentions the approval phrase anywhere.
    pub fn requires_approval(&self, event: &OrderEvent) -> bool {
        !self.approval_phrase.is_empty()
            && event
                .comment
                .as_deref()
                .is_some_and(|comment| normalize(comment).contains(&self.approval_phrase))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTrigger {
    DeliveredToCarrier,
    ApprovalRequired,
    Other,
}

impl EventTrigger {
    /// Every trigger that fires, in keyboard row order. `[Other]` when none do.
    pub fn evaluate(event: &OrderEvent, rules: &TriggerRules) -> Vec<Self> {
        let mut triggers = Vec::new();
        if rules.requires_approval(event) {
            triggers.push(Self::ApprovalRequired);
        }
        if rules.is_delivered_to_carrier(event) {
            triggers.push(Self::DeliveredToCarrier);
        }
        if triggers.is_empty() {
            triggers.push(Self::Other);
        }
        triggers
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeliveredToCarrier => "delivered_to_carrier",
            Self::ApprovalRequired => "approval_required",
            Self::Other => "other",
        }
    }

    fn actions(self) -> &'static [(ButtonTag, &'static str)] {
        match self {
            Self::ApprovalRequired => &[
                (ButtonTag::Approve, LABEL_APPROVE),
                (ButtonTag::Revise, LABEL_REVISE),
                (ButtonTag::Reject, LABEL_REJECT),
            ],
            Self::DeliveredToCarrier => &[(ButtonTag::Received, LABEL_RECEIVED)],
            Self::Other => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedNotification {
    pub text: String,
    pub keyboard: Option<InlineKeyboard>,
    pub triggers: Vec<EventTrigger>,
}

impl RenderedNotification {
    pub fn button_count(&self) -> usize {
        self.keyboard
            .as_ref()
            .map(|keyboard| keyboard.buttons().count())
            .unwrap_or(0)
    }
}

pub fn render_notification(event: &OrderEvent, rules: &TriggerRules) -> RenderedNotification {
    let triggers = EventTrigger::evaluate(event, rules);
    let text = render_text(event);
    let keyboard = build_keyboard(event, &triggers);
    RenderedNotification {
        text,
        keyboard,
        triggers,
    }
}

fn render_text(event: &OrderEvent) -> String {
    let mut text = String::from(HEADER);
    let fields = [
        ("🧾", "Заявка", &event.order_id),
        ("⭐", "Приоритет", &event.priority),
        ("🚚", "Статус", &event.status),
        ("📅", "Дата отгрузки", &event.ship_date),
        ("📦", "Дата прибытия", &event.arrival_date),
        ("🚛", "ТК", &event.carrier),
        ("📄", "№ ТТН", &event.waybill),
        ("👤", "Заявитель", &event.applicant),
        ("🏷", "Получатель", &event.recipient),
        ("💬", "Комментарий", &event.comment),
    ];
    for (icon, label, value) in fields {
        if let Some(value) = value {
            push_line(&mut text, icon, label, &escape_html(value));
        }
    }
    if let Some(mention) = event
        .responsible
        .as_ref()
        .filter(|responsible| !responsible.is_empty())
        .and_then(responsible_mention)
    {
        push_line(&mut text, "👤", "Ответственный", &mention);
    }
    if let Some(url) = event.invoice_url.as_deref().filter(|url| is_http_url(url)) {
        let link = format!(
            "<a href=\"{}\">{LABEL_INVOICE}</a>",
            escape_html(url)
        );
        push_line(&mut text, "🧾", "Счёт", &link);
    }
    text
}

fn push_line(text: &mut String, icon: &str, label: &str, value_html: &str) {
    text.push('\n');
    text.push_str(icon);
    text.push_str(" <b>");
    text.push_str(label);
    text.push_str(":</b> ");
    text.push_str(value_html);
}

fn responsible_mention(responsible: &Responsible) -> Option<String> {
    if let Some(username) = responsible.username.as_deref() {
        let username = username.trim_start_matches('@');
        return Some(format!("@{}", escape_html(username)));
    }
    if let Some(user_id) = responsible.user_id.as_deref() {
        let name = responsible.name.as_deref().unwrap_or(user_id);
        return Some(format!(
            "<a href=\"tg://user?id={}\">{}</a>",
            escape_html(user_id),
            escape_html(name)
        ));
    }
    responsible.name.as_deref().map(escape_html)
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn build_keyboard(event: &OrderEvent, triggers: &[EventTrigger]) -> Option<InlineKeyboard> {
    let Some(order_id) = event.order_id() else {
        if triggers.iter().any(|trigger| !trigger.actions().is_empty()) {
            tracing::warn!(
                triggers = ?triggers,
                "event calls for buttons but has no order id; sending without keyboard"
            );
        }
        return None;
    };

    let mut keyboard = InlineKeyboard::new();
    for trigger in triggers {
        let row = trigger
            .actions()
            .iter()
            .map(|(tag, label)| ButtonAction::new(*tag, order_id).button(*label))
            .collect::<anyhow::Result<Vec<InlineButton>>>();
        match row {
            Ok(row) => keyboard.push_row(row),
            Err(e) => {
                tracing::warn!(
                    order_id,
                    error = %e,
                    "order id does not fit a button payload; sending without keyboard"
                );
                return None;
            }
        }
    }
    (!keyboard.is_empty()).then_some(keyboard)
}
