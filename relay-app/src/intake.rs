//! `/neworder`: a purchase request collected step by step in chat.
//!
//! One draft per (chat, actor). Text and photos fill the text steps; the
//! priority, skip, confirm and cancel buttons drive the rest. Confirming
//! appends the draft to the sheet as a new row.

use crate::gateway::{
    UpdateOutcome, answer_best_effort, edit_keyboard_best_effort, send_best_effort,
};
use crate::render::escape_html;
use chrono::{DateTime, Local, Utc};
use dashmap::DashMap;
use relay_channels::{
    ActorId, ButtonInteraction, ChatId, ChatNotifier, InboundMessage, InlineButton,
    InlineKeyboard, OutboundMessage,
};
use relay_sheets::{NewOrder, SheetBackend};
use serde::Serialize;
use std::sync::Arc;

const PAYLOAD_PREFIX: &str = "new:";

pub const DEFAULT_PRIORITIES: [&str; 3] = ["Аварийно", "Приоритетно", "Планово"];

const NOTICE_NO_DRAFT: &str = "Сессия не найдена. Нажмите /neworder";
const NOTICE_STALE: &str = "Эта кнопка уже неактуальна.";
const NOTICE_SUBMITTED: &str = "Заявка отправлена ✅";
const NOTICE_CANCELLED: &str = "Отменено.";
const NOTICE_SUBMIT_FAILED: &str =
    "Не удалось записать заявку в таблицу. Нажмите «Подтвердить» ещё раз позже.";

const HINT_TEXT: &str = "Ответьте текстом или нажмите «Пропустить».";
const HINT_TITLE: &str = "Введите название заявки текстом.";
const HINT_PRIORITY: &str = "Выберите приоритет кнопкой под сообщением.";
const HINT_QUANTITY: &str = "Укажите количество целым числом, например 2.";
const HINT_PHOTO: &str = "Пришлите фото, ссылку или нажмите «Пропустить».";
const HINT_CONFIRM: &str = "Подтвердите или отмените заявку кнопками под предпросмотром.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeStep {
    Title,
    Priority,
    Quantity,
    Photo,
    PartNumber,
    Vin,
    Comment,
    Confirm,
}

impl IntakeStep {
    fn next(self) -> Self {
        match self {
            Self::Title => Self::Priority,
            Self::Priority => Self::Quantity,
            Self::Quantity => Self::Photo,
            Self::Photo => Self::PartNumber,
            Self::PartNumber => Self::Vin,
            Self::Vin => Self::Comment,
            Self::Comment | Self::Confirm => Self::Confirm,
        }
    }

    fn is_optional(self) -> bool {
        matches!(
            self,
            Self::Photo | Self::PartNumber | Self::Vin | Self::Comment
        )
    }
}

/// Callback payloads of the wizard's buttons, `new:<action>` on the wire.
/// Priorities travel as an index into the configured list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeAction {
    Priority(usize),
    Skip,
    Confirm,
    Cancel,
}

impl IntakeAction {
    pub fn encode(self) -> String {
        match self {
            Self::Priority(index) => format!("{PAYLOAD_PREFIX}prio:{index}"),
            Self::Skip => format!("{PAYLOAD_PREFIX}skip"),
            Self::Confirm => format!("{PAYLOAD_PREFIX}confirm"),
            Self::Cancel => format!("{PAYLOAD_PREFIX}cancel"),
        }
    }

    pub fn decode(payload: &str) -> Option<Self> {
        match payload.strip_prefix(PAYLOAD_PREFIX)? {
            "skip" => Some(Self::Skip),
            "confirm" => Some(Self::Confirm),
            "cancel" => Some(Self::Cancel),
            other => other.strip_prefix("prio:")?.parse().ok().map(Self::Priority),
        }
    }

    fn button(self, label: impl Into<String>) -> InlineButton {
        InlineButton::callback(label, self.encode())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DraftKey {
    chat_id: ChatId,
    actor_id: ActorId,
}

#[derive(Debug, Clone)]
struct Draft {
    step: IntakeStep,
    order: NewOrder,
    started_at: DateTime<Utc>,
}

impl Draft {
    fn new(applicant: String) -> Self {
        Self {
            step: IntakeStep::Title,
            order: NewOrder {
                date: Local::now().format("%d.%m.%Y").to_string(),
                applicant,
                ..NewOrder::default()
            },
            started_at: Utc::now(),
        }
    }

    fn field_mut(&mut self) -> Option<&mut String> {
        let order = &mut self.order;
        match self.step {
            IntakeStep::Title => Some(&mut order.title),
            IntakeStep::Priority => Some(&mut order.priority),
            IntakeStep::Quantity => Some(&mut order.qty),
            IntakeStep::Photo => Some(&mut order.photo),
            IntakeStep::PartNumber => Some(&mut order.part_no),
            IntakeStep::Vin => Some(&mut order.vin_or_sor),
            IntakeStep::Comment => Some(&mut order.comment),
            IntakeStep::Confirm => None,
        }
    }

    fn advance(&mut self, value: String) -> IntakeStep {
        if let Some(field) = self.field_mut() {
            *field = value;
        }
        self.step = self.step.next();
        self.step
    }

    /// `Err` carries a hint for the current step; the draft is unchanged.
    fn accept_text(&mut self, text: &str, photo: Option<&str>) -> Result<IntakeStep, &'static str> {
        let text = text.trim();
        let value = match self.step {
            IntakeStep::Priority => return Err(HINT_PRIORITY),
            IntakeStep::Confirm => return Err(HINT_CONFIRM),
            IntakeStep::Title if text.is_empty() => return Err(HINT_TITLE),
            IntakeStep::Quantity => parse_quantity(text).ok_or(HINT_QUANTITY)?.to_string(),
            IntakeStep::Photo => photo
                .map(str::to_string)
                .or_else(|| (!text.is_empty()).then(|| text.to_string()))
                .ok_or(HINT_PHOTO)?,
            _ if text.is_empty() => return Err(HINT_TEXT),
            _ => text.to_string(),
        };
        Ok(self.advance(value))
    }

    fn skip(&mut self) -> Option<IntakeStep> {
        let optional = self.step.is_optional();
        optional.then(|| self.advance(String::new()))
    }

    fn choose_priority(&mut self, priority: &str) -> Option<IntakeStep> {
        let expected = self.step == IntakeStep::Priority;
        expected.then(|| self.advance(priority.to_string()))
    }
}

fn parse_quantity(text: &str) -> Option<u32> {
    text.parse::<u32>().ok().filter(|qty| *qty > 0)
}

/// HTML preview of a draft; empty fields are left out.
fn render_preview(order: &NewOrder) -> String {
    let mut lines = vec!["📥 <b>Новая заявка (предпросмотр)</b>".to_string()];
    let fields = [
        ("📅 Дата", &order.date),
        ("🧾 Заявка", &order.title),
        ("⭐ Приоритет", &order.priority),
        ("🔢 Кол-во", &order.qty),
        ("🖼 Фото", &order.photo),
        ("🔧 № ЗЧ", &order.part_no),
        ("🚘 VIN / СОР", &order.vin_or_sor),
        ("📝 Комментарий", &order.comment),
        ("👤 Заявитель", &order.applicant),
    ];
    for (label, value) in fields {
        let value = value.trim();
        if !value.is_empty() {
            lines.push(format!("{label}: {}", escape_html(value)));
        }
    }
    lines.join("\n")
}

fn skip_keyboard() -> InlineKeyboard {
    InlineKeyboard::single(IntakeAction::Skip.button("Пропустить"))
}

fn confirm_keyboard() -> InlineKeyboard {
    let mut keyboard = InlineKeyboard::new();
    keyboard.push_row(vec![IntakeAction::Confirm.button("✅ Подтвердить")]);
    keyboard.push_row(vec![IntakeAction::Cancel.button("❌ Отмена")]);
    keyboard
}

pub struct IntakeFlow {
    notifier: Arc<dyn ChatNotifier>,
    backend: Arc<dyn SheetBackend>,
    priorities: Vec<String>,
    drafts: DashMap<DraftKey, Draft>,
}

impl IntakeFlow {
    pub fn new(notifier: Arc<dyn ChatNotifier>, backend: Arc<dyn SheetBackend>) -> Self {
        Self {
            notifier,
            backend,
            priorities: DEFAULT_PRIORITIES.iter().map(|p| p.to_string()).collect(),
            drafts: DashMap::new(),
        }
    }

    /// Blank entries are dropped; an empty list keeps the defaults.
    pub fn with_priorities(mut self, priorities: Vec<String>) -> Self {
        let priorities = priorities
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>();
        if !priorities.is_empty() {
            self.priorities = priorities;
        }
        self
    }

    pub fn open_drafts(&self) -> usize {
        self.drafts.len()
    }

    fn priority_keyboard(&self) -> InlineKeyboard {
        let mut keyboard = InlineKeyboard::new();
        for (index, priority) in self.priorities.iter().enumerate() {
            keyboard.push_row(vec![IntakeAction::Priority(index).button(priority.as_str())]);
        }
        keyboard
    }

    fn prompt(&self, draft: &Draft) -> OutboundMessage {
        match draft.step {
            IntakeStep::Title => {
                OutboundMessage::text("🧾 Введите <b>название заявки</b> (что требуется):")
            }
            IntakeStep::Priority => OutboundMessage::text("⭐ Выберите <b>приоритет</b>:")
                .with_keyboard(self.priority_keyboard()),
            IntakeStep::Quantity => OutboundMessage::text("🔢 Укажите <b>количество</b> (цифрой):"),
            IntakeStep::Photo => OutboundMessage::text(
                "🖼 Пришлите <b>фото</b> или ссылку (или нажмите «Пропустить»):",
            )
            .with_keyboard(skip_keyboard()),
            IntakeStep::PartNumber => {
                OutboundMessage::text("🔧 Укажите <b>№ запасной части</b> (или «Пропустить»):")
                    .with_keyboard(skip_keyboard())
            }
            IntakeStep::Vin => {
                OutboundMessage::text("🚘 Укажите <b>VIN / СОР</b> (или «Пропустить»):")
                    .with_keyboard(skip_keyboard())
            }
            IntakeStep::Comment => {
                OutboundMessage::text("📝 Добавьте <b>комментарий</b> (или «Пропустить»):")
                    .with_keyboard(skip_keyboard())
            }
            IntakeStep::Confirm => OutboundMessage::text(render_preview(&draft.order))
                .with_keyboard(confirm_keyboard()),
        }
    }

    /// Opens a fresh draft, discarding any unfinished one of the same actor.
    pub async fn start(&self, message: &InboundMessage) -> UpdateOutcome {
        let key = DraftKey {
            chat_id: message.chat_id.clone(),
            actor_id: message.actor.id.clone(),
        };
        let draft = Draft::new(message.actor.display_name());
        let prompt = self.prompt(&draft);
        let replaced = self.drafts.insert(key, draft).is_some();
        tracing::info!(
            chat_id = %message.chat_id,
            actor_id = %message.actor.id,
            replaced,
            "new order intake started"
        );
        send_best_effort(
            self.notifier.as_ref(),
            &message.chat_id,
            prompt.replying_to(message.message_id.clone()),
        )
        .await;
        UpdateOutcome::IntakeStarted { replaced }
    }

    /// `None` when the sender has no open draft in this chat.
    pub async fn handle_message(&self, message: &InboundMessage) -> Option<UpdateOutcome> {
        let key = DraftKey {
            chat_id: message.chat_id.clone(),
            actor_id: message.actor.id.clone(),
        };
        let (outcome, reply) = {
            let mut draft = self.drafts.get_mut(&key)?;
            match draft.accept_text(&message.text, message.photo_file_id.as_deref()) {
                Ok(step) => (
                    UpdateOutcome::IntakeProgress {
                        step,
                        accepted: true,
                    },
                    self.prompt(&draft),
                ),
                Err(hint) => (
                    UpdateOutcome::IntakeProgress {
                        step: draft.step,
                        accepted: false,
                    },
                    OutboundMessage::text(hint),
                ),
            }
        };
        send_best_effort(
            self.notifier.as_ref(),
            &message.chat_id,
            reply.replying_to(message.message_id.clone()),
        )
        .await;
        Some(outcome)
    }

    pub async fn handle_action(
        &self,
        interaction: &ButtonInteraction,
        action: IntakeAction,
    ) -> UpdateOutcome {
        let Some(chat_id) = interaction.chat_id.clone() else {
            self.answer(interaction, Some(NOTICE_NO_DRAFT), false).await;
            return UpdateOutcome::IntakeMissing;
        };
        let key = DraftKey {
            chat_id,
            actor_id: interaction.actor.id.clone(),
        };
        match action {
            IntakeAction::Confirm => self.submit(interaction, key).await,
            IntakeAction::Cancel => self.cancel(interaction, key).await,
            IntakeAction::Priority(_) | IntakeAction::Skip => {
                self.apply_button(interaction, key, action).await
            }
        }
    }

    async fn apply_button(
        &self,
        interaction: &ButtonInteraction,
        key: DraftKey,
        action: IntakeAction,
    ) -> UpdateOutcome {
        let transition = self.drafts.get_mut(&key).map(|mut draft| {
            let step = match action {
                IntakeAction::Priority(index) => self
                    .priorities
                    .get(index)
                    .and_then(|priority| draft.choose_priority(priority)),
                IntakeAction::Skip => draft.skip(),
                IntakeAction::Confirm | IntakeAction::Cancel => None,
            };
            step.map(|step| (step, self.prompt(&draft)))
        });

        match transition {
            None => {
                self.answer(interaction, Some(NOTICE_NO_DRAFT), false).await;
                UpdateOutcome::IntakeMissing
            }
            Some(None) => {
                self.answer(interaction, Some(NOTICE_STALE), false).await;
                UpdateOutcome::AlreadyHandled
            }
            Some(Some((step, prompt))) => {
                self.answer(interaction, None, false).await;
                self.clear_keyboard(interaction).await;
                send_best_effort(self.notifier.as_ref(), &key.chat_id, prompt).await;
                UpdateOutcome::IntakeProgress {
                    step,
                    accepted: true,
                }
            }
        }
    }

    async fn submit(&self, interaction: &ButtonInteraction, key: DraftKey) -> UpdateOutcome {
        let Some((key, draft)) = self
            .drafts
            .remove_if(&key, |_, draft| draft.step == IntakeStep::Confirm)
        else {
            return if self.drafts.contains_key(&key) {
                self.answer(interaction, Some(NOTICE_STALE), false).await;
                UpdateOutcome::AlreadyHandled
            } else {
                self.answer(interaction, Some(NOTICE_NO_DRAFT), false).await;
                UpdateOutcome::IntakeMissing
            };
        };

        if let Err(e) = self.backend.append_order(&draft.order).await {
            tracing::warn!(
                chat_id = %key.chat_id,
                actor_id = %key.actor_id,
                error = %e,
                "new order append failed"
            );
            // A draft started while the write was in flight wins.
            self.drafts.entry(key).or_insert(draft);
            self.answer(interaction, Some(NOTICE_SUBMIT_FAILED), true).await;
            return UpdateOutcome::IntakeSubmitted { applied: false };
        }

        tracing::info!(
            chat_id = %key.chat_id,
            actor_id = %key.actor_id,
            priority = %draft.order.priority,
            elapsed_seconds = (Utc::now() - draft.started_at).num_seconds(),
            "new order submitted"
        );
        self.answer(interaction, Some(NOTICE_SUBMITTED), false).await;
        self.clear_keyboard(interaction).await;
        let confirmation = format!(
            "✅ Заявка <b>{}</b> отправлена в лист «Новые заявки». Спасибо!",
            escape_html(&draft.order.title)
        );
        send_best_effort(
            self.notifier.as_ref(),
            &key.chat_id,
            OutboundMessage::text(confirmation),
        )
        .await;
        UpdateOutcome::IntakeSubmitted { applied: true }
    }

    async fn cancel(&self, interaction: &ButtonInteraction, key: DraftKey) -> UpdateOutcome {
        if self.drafts.remove(&key).is_none() {
            self.answer(interaction, Some(NOTICE_NO_DRAFT), false).await;
            return UpdateOutcome::IntakeMissing;
        }
        tracing::info!(
            chat_id = %key.chat_id,
            actor_id = %key.actor_id,
            "new order intake cancelled"
        );
        self.answer(interaction, Some(NOTICE_CANCELLED), false).await;
        self.clear_keyboard(interaction).await;
        send_best_effort(
            self.notifier.as_ref(),
            &key.chat_id,
            OutboundMessage::text("Заявка отменена."),
        )
        .await;
        UpdateOutcome::IntakeCancelled
    }

    async fn clear_keyboard(&self, interaction: &ButtonInteraction) {
        if let (Some(chat_id), Some(message_id)) = (&interaction.chat_id, &interaction.message_id) {
            edit_keyboard_best_effort(self.notifier.as_ref(), chat_id, message_id, None).await;
        }
    }

    async fn answer(
        &self,
        interaction: &ButtonInteraction,
        notice: Option<&str>,
        show_alert: bool,
    ) {
        answer_best_effort(self.notifier.as_ref(), interaction, notice, show_alert).await;
    }
}
