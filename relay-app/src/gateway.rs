//! Inbound update router.
//!
//! Every Telegram update posted to the webhook lands in [`Gateway::handle_update`].
//! Classification, first match wins:
//!
//! 1. button press: `/neworder` wizard buttons, else the decision flow
//! 2. text from an actor with a pending revision: the text is the comment
//! 3. text starting with `/`: command table
//! 4. text or photo from an actor with an open `/neworder` draft
//! 5. anything else: ignored
//!
//! Collaborator failures are logged and turned into chat notices. Nothing is
//! retried and nothing propagates to the HTTP layer: Telegram redelivers
//! updates that are not answered with 200, and redelivery would repeat side
//! effects. A button press is acknowledged as soon as its outcome is known,
//! before any keyboard edit or follow-up message.

use crate::buttons::{ButtonAction, ButtonTag};
use crate::commands::{self, CommandContext, CommandReply, ParsedCommand};
use crate::intake::{IntakeAction, IntakeFlow, IntakeStep};
use crate::pending::PendingActionStore;
use crate::render::escape_html;
use relay_channels::{
    Actor, ButtonInteraction, ChatId, ChatNotifier, InboundMessage, InboundUpdate,
    InlineKeyboard, MessageId, OutboundMessage,
};
use relay_sheets::{SheetBackend, StatusUpdate};
use serde::Serialize;
use std::sync::Arc;

const NOTICE_ALREADY_HANDLED: &str = "Это действие уже обработано.";
const NOTICE_DONE: &str = "Готово ✅";
const NOTICE_AWAITING_COMMENT: &str = "Напишите комментарий следующим сообщением в чат.";

/// Status column values written back for each decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLabels {
    pub approved: String,
    pub rejected: String,
    pub revision: String,
    pub received: String,
}

impl StatusLabels {
    fn for_decision(&self, tag: ButtonTag) -> Option<&str> {
        match tag {
            ButtonTag::Approve => Some(&self.approved),
            ButtonTag::Reject => Some(&self.rejected),
            ButtonTag::Received => Some(&self.received),
            ButtonTag::Revise | ButtonTag::Noop => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Decision {
        action: &'static str,
        order_id: String,
        applied: bool,
    },
    RevisionRequested {
        order_id: String,
        replaced: Option<String>,
    },
    CommentResolved {
        order_id: String,
        applied: bool,
    },
    Command {
        name: String,
        known: bool,
    },
    IntakeStarted {
        replaced: bool,
    },
    IntakeProgress {
        step: IntakeStep,
        accepted: bool,
    },
    IntakeSubmitted {
        applied: bool,
    },
    IntakeCancelled,
    /// Wizard button pressed by someone without an open draft.
    IntakeMissing,
    /// Payload we did not produce, a `noop` button, or a stale wizard button.
    AlreadyHandled,
    Ignored {
        reason: &'static str,
    },
}

impl UpdateOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Decision { .. } => "decision",
            Self::RevisionRequested { .. } => "revision_requested",
            Self::CommentResolved { .. } => "comment_resolved",
            Self::Command { .. } => "command",
            Self::IntakeStarted { .. } => "intake_started",
            Self::IntakeProgress { .. } => "intake_progress",
            Self::IntakeSubmitted { .. } => "intake_submitted",
            Self::IntakeCancelled => "intake_cancelled",
            Self::IntakeMissing => "intake_missing",
            Self::AlreadyHandled => "already_handled",
            Self::Ignored { .. } => "ignored",
        }
    }
}

pub struct Gateway {
    notifier: Arc<dyn ChatNotifier>,
    backend: Arc<dyn SheetBackend>,
    pending: Arc<dyn PendingActionStore>,
    statuses: StatusLabels,
    bot_username: Option<String>,
    intake: IntakeFlow,
}

impl Gateway {
    pub fn new(
        notifier: Arc<dyn ChatNotifier>,
        backend: Arc<dyn SheetBackend>,
        pending: Arc<dyn PendingActionStore>,
        statuses: StatusLabels,
        bot_username: Option<String>,
    ) -> Self {
        let intake = IntakeFlow::new(notifier.clone(), backend.clone());
        Self {
            notifier,
            backend,
            pending,
            statuses,
            bot_username,
            intake,
        }
    }

    /// Priority choices offered by the `/neworder` wizard.
    pub fn with_priorities(mut self, priorities: Vec<String>) -> Self {
        self.intake = self.intake.with_priorities(priorities);
        self
    }

    pub fn open_intakes(&self) -> usize {
        self.intake.open_drafts()
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(update_id = update.update_id(), update_kind = %update.kind())
    )]
    pub async fn handle_update(&self, update: InboundUpdate) -> UpdateOutcome {
        let outcome = match update {
            InboundUpdate::Interaction(interaction) => self.handle_interaction(interaction).await,
            InboundUpdate::Message(message) => self.handle_message(message).await,
            InboundUpdate::Other { .. } => UpdateOutcome::Ignored {
                reason: "unsupported_update",
            },
        };
        tracing::info!(outcome = outcome.label(), "update handled");
        outcome
    }

    async fn handle_message(&self, message: InboundMessage) -> UpdateOutcome {
        // A bare photo is never a revision comment.
        if !message.text.is_empty() {
            if let Some(order_id) = self.pending.pop(&message.actor.id) {
                return self.resolve_comment(message, order_id).await;
            }
        }

        match commands::parse_command(&message.text, self.bot_username.as_deref()) {
            ParsedCommand::Command { name, args } => {
                tracing::debug!(command = %name, args_len = args.len(), "command received");
                let ctx = CommandContext {
                    actor: &message.actor,
                    chat_id: &message.chat_id,
                };
                match commands::handle_command(&name, &ctx) {
                    CommandReply::StartIntake => self.intake.start(&message).await,
                    CommandReply::Text(reply) => {
                        let reply =
                            OutboundMessage::text(reply).replying_to(message.message_id.clone());
                        send_best_effort(self.notifier.as_ref(), &message.chat_id, reply).await;
                        let known = commands::is_known(&name);
                        UpdateOutcome::Command { name, known }
                    }
                }
            }
            ParsedCommand::AddressedElsewhere => UpdateOutcome::Ignored {
                reason: "command_for_other_bot",
            },
            ParsedCommand::NotACommand => match self.intake.handle_message(&message).await {
                Some(outcome) => outcome,
                None => UpdateOutcome::Ignored {
                    reason: "plain_text",
                },
            },
        }
    }

    async fn handle_interaction(&self, interaction: ButtonInteraction) -> UpdateOutcome {
        if let Some(action) = interaction.payload.as_deref().and_then(IntakeAction::decode) {
            tracing::info!(
                action = ?action,
                actor_id = %interaction.actor.id,
                "intake button pressed"
            );
            return self.intake.handle_action(&interaction, action).await;
        }
        let Some(action) = interaction.payload.as_deref().and_then(ButtonAction::decode) else {
            tracing::info!(payload = ?interaction.payload, "undecodable button payload");
            self.answer(&interaction, Some(NOTICE_ALREADY_HANDLED), false).await;
            return UpdateOutcome::AlreadyHandled;
        };
        tracing::info!(
            action = %action.tag,
            order_id = %action.order_id,
            actor_id = %interaction.actor.id,
            "button pressed"
        );

        match action.tag {
            ButtonTag::Noop => {
                self.answer(&interaction, Some(NOTICE_ALREADY_HANDLED), false).await;
                UpdateOutcome::AlreadyHandled
            }
            ButtonTag::Revise => self.request_revision(&interaction, action.order_id).await,
            tag => self.apply_decision(&interaction, tag, action.order_id).await,
        }
    }

    async fn apply_decision(
        &self,
        interaction: &ButtonInteraction,
        tag: ButtonTag,
        order_id: String,
    ) -> UpdateOutcome {
        let Some(status) = self.statuses.for_decision(tag) else {
            self.answer(interaction, Some(NOTICE_ALREADY_HANDLED), false).await;
            return UpdateOutcome::AlreadyHandled;
        };

        let update = StatusUpdate::new(order_id.as_str(), status);
        if let Err(e) = self.backend.update_status(&update).await {
            tracing::warn!(order_id = %order_id, status, error = %e, "status update failed");
            let notice = format!(
                "Не удалось обновить статус заявки {order_id}. Попробуйте ещё раз позже."
            );
            self.answer(interaction, Some(&notice), true).await;
            return UpdateOutcome::Decision {
                action: tag.as_str(),
                order_id,
                applied: false,
            };
        }

        self.answer(interaction, Some(NOTICE_DONE), false).await;
        let actor = interaction.actor.display_name();
        self.stamp_original(
            interaction,
            &order_id,
            &format!("{} {status} · {actor}", decision_icon(tag)),
        )
        .await;
        if let Some(chat_id) = interaction.chat_id.as_ref() {
            let confirmation = format!(
                "{} Заявка <b>{}</b>: {} ({})",
                decision_icon(tag),
                escape_html(&order_id),
                escape_html(status),
                escape_html(&actor)
            );
            let confirmation = OutboundMessage::text(confirmation);
            send_best_effort(self.notifier.as_ref(), chat_id, confirmation).await;
        }

        UpdateOutcome::Decision {
            action: tag.as_str(),
            order_id,
            applied: true,
        }
    }

    async fn request_revision(
        &self,
        interaction: &ButtonInteraction,
        order_id: String,
    ) -> UpdateOutcome {
        let replaced = self.pending.set(&interaction.actor.id, &order_id);
        if let Some(previous) = replaced.as_deref().filter(|previous| *previous != order_id) {
            tracing::info!(
                actor_id = %interaction.actor.id,
                previous_order_id = %previous,
                order_id = %order_id,
                "pending revision replaced"
            );
        }

        // Without a chat to prompt in, the alert is the only place to say it.
        let show_alert = interaction.chat_id.is_none();
        self.answer(interaction, Some(NOTICE_AWAITING_COMMENT), show_alert).await;

        let actor = interaction.actor.display_name();
        self.stamp_original(interaction, &order_id, &format!("✏️ Ждём комментарий · {actor}"))
            .await;
        if let Some(chat_id) = interaction.chat_id.as_ref() {
            let prompt = format!(
                "✏️ {}, напишите одним сообщением, что нужно доработать по заявке <b>{}</b>.",
                mention(&interaction.actor),
                escape_html(&order_id)
            );
            send_best_effort(self.notifier.as_ref(), chat_id, OutboundMessage::text(prompt)).await;
        }

        UpdateOutcome::RevisionRequested { order_id, replaced }
    }

    async fn resolve_comment(&self, message: InboundMessage, order_id: String) -> UpdateOutcome {
        let comment = message.text.trim().to_string();
        let update = StatusUpdate::new(order_id.as_str(), self.statuses.revision.as_str())
            .with_comment(comment.as_str());
        let (applied, reply) = match self.backend.update_status(&update).await {
            Ok(()) => (
                true,
                format!(
                    "✏️ Заявка <b>{}</b> отправлена на доработку ({}).\n💬 <i>{}</i>",
                    escape_html(&order_id),
                    escape_html(&message.actor.display_name()),
                    escape_html(&comment)
                ),
            ),
            Err(e) => {
                tracing::warn!(order_id = %order_id, error = %e, "revision comment write failed");
                (
                    false,
                    format!(
                        "⚠️ Не удалось обновить статус заявки <b>{}</b>. Нажмите «На доработку» ещё раз.",
                        escape_html(&order_id)
                    ),
                )
            }
        };
        let reply = OutboundMessage::text(reply).replying_to(message.message_id.clone());
        send_best_effort(self.notifier.as_ref(), &message.chat_id, reply).await;
        UpdateOutcome::CommentResolved { order_id, applied }
    }

    /// Swap the original message's buttons for a single inert one.
    async fn stamp_original(&self, interaction: &ButtonInteraction, order_id: &str, label: &str) {
        let (Some(chat_id), Some(message_id)) =
            (interaction.chat_id.as_ref(), interaction.message_id.as_ref())
        else {
            return;
        };
        let keyboard = match ButtonAction::new(ButtonTag::Noop, order_id).button(label) {
            Ok(button) => Some(InlineKeyboard::single(button)),
            Err(e) => {
                tracing::debug!(error = %e, "noop payload does not fit; removing keyboard instead");
                None
            }
        };
        edit_keyboard_best_effort(self.notifier.as_ref(), chat_id, message_id, keyboard).await;
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

pub(crate) async fn edit_keyboard_best_effort(
    notifier: &dyn ChatNotifier,
    chat_id: &ChatId,
    message_id: &MessageId,
    keyboard: Option<InlineKeyboard>,
) {
    if let Err(e) = notifier.edit_keyboard(chat_id, message_id, keyboard).await {
        tracing::warn!(
            chat_id = %chat_id,
            message_id = %message_id,
            error = %e,
            "keyboard edit failed"
        );
    }
}

pub(crate) async fn send_best_effort(
    notifier: &dyn ChatNotifier,
    chat_id: &ChatId,
    message: OutboundMessage,
) {
    if let Err(e) = notifier.send_message(chat_id, message).await {
        tracing::warn!(chat_id = %chat_id, error = %e, "chat message send failed");
    }
}

pub(crate) async fn answer_best_effort(
    notifier: &dyn ChatNotifier,
    interaction: &ButtonInteraction,
    notice: Option<&str>,
    show_alert: bool,
) {
    if let Err(e) = notifier
        .answer_interaction(&interaction.interaction_id, notice, show_alert)
        .await
    {
        tracing::warn!(
            interaction_id = %interaction.interaction_id,
            error = %e,
            "interaction acknowledgement failed"
        );
    }
}

fn decision_icon(tag: ButtonTag) -> &'static str {
    match tag {
        ButtonTag::Approve => "✅",
        ButtonTag::Reject => "❌",
        ButtonTag::Received => "📦",
        ButtonTag::Revise => "✏️",
        ButtonTag::Noop => "•",
    }
}

/// Mention that pings the actor: `@username`, else a `tg://user` link.
fn mention(actor: &Actor) -> String {
    match actor.username.as_deref().filter(|u| !u.is_empty()) {
        Some(username) => format!("@{}", escape_html(username)),
        None => format!(
            "<a href=\"tg://user?id={}\">{}</a>",
            escape_html(actor.id.as_str()),
            escape_html(&actor.display_name())
        ),
    }
}
