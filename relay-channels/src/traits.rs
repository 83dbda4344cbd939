use crate::error::Result;
use crate::types::{ChatId, InlineKeyboard, InteractionId, MessageId, OutboundMessage, SentMessage};
use async_trait::async_trait;

/// Outbound side of a chat platform: post messages and update the ones we posted.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    async fn send_message(&self, chat_id: &ChatId, message: OutboundMessage) -> Result<SentMessage>;

    /// Replace the inline keyboard of a sent message. `None` removes it.
    async fn edit_keyboard(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()>;

    /// Acknowledge a button press. With `show_alert` the notice is a modal
    /// shown only to the user who pressed; otherwise a short toast.
    async fn answer_interaction(
        &self,
        interaction_id: &InteractionId,
        notice: Option<&str>,
        show_alert: bool,
    ) -> Result<()>;
}
