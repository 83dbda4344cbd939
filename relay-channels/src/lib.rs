//! Chat platform adapters for the order relay.
//!
//! Adapters are pure I/O: they decode platform updates into `InboundUpdate`
//! values and deliver `OutboundMessage`s. No workflow logic lives here.

mod error;
mod telegram;
mod traits;
mod types;

pub use error::{ChannelError, Result};
pub use telegram::{TelegramAdapter, parse_update};
pub use traits::ChatNotifier;
pub use types::{
    Actor, ActorId, BotIdentity, ButtonInteraction, ChatId, InboundMessage, InboundUpdate,
    InlineButton, InlineKeyboard, InteractionId, MessageId, OutboundMessage, SentMessage,
};
