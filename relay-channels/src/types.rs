use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(MessageId);
id_newtype!(ChatId);
id_newtype!(ActorId);
id_newtype!(InteractionId);

/// The platform user (or, for channel posts, the posting chat) behind an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<ActorId>) -> Self {
        Self {
            id: id.into(),
            username: None,
            first_name: None,
        }
    }

    /// `@username` when known, then first name, then the raw id.
    pub fn display_name(&self) -> String {
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            return format!("@{username}");
        }
        if let Some(first_name) = self.first_name.as_deref().map(str::trim) {
            if !first_name.is_empty() {
                return first_name.to_string();
            }
        }
        self.id.to_string()
    }
}

/// A user pressed an inline button attached to one of our messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonInteraction {
    pub update_id: i64,
    pub interaction_id: InteractionId,
    pub actor: Actor,
    /// Absent when the originating message is too old to be delivered.
    pub chat_id: Option<ChatId>,
    pub message_id: Option<MessageId>,
    /// The opaque callback payload we attached when sending.
    pub payload: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub update_id: i64,
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub actor: Actor,
    /// Trimmed text or caption; empty for a photo sent without a caption.
    pub text: String,
    /// `file_id` of the largest size when the message carries a photo.
    #[serde(default)]
    pub photo_file_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundUpdate {
    Interaction(ButtonInteraction),
    Message(InboundMessage),
    /// Service events, edits, media other than photos, and anything else we do not act on.
    Other { update_id: i64, update_kind: String },
}

impl InboundUpdate {
    pub fn update_id(&self) -> i64 {
        match self {
            Self::Interaction(interaction) => interaction.update_id,
            Self::Message(message) => message.update_id,
            Self::Other { update_id, .. } => *update_id,
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Interaction(_) => "interaction",
            Self::Message(_) => "message",
            Self::Other { update_kind, .. } => update_kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
}

impl InlineButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
        }
    }
}

/// Serializes as Telegram's `InlineKeyboardMarkup`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboard {
    #[serde(rename = "inline_keyboard")]
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(button: InlineButton) -> Self {
        Self {
            rows: vec![vec![button]],
        }
    }

    pub fn push_row(&mut self, row: Vec<InlineButton>) {
        if !row.is_empty() {
            self.rows.push(row);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Vec::is_empty)
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// HTML-formatted body; callers escape user-provided values.
    pub text: String,
    #[serde(default)]
    pub keyboard: Option<InlineKeyboard>,
    #[serde(default)]
    pub reply_to_message_id: Option<MessageId>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
            reply_to_message_id: None,
        }
    }

    pub fn with_keyboard(mut self, keyboard: InlineKeyboard) -> Self {
        self.keyboard = (!keyboard.is_empty()).then_some(keyboard);
        self
    }

    pub fn replying_to(mut self, message_id: MessageId) -> Self {
        self.reply_to_message_id = Some(message_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub username: Option<String>,
}
