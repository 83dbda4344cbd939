//! Slash commands understood in the group chat.

use crate::render::escape_html;
use relay_channels::{Actor, ChatId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand<'a> {
    NotACommand,
    /// `/cmd@other_bot`, or any suffixed command while our own username is unknown.
    AddressedElsewhere,
    Command { name: String, args: &'a str },
}

/// Split `"/Help@OrderBot extra words"` into `help` and `"extra words"`.
pub fn parse_command<'a>(text: &'a str, bot_username: Option<&str>) -> ParsedCommand<'a> {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return ParsedCommand::NotACommand;
    };
    let (token, args) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], rest[idx..].trim()),
        None => (rest, ""),
    };
    let name = match token.split_once('@') {
        Some((name, suffix)) => {
            let addressed_to_us = bot_username
                .map(|username| username.trim_start_matches('@'))
                .is_some_and(|username| username.eq_ignore_ascii_case(suffix));
            if !addressed_to_us {
                return ParsedCommand::AddressedElsewhere;
            }
            name
        }
        None => token,
    };
    if name.is_empty() {
        return ParsedCommand::NotACommand;
    }
    ParsedCommand::Command {
        name: name.to_lowercase(),
        args,
    }
}

pub struct CommandContext<'a> {
    pub actor: &'a Actor,
    pub chat_id: &'a ChatId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    /// HTML reply posted under the command message.
    Text(String),
    /// Open a `/neworder` draft for the sender.
    StartIntake,
}

#[derive(Debug, Clone, Copy)]
enum CommandHandler {
    Start,
    Help,
    Id,
    NewOrder,
}

struct CommandEntry {
    name: &'static str,
    description: &'static str,
    handler: CommandHandler,
}

const COMMANDS: &[CommandEntry] = &[
    CommandEntry {
        name: "start",
        description: "приветствие",
        handler: CommandHandler::Start,
    },
    CommandEntry {
        name: "help",
        description: "список команд",
        handler: CommandHandler::Help,
    },
    CommandEntry {
        name: "id",
        description: "ваш Telegram ID и ID этого чата",
        handler: CommandHandler::Id,
    },
    CommandEntry {
        name: "neworder",
        description: "оформить новую заявку",
        handler: CommandHandler::NewOrder,
    },
];

pub fn is_known(name: &str) -> bool {
    lookup(name).is_some()
}

/// Unknown names get a generic text reply.
pub fn handle_command(name: &str, ctx: &CommandContext<'_>) -> CommandReply {
    let Some(entry) = lookup(name) else {
        return CommandReply::Text("Неизвестная команда. Список команд: /help".to_string());
    };
    let text = match entry.handler {
        CommandHandler::NewOrder => return CommandReply::StartIntake,
        CommandHandler::Start => format!(
            "👋 Привет, {}! Я присылаю уведомления о заявках и принимаю решения по кнопкам.\nНовая заявка: /neworder, список команд: /help",
            escape_html(&ctx.actor.display_name())
        ),
        CommandHandler::Help => help_text(),
        CommandHandler::Id => format!(
            "🆔 Ваш ID: <code>{}</code>\n👤 {}\n💬 ID чата: <code>{}</code>",
            escape_html(ctx.actor.id.as_str()),
            ctx.actor
                .username
                .as_deref()
                .map(|username| format!("@{}", escape_html(username)))
                .unwrap_or_else(|| "без username".to_string()),
            escape_html(ctx.chat_id.as_str())
        ),
    };
    CommandReply::Text(text)
}

fn lookup(name: &str) -> Option<&'static CommandEntry> {
    COMMANDS
        .iter()
        .find(|entry| entry.name.eq_ignore_ascii_case(name))
}

fn help_text() -> String {
    let mut text = String::from("Доступные команды:");
    for entry in COMMANDS {
        text.push_str(&format!("\n/{} - {}", entry.name, entry.description));
    }
    text
}
