//! Inbound event classification.
//!
//! Routing depends only on the channel configuration and the command
//! prefix. Commands take precedence: a recognised command is never also
//! counted as engagement.

use serde::{Deserialize, Serialize};

use crate::events::InboundEvent;
use crate::storage::{ChannelsConfig, CommandsConfig};

/// A parsed admin command. Arguments are validated later, at execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AdminCommand {
    /// `!purge <count> [channel]`
    Purge { channel_id: String, count: String },
    /// `!send <channel> <text...>`
    Send { channel_id: String, text: String },
    /// `!leaderboard [guess]`
    Leaderboard { guess: bool },
}

impl AdminCommand {
    pub fn name(&self) -> &'static str {
        match self {
            AdminCommand::Purge { .. } => "purge",
            AdminCommand::Send { .. } => "send",
            AdminCommand::Leaderboard { .. } => "leaderboard",
        }
    }

    /// Parse `text` if it starts with `prefix` followed by a known command.
    /// `channel_id` is where the command was issued.
    pub fn parse(prefix: &str, text: &str, channel_id: &str) -> Option<Self> {
        let body = text.trim_start().strip_prefix(prefix)?;
        let mut words = body.split_whitespace();
        let name = words.next()?.to_ascii_lowercase();

        match name.as_str() {
            "purge" => {
                let count = words.next().unwrap_or_default().to_string();
                let channel_id = words.next().unwrap_or(channel_id).to_string();
                Some(AdminCommand::Purge { channel_id, count })
            }
            "send" => {
                let target = words.next().unwrap_or_default().to_string();
                let text = words.collect::<Vec<_>>().join(" ");
                Some(AdminCommand::Send {
                    channel_id: target,
                    text,
                })
            }
            "leaderboard" | "lb" => Some(AdminCommand::Leaderboard {
                guess: words.next().is_some_and(|w| w.eq_ignore_ascii_case("guess")),
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    EngagementMessage,
    GuessAttempt,
    AdminCommand(AdminCommand),
    Other,
}

#[derive(Debug, Clone)]
pub struct Classifier {
    channels: ChannelsConfig,
    prefix: String,
}

impl Classifier {
    pub fn new(channels: ChannelsConfig, commands: &CommandsConfig) -> Self {
        Self {
            channels,
            prefix: commands.prefix.clone(),
        }
    }

    /// Every route `event` takes. Never empty: unrouted events are `[Other]`.
    pub fn classify(&self, event: &InboundEvent) -> Vec<EventKind> {
        if event.is_bot {
            return vec![EventKind::Other];
        }
        if let Some(cmd) = AdminCommand::parse(&self.prefix, &event.text, &event.channel_id) {
            return vec![EventKind::AdminCommand(cmd)];
        }

        let mut kinds = Vec::with_capacity(2);
        if matches_channel(self.channels.engagement.as_deref(), &event.channel_id) {
            kinds.push(EventKind::EngagementMessage);
        }
        // The guess game needs an explicit channel; otherwise every chat
        // line would be graded as a guess.
        if self.channels.guess.as_deref() == Some(event.channel_id.as_str()) {
            kinds.push(EventKind::GuessAttempt);
        }
        if kinds.is_empty() {
            kinds.push(EventKind::Other);
        }
        kinds
    }
}

fn matches_channel(configured: Option<&str>, channel_id: &str) -> bool {
    configured.map_or(true, |c| c == channel_id)
}
