use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ranking::RankedEntry;

/// A chat message or command invocation handed over by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub participant_id: String,
    pub channel_id: String,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Messages authored by bots (including this one) never count.
    #[serde(default)]
    pub is_bot: bool,
}

impl InboundEvent {
    pub fn new(
        participant_id: impl Into<String>,
        channel_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            participant_id: participant_id.into(),
            channel_id: channel_id.into(),
            text: text.into(),
            timestamp: Utc::now(),
            is_bot: false,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Plain text the gateway should post to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub channel_id: String,
    pub text: String,
}

impl Announcement {
    pub fn new(channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            text: text.into(),
        }
    }
}

/// Every state change in the engine produces an Event.
/// The gateway renders them; the CLI prints them as JSON lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    WindowOpened {
        epoch: u64,
        opened_at: DateTime<Utc>,
        closes_at: DateTime<Utc>,
    },
    WindowClosed {
        epoch: u64,
        winner: Option<RankedEntry>,
        standings: Vec<RankedEntry>,
        at: DateTime<Utc>,
    },
    /// Open trigger fired while a window was still active.
    OpenSkipped {
        epoch: u64,
        at: DateTime<Utc>,
    },
    GuessWon {
        participant_id: String,
        target: i64,
        guess_epoch: u64,
        wins: u64,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// The announcement text for this event, if it is announced at all.
    pub fn announcement(&self, channel_id: &str) -> Option<Announcement> {
        let text = match self {
            Event::WindowOpened { epoch, closes_at, .. } => format!(
                "Event #{epoch} is live until {}. Every message counts!",
                closes_at.format("%H:%M UTC")
            ),
            Event::WindowClosed {
                epoch,
                winner: Some(w),
                ..
            } => format!(
                "Event #{epoch} is over. Winner: {} with {} messages.",
                w.participant_id, w.score
            ),
            Event::WindowClosed { epoch, winner: None, .. } => {
                format!("Event #{epoch} is over. Nobody participated.")
            }
            Event::GuessWon {
                participant_id,
                target,
                wins,
                ..
            } => format!(
                "{participant_id} guessed {target}! Total wins: {wins}. A new number has been picked."
            ),
            Event::OpenSkipped { .. } => return None,
        };
        Some(Announcement::new(channel_id, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_event_defaults_timestamp_and_bot_flag() {
        let ev: InboundEvent =
            serde_json::from_str(r#"{"participant_id":"u1","channel_id":"c1","text":"hi"}"#)
                .unwrap();
        assert!(!ev.is_bot);
        assert!(ev.timestamp <= Utc::now());
    }

    #[test]
    fn skipped_open_is_not_announced() {
        let ev = Event::OpenSkipped {
            epoch: 3,
            at: Utc::now(),
        };
        assert!(ev.announcement("general").is_none());
    }

    #[test]
    fn close_without_winner_is_announced() {
        let ev = Event::WindowClosed {
            epoch: 2,
            winner: None,
            standings: vec![],
            at: Utc::now(),
        };
        let a = ev.announcement("general").unwrap();
        assert_eq!(a.channel_id, "general");
        assert!(a.text.contains("Nobody"));
    }
}
