//! Admin command gating.
//!
//! A command passes three checks in order: the caller's [`Authorizer`],
//! argument validation, then the per-command rate limit. Only a command
//! that passes all three consumes rate-limit quota. The core never deletes
//! or posts messages itself; admitted commands become [`CommandEffect`]s for
//! the gateway to carry out.

use std::collections::HashSet;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::classify::AdminCommand;
use crate::error::Rejection;
use crate::guess::GuessEntry;
use crate::rate_limit::{Admission, RateLimiter};
use crate::ranking::RankedEntry;
use crate::storage::RateLimitsConfig;

pub const MAX_PURGE: u32 = 100;

/// Decides whether an actor may run a command. Supplied by the gateway,
/// which knows the platform's roles and permissions.
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self, actor_id: &str, command: &str) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn is_authorized(&self, actor_id: &str, command: &str) -> bool {
        self(actor_id, command)
    }
}

/// Authorizes a fixed set of actors for every command.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    actors: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actors: actors.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for AllowList {
    fn is_authorized(&self, actor_id: &str, _command: &str) -> bool {
        self.actors.contains(actor_id)
    }
}

/// A command that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminAction {
    Purge { channel_id: String, count: u32 },
    Send { channel_id: String, text: String },
    Leaderboard { guess: bool },
}

/// What the gateway should do on behalf of an admitted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum CommandEffect {
    /// Delete the most recent `count` messages in the channel.
    Purge { channel_id: String, count: u32 },
    /// Post `text` to the channel.
    Send { channel_id: String, text: String },
}

pub fn validate(command: &AdminCommand) -> Result<AdminAction, Rejection> {
    match command {
        AdminCommand::Purge { channel_id, count } => {
            let count = count
                .parse::<u32>()
                .ok()
                .filter(|c| (1..=MAX_PURGE).contains(c))
                .ok_or_else(|| Rejection::InvalidInput {
                    message: format!("purge count must be between 1 and {MAX_PURGE}"),
                })?;
            Ok(AdminAction::Purge {
                channel_id: channel_id.clone(),
                count,
            })
        }
        AdminCommand::Send { channel_id, text } => {
            if channel_id.is_empty() {
                return Err(Rejection::InvalidInput {
                    message: "send needs a target channel".into(),
                });
            }
            if text.trim().is_empty() {
                return Err(Rejection::InvalidInput {
                    message: "send text must not be empty".into(),
                });
            }
            Ok(AdminAction::Send {
                channel_id: channel_id.clone(),
                text: text.clone(),
            })
        }
        AdminCommand::Leaderboard { guess } => Ok(AdminAction::Leaderboard { guess: *guess }),
    }
}

/// Run the permission, validation and rate-limit checks for `command`.
pub fn admit(
    authorizer: &dyn Authorizer,
    limiter: &RateLimiter,
    limits: &RateLimitsConfig,
    actor_id: &str,
    command: &AdminCommand,
    now: Instant,
) -> Result<AdminAction, Rejection> {
    let name = command.name();
    if !authorizer.is_authorized(actor_id, name) {
        tracing::info!(actor = actor_id, command = name, "admin command denied");
        return Err(Rejection::PermissionDenied {
            action: name.to_string(),
        });
    }

    let action = validate(command)?;

    let limit = limits.for_command(name);
    match limiter.check_and_record_at(actor_id, name, limit.limit, limit.interval(), now) {
        Admission::Allowed { .. } => Ok(action),
        Admission::Rejected { retry_after } => Err(Rejection::RateLimited {
            action: name.to_string(),
            retry_after,
        }),
    }
}

pub fn render_standings(epoch: u64, entries: &[RankedEntry]) -> String {
    if entries.is_empty() {
        return format!("Event #{epoch}: no messages yet.");
    }
    let mut out = format!("Event #{epoch} leaderboard:");
    for e in entries {
        out.push_str(&format!("\n{}. {} ({})", e.rank, e.participant_id, e.score));
    }
    out
}

pub fn render_guess_board(entries: &[GuessEntry]) -> String {
    if entries.is_empty() {
        return "Nobody has guessed a number yet.".to_string();
    }
    let mut out = String::from("Guess game leaderboard:");
    for e in entries {
        let unit = if e.wins == 1 { "win" } else { "wins" };
        out.push_str(&format!("\n{}. {} ({} {unit})", e.rank, e.participant_id, e.wins));
    }
    out
}
