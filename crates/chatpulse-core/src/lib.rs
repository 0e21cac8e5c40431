//! # Chatpulse Core Library
//!
//! Core logic for a chat-community engagement engine: periodic "event
//! windows" during which every message counts toward a per-participant
//! score, a winner announced when the window closes, a number-guessing
//! game and rate-limited admin commands.
//!
//! The crate is transport-agnostic. A gateway (Discord, Slack, the
//! `chatpulse run` JSON-lines driver) feeds [`InboundEvent`]s into an
//! [`Engine`] and acts on the returned [`Outcome`]s and broadcast [`Event`]s.
//!
//! ## Architecture
//!
//! - **Counter Store**: per-epoch scores with write-through or relaxed
//!   persistence
//! - **Event Window**: cyclic `Idle -> Active` state driven by the [`Scheduler`]
//! - **Ranking**: pure leaderboard and winner selection
//! - **Rate Limiter**: sliding window per (actor, action)
//! - **Guess Game**: first correct guess wins, target redrawn atomically
//! - **Storage**: SQLite counters and epoch history, TOML configuration

pub mod admin;
pub mod classify;
pub mod counter;
pub mod engine;
pub mod error;
pub mod events;
pub mod guess;
pub mod rate_limit;
pub mod ranking;
pub mod storage;
pub mod window;

pub use admin::{AllowList, Authorizer, CommandEffect};
pub use classify::{AdminCommand, Classifier, EventKind};
pub use counter::{CounterStore, EpochSummary, ParticipantScore, PersistencePolicy};
pub use engine::{Engine, IgnoreReason, Outcome};
pub use error::{ConfigError, CoreError, DatabaseError, Rejection, ValidationError};
pub use events::{Announcement, Event, InboundEvent};
pub use guess::{GuessEntry, GuessGame, GuessOutcome, Hint};
pub use rate_limit::{Admission, RateLimiter};
pub use ranking::{RankedEntry, TieBreak};
pub use storage::{Config, CounterPersistence, Database, EpochRecord, MemoryPersistence};
pub use window::{EventWindow, Scheduler, SchedulerHandle, WindowState};
