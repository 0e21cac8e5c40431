mod config;
pub mod database;
pub mod memory;
pub mod migrations;

pub use config::{
    ChannelsConfig, CommandsConfig, Config, GuessConfig, PersistenceConfig, RankingConfig,
    RateLimitConfig, RateLimitsConfig, WindowConfig,
};
pub use database::{Database, EpochRecord};
pub use memory::MemoryPersistence;

use std::path::PathBuf;

use crate::counter::ParticipantScore;
use crate::error::DatabaseError;
use crate::ranking::RankedEntry;

/// Durable backing for the counter store.
///
/// Counters are keyed by `(epoch_id, participant_id)`. Exactly one epoch is
/// open at a time; `rollover` closes it and opens the next one in a single
/// all-or-nothing step.
pub trait CounterPersistence: Send + Sync {
    /// The epoch that is currently open, if any was ever started.
    fn current_epoch(&self) -> Result<Option<u64>, DatabaseError>;

    /// Record `epoch_id` as open. Idempotent.
    fn begin_epoch(&self, epoch_id: u64) -> Result<(), DatabaseError>;

    /// All counters stored for `epoch_id`.
    fn load(&self, epoch_id: u64) -> Result<Vec<ParticipantScore>, DatabaseError>;

    /// Write every entry of `scores` for `epoch_id` (insert or replace).
    fn save(&self, epoch_id: u64, scores: &[ParticipantScore]) -> Result<(), DatabaseError>;

    /// Write a single counter. Backends override this when they can do
    /// better than a full `save`.
    fn upsert(&self, epoch_id: u64, score: &ParticipantScore) -> Result<(), DatabaseError> {
        self.save(epoch_id, std::slice::from_ref(score))
    }

    /// Discard the counters of `epoch_id`, mark it closed with its winner and
    /// open `epoch_id + 1`. Returns the new epoch id.
    fn rollover(
        &self,
        epoch_id: u64,
        winner: Option<&RankedEntry>,
    ) -> Result<u64, DatabaseError>;
}

/// Returns `~/.config/chatpulse[-dev]/` based on CHATPULSE_ENV.
///
/// Set CHATPULSE_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the config directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("CHATPULSE_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("chatpulse-dev")
    } else {
        base_dir.join("chatpulse")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
