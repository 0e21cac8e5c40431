//! TOML-based engine configuration.
//!
//! Stores:
//! - Event window cadence (period, active duration)
//! - Channel routing (engagement, guess, announcements)
//! - Counter persistence policy
//! - Guess game range and seed
//! - Per-command rate limits
//! - Ranking and command prefix
//!
//! Configuration is stored at `~/.config/chatpulse/config.toml`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::data_dir;
use crate::counter::PersistencePolicy;
use crate::error::{ConfigError, CoreError};
use crate::ranking::TieBreak;

/// Longest duration any timer setting may take.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Event window cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Seconds between window openings.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Seconds a window stays active.
    #[serde(default = "default_active_secs")]
    pub active_secs: u64,
    /// Open the first window immediately instead of after one period.
    #[serde(default = "default_true")]
    pub open_on_start: bool,
    /// Close (announce and reset) an active window during shutdown.
    #[serde(default)]
    pub close_on_shutdown: bool,
    /// Delay before retrying a close whose reset failed.
    #[serde(default = "default_close_retry_secs")]
    pub close_retry_secs: u64,
}

/// Channel routing. An unset engagement channel counts messages from every
/// channel; an unset guess channel turns guess routing off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub engagement: Option<String>,
    #[serde(default)]
    pub guess: Option<String>,
    /// Where window announcements go.
    #[serde(default = "default_announce_channel")]
    pub announce: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub policy: PersistencePolicy,
    /// Flush cadence under the relaxed policy.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_guess_min")]
    pub min: i64,
    #[serde(default = "default_guess_max")]
    pub max: i64,
    /// Fixed RNG seed for reproducible targets.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub interval_secs: u64,
}

impl RateLimitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_rate_limit")]
    pub default: RateLimitConfig,
    /// Overrides keyed by command name (`purge`, `send`, `leaderboard`).
    #[serde(default)]
    pub commands: HashMap<String, RateLimitConfig>,
}

impl RateLimitsConfig {
    pub fn for_command(&self, name: &str) -> RateLimitConfig {
        self.commands.get(name).copied().unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub tie_break: TieBreak,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

/// Engine configuration.
///
/// Serialized to/from TOML at `~/.config/chatpulse/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub guess: GuessConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

// Default functions
fn default_period_secs() -> u64 {
    3600
}
fn default_active_secs() -> u64 {
    600
}
fn default_close_retry_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}
fn default_announce_channel() -> String {
    "general".into()
}
fn default_flush_interval_secs() -> u64 {
    5
}
fn default_guess_min() -> i64 {
    1
}
fn default_guess_max() -> i64 {
    100
}
fn default_rate_limit() -> RateLimitConfig {
    RateLimitConfig {
        limit: 5,
        interval_secs: 60,
    }
}
fn default_top_k() -> usize {
    10
}
fn default_prefix() -> String {
    "!".into()
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            period_secs: default_period_secs(),
            active_secs: default_active_secs(),
            open_on_start: true,
            close_on_shutdown: false,
            close_retry_secs: default_close_retry_secs(),
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            engagement: None,
            guess: None,
            announce: default_announce_channel(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            policy: PersistencePolicy::Synchronous,
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl Default for GuessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min: default_guess_min(),
            max: default_guess_max(),
            seed: None,
        }
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            default: default_rate_limit(),
            commands: HashMap::new(),
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            tie_break: TieBreak::default(),
        }
    }
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
        }
    }
}

impl WindowConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }

    pub fn active(&self) -> Duration {
        Duration::from_secs(self.active_secs)
    }
}

impl Config {
    fn get_json_value_by_path<'a>(
        root: &'a serde_json::Value,
        key: &str,
    ) -> Option<&'a serde_json::Value> {
        if key.is_empty() {
            return None;
        }

        let mut current = root;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn set_json_value_by_path(
        root: &mut serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let unknown = || ConfigError::UnknownKey(key.to_string());
        let invalid = |message: String| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        };

        let mut parts = key.split('.').peekable();
        if parts.peek().is_none() || key.is_empty() {
            return Err(unknown());
        }

        let mut current = root;
        while let Some(part) = parts.next() {
            let is_leaf = parts.peek().is_none();
            if is_leaf {
                let obj = current.as_object_mut().ok_or_else(unknown)?;
                let existing = obj.get(part).ok_or_else(unknown)?;

                let new_value = match existing {
                    serde_json::Value::Bool(_) => serde_json::Value::Bool(
                        value.parse::<bool>().map_err(|e| invalid(e.to_string()))?,
                    ),
                    serde_json::Value::Number(_) => {
                        if let Ok(n) = value.parse::<u64>() {
                            serde_json::Value::Number(n.into())
                        } else if let Ok(n) = value.parse::<i64>() {
                            serde_json::Value::Number(n.into())
                        } else {
                            return Err(invalid(format!("cannot parse '{value}' as number")));
                        }
                    }
                    serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                        serde_json::from_str(value).map_err(|e| invalid(e.to_string()))?
                    }
                    // Unset options and strings both take the raw text;
                    // `Config::set` retries numeric options as numbers.
                    _ => serde_json::Value::String(value.into()),
                };

                obj.insert(part.to_string(), new_value);
                return Ok(());
            }

            current = current.get_mut(part).ok_or_else(unknown)?;
        }

        Err(unknown())
    }

    /// Default location of the config file.
    pub fn path() -> Result<PathBuf, CoreError> {
        Ok(data_dir()?.join("config.toml"))
    }

    /// Load from the default location, writing defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed,
    /// or if the default config cannot be written to disk.
    pub fn load() -> Result<Self, CoreError> {
        Self::load_from(&Self::path()?)
    }

    /// Load from `path`, writing defaults there if the file is missing.
    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let cfg: Config = toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                cfg.validate()?;
                Ok(cfg)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let cfg = Self::default();
                cfg.save_to(path)?;
                Ok(cfg)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist to the default location.
    pub fn save(&self) -> Result<(), CoreError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), CoreError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = Self::get_json_value_by_path(&json, key)?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by key in memory. Returns error if the key is
    /// unknown or the result does not validate; `self` is unchanged then.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), CoreError> {
        let mut json = serde_json::to_value(&*self)?;
        Self::set_json_value_by_path(&mut json, key, value)?;

        let updated: Config = match serde_json::from_value(json.clone()) {
            Ok(cfg) => cfg,
            Err(first) => {
                // A previously unset numeric option (e.g. `guess.seed`).
                let n = value.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: first.to_string(),
                })?;
                Self::replace_leaf(&mut json, key, serde_json::Value::Number(n.into()));
                serde_json::from_value(json).map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })?
            }
        };
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    fn replace_leaf(root: &mut serde_json::Value, key: &str, value: serde_json::Value) {
        let mut current = root;
        let parts: Vec<&str> = key.split('.').collect();
        for part in &parts[..parts.len() - 1] {
            match current.get_mut(*part) {
                Some(next) => current = next,
                None => return,
            }
        }
        if let Some(obj) = current.as_object_mut() {
            obj.insert(parts[parts.len() - 1].to_string(), value);
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, message: &str| {
            Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        };
        if self.window.period_secs == 0 {
            return invalid("window.period_secs", "must be greater than zero");
        }
        if self.window.active_secs == 0 {
            return invalid("window.active_secs", "must be greater than zero");
        }
        if self.persistence.flush_interval_secs == 0 {
            return invalid("persistence.flush_interval_secs", "must be greater than zero");
        }
        for (key, secs) in [
            ("window.period_secs", self.window.period_secs),
            ("window.active_secs", self.window.active_secs),
            ("window.close_retry_secs", self.window.close_retry_secs),
            ("persistence.flush_interval_secs", self.persistence.flush_interval_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return invalid(key, "must be at most one year");
            }
        }
        if self.guess.min > self.guess.max {
            return invalid("guess.min", "must not exceed guess.max");
        }
        if self.commands.prefix.trim().is_empty() {
            return invalid("commands.prefix", "must not be empty");
        }
        if self.rate_limits.default.interval_secs == 0 {
            return invalid("rate_limits.default.interval_secs", "must be greater than zero");
        }
        for (name, rl) in &self.rate_limits.commands {
            if rl.interval_secs == 0 {
                return invalid(
                    &format!("rate_limits.commands.{name}.interval_secs"),
                    "must be greater than zero",
                );
            }
        }
        Ok(())
    }

    /// Load from disk, returning default on error.
    /// This is a convenience method that never fails.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}
