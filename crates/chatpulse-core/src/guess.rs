//! Number guessing game.
//!
//! A secret target is drawn uniformly from an inclusive range. The first
//! participant to name it wins, their win count goes up and a new target is
//! drawn. Each target is a "guess epoch"; evaluation and redraw happen under
//! one lock so a target can be won at most once.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use parking_lot::Mutex;
use rand::prelude::*;
use rand_pcg::Mcg128Xsl64;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::storage::GuessConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hint {
    TooLow,
    TooHigh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum GuessOutcome {
    Win {
        target: i64,
        /// The participant's total wins, this one included.
        wins: u64,
        /// Epoch of the target that was won.
        guess_epoch: u64,
    },
    Miss {
        hint: Hint,
    },
    Invalid {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessEntry {
    pub rank: usize,
    pub participant_id: String,
    pub wins: u64,
}

struct GuessState {
    target: i64,
    epoch: u64,
    wins: HashMap<String, u64>,
    rng: Mcg128Xsl64,
}

pub struct GuessGame {
    range: RangeInclusive<i64>,
    state: Mutex<GuessState>,
}

impl GuessGame {
    /// Create a game over `min..=max`. A fixed `seed` makes the target
    /// sequence reproducible.
    pub fn new(min: i64, max: i64, seed: Option<u64>) -> Result<Self, ValidationError> {
        if min > max {
            return Err(ValidationError::InvalidValue {
                field: "guess.min".into(),
                message: format!("{min} is greater than max {max}"),
            });
        }
        let mut rng = match seed {
            Some(seed) => Mcg128Xsl64::seed_from_u64(seed),
            None => Mcg128Xsl64::from_entropy(),
        };
        let target = rng.gen_range(min..=max);
        Ok(Self {
            range: min..=max,
            state: Mutex::new(GuessState {
                target,
                epoch: 1,
                wins: HashMap::new(),
                rng,
            }),
        })
    }

    pub fn from_config(config: &GuessConfig) -> Result<Self, ValidationError> {
        Self::new(config.min, config.max, config.seed)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn range(&self) -> RangeInclusive<i64> {
        self.range.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn wins_of(&self, participant_id: &str) -> u64 {
        self.state
            .lock()
            .wins
            .get(participant_id)
            .copied()
            .unwrap_or(0)
    }

    /// Participants by wins descending, participant id ascending on ties.
    pub fn leaderboard(&self, top_k: Option<usize>) -> Vec<GuessEntry> {
        let mut rows: Vec<(String, u64)> = {
            let state = self.state.lock();
            state.wins.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rows.into_iter()
            .take(top_k.unwrap_or(usize::MAX))
            .enumerate()
            .map(|(i, (participant_id, wins))| GuessEntry {
                rank: i + 1,
                participant_id,
                wins,
            })
            .collect()
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn submit_guess(&self, participant_id: &str, raw: &str) -> GuessOutcome {
        let value = match raw.trim().parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                return GuessOutcome::Invalid {
                    reason: format!("'{}' is not a whole number", raw.trim()),
                }
            }
        };
        if !self.range.contains(&value) {
            return GuessOutcome::Invalid {
                reason: format!(
                    "guess must be between {} and {}",
                    self.range.start(),
                    self.range.end()
                ),
            };
        }

        let mut state = self.state.lock();
        if value < state.target {
            return GuessOutcome::Miss { hint: Hint::TooLow };
        }
        if value > state.target {
            return GuessOutcome::Miss { hint: Hint::TooHigh };
        }

        let won_epoch = state.epoch;
        let wins = {
            let entry = state.wins.entry(participant_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        let range = self.range.clone();
        state.target = state.rng.gen_range(range);
        state.epoch += 1;

        tracing::info!(
            participant = participant_id,
            target = value,
            guess_epoch = won_epoch,
            wins,
            "guess won, target redrawn"
        );

        GuessOutcome::Win {
            target: value,
            wins,
            guess_epoch: won_epoch,
        }
    }

    /// Forget every win. The current target stays.
    pub fn reset_leaderboard(&self) {
        self.state.lock().wins.clear();
    }

    #[cfg(test)]
    pub(crate) fn set_target(&self, target: i64) {
        self.state.lock().target = target;
    }

    #[cfg(test)]
    pub(crate) fn target(&self) -> i64 {
        self.state.lock().target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_hints_and_win_redraws() {
        let game = GuessGame::new(1, 100, Some(7)).unwrap();
        game.set_target(42);

        assert_eq!(
            game.submit_guess("amy", "10"),
            GuessOutcome::Miss { hint: Hint::TooLow }
        );
        assert_eq!(
            game.submit_guess("amy", "90"),
            GuessOutcome::Miss { hint: Hint::TooHigh }
        );
        assert_eq!(
            game.submit_guess("bob", " 42 "),
            GuessOutcome::Win {
                target: 42,
                wins: 1,
                guess_epoch: 1
            }
        );
        assert_eq!(game.epoch(), 2);
        assert_eq!(game.wins_of("bob"), 1);
        assert!(game.range().contains(&game.target()));
    }

    #[test]
    fn invalid_guesses_change_nothing() {
        let game = GuessGame::new(1, 100, Some(7)).unwrap();
        let before = game.target();
        for raw in ["abc", "4.5", "", "0", "101", "-3"] {
            assert!(
                matches!(game.submit_guess("amy", raw), GuessOutcome::Invalid { .. }),
                "{raw:?} should be invalid"
            );
        }
        assert_eq!(game.target(), before);
        assert_eq!(game.epoch(), 1);
    }

    #[test]
    fn same_seed_same_targets() {
        let a = GuessGame::new(1, 1000, Some(99)).unwrap();
        let b = GuessGame::new(1, 1000, Some(99)).unwrap();
        for _ in 0..5 {
            let t = a.target();
            assert_eq!(t, b.target());
            a.submit_guess("x", &t.to_string());
            b.submit_guess("x", &t.to_string());
        }
    }

    #[test]
    fn single_value_range_always_wins() {
        let game = GuessGame::new(5, 5, None).unwrap();
        assert!(matches!(game.submit_guess("amy", "5"), GuessOutcome::Win { .. }));
        assert!(matches!(game.submit_guess("amy", "5"), GuessOutcome::Win { wins: 2, .. }));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(GuessGame::new(10, 1, None).is_err());
    }

    #[test]
    fn concurrent_correct_guesses_win_once_per_target() {
        let game = GuessGame::new(1, 100, Some(3)).unwrap();
        game.set_target(50);
        let outcomes = std::sync::Mutex::new(Vec::new());
        std::thread::scope(|s| {
            for i in 0..16 {
                let game = &game;
                let outcomes = &outcomes;
                s.spawn(move || {
                    let o = game.submit_guess(&format!("p{i}"), "50");
                    outcomes.lock().unwrap().push(o);
                });
            }
        });
        let first_target_wins = outcomes
            .into_inner()
            .unwrap()
            .into_iter()
            .filter(|o| matches!(o, GuessOutcome::Win { guess_epoch: 1, .. }))
            .count();
        assert_eq!(first_target_wins, 1);
    }

    #[test]
    fn leaderboard_orders_by_wins_then_id() {
        let game = GuessGame::new(3, 3, None).unwrap();
        for pid in ["bob", "amy", "bob", "cat", "amy"] {
            game.submit_guess(pid, "3");
        }
        let board = game.leaderboard(Some(2));
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].participant_id, "amy");
        assert_eq!(board[0].wins, 2);
        assert_eq!(board[1].participant_id, "bob");

        game.reset_leaderboard();
        assert!(game.leaderboard(None).is_empty());
    }
}
