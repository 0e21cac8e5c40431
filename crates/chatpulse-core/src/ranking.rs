//! Leaderboard ranking over a counter snapshot.
//!
//! Ranking is a pure function: it never touches the store, so it is safe to
//! call on a snapshot while increments continue to land. Ordering is always
//! score descending; ties are resolved by a [`TieBreak`] rule that is fixed
//! per call site so repeated calls over the same snapshot give the same order.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::counter::ParticipantScore;

/// How participants with equal scores are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Participant id ascending.
    #[default]
    ParticipantId,
    /// Whoever reached the score first, then participant id ascending.
    EarliestUpdate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    /// 1-based position.
    pub rank: usize,
    pub participant_id: String,
    pub score: u64,
    pub last_updated: DateTime<Utc>,
}

fn compare(a: &ParticipantScore, b: &ParticipantScore, tie_break: TieBreak) -> Ordering {
    let by_score = b.score.cmp(&a.score);
    match tie_break {
        TieBreak::ParticipantId => by_score.then_with(|| a.participant_id.cmp(&b.participant_id)),
        TieBreak::EarliestUpdate => by_score
            .then_with(|| a.last_updated.cmp(&b.last_updated))
            .then_with(|| a.participant_id.cmp(&b.participant_id)),
    }
}

/// Rank `scores`, keeping at most `top_k` entries (`None` keeps all).
pub fn rank(
    scores: &[ParticipantScore],
    tie_break: TieBreak,
    top_k: Option<usize>,
) -> Vec<RankedEntry> {
    let mut sorted: Vec<&ParticipantScore> = scores.iter().collect();
    sorted.sort_by(|a, b| compare(a, b, tie_break));

    let limit = top_k.unwrap_or(sorted.len());
    sorted
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, s)| RankedEntry {
            rank: i + 1,
            participant_id: s.participant_id.clone(),
            score: s.score,
            last_updated: s.last_updated,
        })
        .collect()
}

/// The epoch winner: highest score, earliest to reach it on ties.
pub fn winner(scores: &[ParticipantScore]) -> Option<RankedEntry> {
    rank(scores, TieBreak::EarliestUpdate, Some(1)).into_iter().next()
}
