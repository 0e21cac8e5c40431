//! Per-epoch participant counters.
//!
//! The store owns every [`ParticipantScore`] of the current epoch. All
//! mutations (increment, flush, close) run under one mutex, and under the
//! synchronous policy the durable write happens while that mutex is held, so
//! the persisted view and the in-memory view advance in the same order.
//!
//! ## Epochs
//!
//! ```text
//! epoch N: increment* -> close_epoch -> epoch N+1: increment* -> ...
//! ```
//!
//! `close_epoch` snapshots, ranks and clears in one critical section: an
//! increment racing a close either lands in epoch N (and is part of the final
//! standings) or in epoch N+1. Callers that observed the window for epoch N
//! use [`CounterStore::increment_in`] so a late increment is reported instead
//! of leaking into N+1.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ranking::{self, RankedEntry, TieBreak};
use crate::storage::CounterPersistence;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantScore {
    pub participant_id: String,
    pub score: u64,
    pub last_updated: DateTime<Utc>,
}

/// When counter updates reach the persistence backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistencePolicy {
    /// Write-through: `increment` returns only after the new value is durable.
    /// A failed write is rolled back in memory and reported.
    #[default]
    Synchronous,
    /// Update memory immediately and write dirty counters on `flush()`.
    /// A crash loses at most the increments since the last flush.
    Relaxed,
}

/// Final state of a closed epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: u64,
    pub next_epoch: u64,
    /// Every participant of the closed epoch, ranked by participant id on ties.
    pub standings: Vec<RankedEntry>,
    pub winner: Option<RankedEntry>,
}

struct EpochState {
    epoch: u64,
    records: HashMap<String, ParticipantScore>,
    /// Participants changed since the last flush (relaxed policy only).
    dirty: HashSet<String>,
}

pub struct CounterStore {
    state: Mutex<EpochState>,
    persistence: Arc<dyn CounterPersistence>,
    policy: PersistencePolicy,
}

impl CounterStore {
    /// Open the store, resuming the persisted open epoch if there is one.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read or the first epoch
    /// cannot be recorded.
    pub fn open(persistence: Arc<dyn CounterPersistence>, policy: PersistencePolicy) -> Result<Self> {
        let epoch = match persistence.current_epoch()? {
            Some(epoch) => epoch,
            None => {
                persistence.begin_epoch(1)?;
                1
            }
        };
        let records = persistence
            .load(epoch)?
            .into_iter()
            .map(|s| (s.participant_id.clone(), s))
            .collect::<HashMap<_, _>>();

        tracing::debug!(epoch, participants = records.len(), "counter store restored");

        Ok(Self {
            state: Mutex::new(EpochState {
                epoch,
                records,
                dirty: HashSet::new(),
            }),
            persistence,
            policy,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    pub fn policy(&self) -> PersistencePolicy {
        self.policy
    }

    pub fn score_of(&self, participant_id: &str) -> u64 {
        self.state
            .lock()
            .records
            .get(participant_id)
            .map(|s| s.score)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of counters not yet written under the relaxed policy.
    pub fn pending_writes(&self) -> usize {
        self.state.lock().dirty.len()
    }

    /// All current records, score descending, participant id ascending on ties.
    pub fn snapshot(&self) -> Vec<ParticipantScore> {
        let state = self.state.lock();
        sorted(state.records.values().cloned().collect())
    }

    /// Ranked view of the current epoch.
    pub fn leaderboard(&self, tie_break: TieBreak, top_k: Option<usize>) -> Vec<RankedEntry> {
        let state = self.state.lock();
        let records: Vec<ParticipantScore> = state.records.values().cloned().collect();
        drop(state);
        ranking::rank(&records, tie_break, top_k)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Add 1 to `participant_id` in the current epoch. Returns the new score.
    ///
    /// # Errors
    /// Under the synchronous policy, a persistence failure is returned and
    /// the increment is not applied.
    pub fn increment(&self, participant_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock();
        self.apply(&mut state, participant_id, at)
    }

    /// Like [`increment`](Self::increment) but only if `epoch` is still the
    /// current epoch. Returns `Ok(None)` when that epoch has already closed.
    pub fn increment_in(
        &self,
        epoch: u64,
        participant_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<u64>> {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return Ok(None);
        }
        self.apply(&mut state, participant_id, at).map(Some)
    }

    fn apply(&self, state: &mut EpochState, participant_id: &str, at: DateTime<Utc>) -> Result<u64> {
        let next = ParticipantScore {
            participant_id: participant_id.to_string(),
            score: state
                .records
                .get(participant_id)
                .map(|s| s.score)
                .unwrap_or(0)
                + 1,
            last_updated: at,
        };

        match self.policy {
            PersistencePolicy::Synchronous => {
                self.persistence.upsert(state.epoch, &next)?;
            }
            PersistencePolicy::Relaxed => {
                state.dirty.insert(participant_id.to_string());
            }
        }

        let score = next.score;
        state.records.insert(participant_id.to_string(), next);
        Ok(score)
    }

    /// Write every counter changed since the last flush. Returns how many
    /// were written. A failed flush keeps them pending for the next attempt.
    pub fn flush(&self) -> Result<usize> {
        let mut state = self.state.lock();
        if state.dirty.is_empty() {
            return Ok(0);
        }
        let batch: Vec<ParticipantScore> = state
            .dirty
            .iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect();
        self.persistence.save(state.epoch, &batch)?;
        state.dirty.clear();
        Ok(batch.len())
    }

    /// Remove every record and start the next epoch. Returns the new epoch id.
    pub fn clear(&self) -> Result<u64> {
        self.close_epoch().map(|summary| summary.next_epoch)
    }

    /// Snapshot, rank and clear the current epoch atomically.
    ///
    /// # Errors
    /// If the backend cannot roll over, nothing changes: the epoch stays
    /// open with all of its counters.
    pub fn close_epoch(&self) -> Result<EpochSummary> {
        let mut state = self.state.lock();
        let records: Vec<ParticipantScore> = state.records.values().cloned().collect();
        let winner = ranking::winner(&records);
        let standings = ranking::rank(&records, TieBreak::ParticipantId, None);

        let closed = state.epoch;
        let next_epoch = self.persistence.rollover(closed, winner.as_ref())?;

        state.records.clear();
        state.dirty.clear();
        state.epoch = next_epoch;

        Ok(EpochSummary {
            epoch: closed,
            next_epoch,
            standings,
            winner,
        })
    }
}

fn sorted(mut records: Vec<ParticipantScore>) -> Vec<ParticipantScore> {
    records.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.participant_id.cmp(&b.participant_id))
    });
    records
}
