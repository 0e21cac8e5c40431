//! In-process counter persistence for tests and ephemeral runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::CounterPersistence;
use crate::counter::ParticipantScore;
use crate::error::DatabaseError;
use crate::ranking::RankedEntry;

#[derive(Default)]
struct State {
    /// epoch id -> closed?
    epochs: BTreeMap<u64, bool>,
    counters: HashMap<u64, BTreeMap<String, ParticipantScore>>,
    winners: HashMap<u64, RankedEntry>,
}

/// Volatile [`CounterPersistence`] with an injectable write failure.
#[derive(Default)]
pub struct MemoryPersistence {
    state: Mutex<State>,
    fail_writes: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `DatabaseError::Locked`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn winner_of(&self, epoch_id: u64) -> Option<RankedEntry> {
        self.state.lock().winners.get(&epoch_id).cloned()
    }

    fn check_writable(&self) -> Result<(), DatabaseError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DatabaseError::Locked);
        }
        Ok(())
    }
}

impl CounterPersistence for MemoryPersistence {
    fn current_epoch(&self) -> Result<Option<u64>, DatabaseError> {
        let state = self.state.lock();
        Ok(state
            .epochs
            .iter()
            .rev()
            .find(|(_, closed)| !**closed)
            .map(|(id, _)| *id))
    }

    fn begin_epoch(&self, epoch_id: u64) -> Result<(), DatabaseError> {
        self.check_writable()?;
        self.state.lock().epochs.entry(epoch_id).or_insert(false);
        Ok(())
    }

    fn load(&self, epoch_id: u64) -> Result<Vec<ParticipantScore>, DatabaseError> {
        let state = self.state.lock();
        Ok(state
            .counters
            .get(&epoch_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn save(&self, epoch_id: u64, scores: &[ParticipantScore]) -> Result<(), DatabaseError> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let slot = state.counters.entry(epoch_id).or_default();
        for s in scores {
            slot.insert(s.participant_id.clone(), s.clone());
        }
        Ok(())
    }

    fn rollover(
        &self,
        epoch_id: u64,
        winner: Option<&RankedEntry>,
    ) -> Result<u64, DatabaseError> {
        self.check_writable()?;
        let next = epoch_id + 1;
        let mut state = self.state.lock();
        state.counters.remove(&epoch_id);
        state.epochs.insert(epoch_id, true);
        state.epochs.entry(next).or_insert(false);
        if let Some(w) = winner {
            state.winners.insert(epoch_id, w.clone());
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn failing_writes_leave_state_untouched() {
        let p = MemoryPersistence::new();
        p.begin_epoch(1).unwrap();
        p.set_fail_writes(true);
        let s = ParticipantScore {
            participant_id: "a".into(),
            score: 1,
            last_updated: Utc::now(),
        };
        assert!(p.upsert(1, &s).is_err());
        assert!(p.rollover(1, None).is_err());
        assert!(p.load(1).unwrap().is_empty());
        assert_eq!(p.current_epoch().unwrap(), Some(1));
    }
}
