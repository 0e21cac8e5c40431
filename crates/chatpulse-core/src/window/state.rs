//! Event window state machine.
//!
//! The window is a plain value with no timers of its own; the
//! [`Scheduler`](super::Scheduler) decides when to open and close it.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Active -> Idle -> Active -> ...
//! ```
//!
//! There is no terminal state. Opening an already active window is a no-op
//! that reports [`Event::OpenSkipped`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::events::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowState {
    Idle,
    Active,
}

#[derive(Debug, Clone)]
pub struct EventWindow {
    state: WindowState,
    /// Counter epoch collected by the active (or last) window.
    epoch: Option<u64>,
    opened_at: Option<DateTime<Utc>>,
    closes_at: Option<DateTime<Utc>>,
    active_duration: Duration,
    windows_opened: u64,
}

impl EventWindow {
    pub fn new(active_duration: Duration) -> Self {
        Self {
            state: WindowState::Idle,
            epoch: None,
            opened_at: None,
            closes_at: None,
            active_duration,
            windows_opened: 0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> WindowState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == WindowState::Active
    }

    /// The epoch increments should land in, or `None` while idle.
    pub fn accepting_epoch(&self) -> Option<u64> {
        match self.state {
            WindowState::Active => self.epoch,
            WindowState::Idle => None,
        }
    }

    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    pub fn closes_at(&self) -> Option<DateTime<Utc>> {
        self.closes_at
    }

    pub fn active_duration(&self) -> Duration {
        self.active_duration
    }

    pub fn windows_opened(&self) -> u64 {
        self.windows_opened
    }

    /// Time left before the scheduled close, zero when idle or overdue.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match (self.state, self.closes_at) {
            (WindowState::Active, Some(closes_at)) if closes_at > now => closes_at - now,
            _ => Duration::zero(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Open the window for counter epoch `epoch`.
    pub fn open(&mut self, epoch: u64, now: DateTime<Utc>) -> Event {
        if self.state == WindowState::Active {
            return Event::OpenSkipped {
                epoch: self.epoch.unwrap_or(epoch),
                at: now,
            };
        }
        let closes_at = now
            .checked_add_signed(self.active_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.state = WindowState::Active;
        self.epoch = Some(epoch);
        self.opened_at = Some(now);
        self.closes_at = Some(closes_at);
        self.windows_opened += 1;
        Event::WindowOpened {
            epoch,
            opened_at: now,
            closes_at,
        }
    }

    /// Flip to idle. Returns the epoch that was being collected, or `None`
    /// if the window was not active.
    pub fn close(&mut self) -> Option<u64> {
        if self.state != WindowState::Active {
            return None;
        }
        self.state = WindowState::Idle;
        self.epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close_cycle() {
        let mut w = EventWindow::new(Duration::minutes(10));
        assert_eq!(w.state(), WindowState::Idle);
        assert_eq!(w.accepting_epoch(), None);

        let now = Utc::now();
        match w.open(4, now) {
            Event::WindowOpened { epoch, closes_at, .. } => {
                assert_eq!(epoch, 4);
                assert_eq!(closes_at, now + Duration::minutes(10));
            }
            other => panic!("Expected WindowOpened, got {other:?}"),
        }
        assert_eq!(w.accepting_epoch(), Some(4));
        assert_eq!(w.remaining(now), Duration::minutes(10));

        assert_eq!(w.close(), Some(4));
        assert_eq!(w.state(), WindowState::Idle);
        assert_eq!(w.close(), None);
    }

    #[test]
    fn open_saturates_deadline_past_calendar_range() {
        let mut w = EventWindow::new(Duration::days(100_000_000));
        match w.open(1, Utc::now()) {
            Event::WindowOpened { closes_at, .. } => {
                assert_eq!(closes_at, DateTime::<Utc>::MAX_UTC);
            }
            other => panic!("Expected WindowOpened, got {other:?}"),
        }
        assert!(w.is_active());
    }

    #[test]
    fn open_while_active_is_noop() {
        let mut w = EventWindow::new(Duration::minutes(10));
        let now = Utc::now();
        w.open(1, now);
        let again = w.open(2, now + Duration::minutes(1));
        assert!(matches!(again, Event::OpenSkipped { epoch: 1, .. }));
        assert_eq!(w.accepting_epoch(), Some(1));
        assert_eq!(w.windows_opened(), 1);
        assert_eq!(w.closes_at(), Some(now + Duration::minutes(10)));
    }
}
