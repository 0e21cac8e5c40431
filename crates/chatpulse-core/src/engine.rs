//! Shared engine context and inbound event router.
//!
//! One [`Engine`] owns every piece of mutable state (counters, event window,
//! rate limiter, guess game) and is shared as `Arc<Engine>` between the
//! gateway's event handlers and the [`Scheduler`](crate::window::Scheduler).
//! Each component guards itself, so handlers for different events run
//! concurrently and only contend on the state they actually touch.
//!
//! `handle` never fails as a whole: each route of an inbound event produces
//! its own [`Outcome`], and an error on one event is logged and reported as
//! [`Outcome::Failed`] without affecting any other event.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::admin::{self, AdminAction, Authorizer, CommandEffect};
use crate::classify::{AdminCommand, Classifier, EventKind};
use crate::counter::CounterStore;
use crate::error::{Rejection, Result, ValidationError};
use crate::events::{Announcement, Event, InboundEvent};
use crate::guess::{GuessGame, GuessOutcome};
use crate::rate_limit::RateLimiter;
use crate::ranking::RankedEntry;
use crate::storage::{Config, CounterPersistence};
use crate::window::{EventWindow, WindowState};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// Engagement message while no window is active.
    WindowIdle,
    /// Guess channel message while the game is disabled.
    GuessDisabled,
}

/// Result of one route of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Counted {
        participant_id: String,
        epoch: u64,
        score: u64,
    },
    Ignored {
        reason: IgnoreReason,
    },
    Guess {
        participant_id: String,
        result: GuessOutcome,
    },
    Command {
        participant_id: String,
        effect: CommandEffect,
    },
    Rejected(Rejection),
    Failed {
        message: String,
    },
}

pub struct Engine {
    config: Config,
    counters: CounterStore,
    window: RwLock<EventWindow>,
    /// Epoch whose close flipped the window but has not been reset yet.
    pending_close: Mutex<Option<u64>>,
    limiter: RateLimiter,
    guess: GuessGame,
    classifier: Classifier,
    events: broadcast::Sender<Event>,
}

impl Engine {
    /// Build an engine over `persistence`, resuming its open epoch.
    ///
    /// # Errors
    /// Returns an error if the config is invalid or the counter store cannot
    /// be restored.
    pub fn new(config: Config, persistence: Arc<dyn CounterPersistence>) -> Result<Self> {
        config.validate()?;
        let counters = CounterStore::open(persistence, config.persistence.policy)?;
        let guess = GuessGame::from_config(&config.guess)?;
        let active = chrono::Duration::from_std(config.window.active()).map_err(|e| {
            ValidationError::InvalidValue {
                field: "window.active_secs".into(),
                message: e.to_string(),
            }
        })?;
        let classifier = Classifier::new(config.channels.clone(), &config.commands);
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        tracing::info!(
            epoch = counters.epoch(),
            policy = ?config.persistence.policy,
            "engine ready"
        );

        Ok(Self {
            window: RwLock::new(EventWindow::new(active)),
            pending_close: Mutex::new(None),
            limiter: RateLimiter::new(),
            counters,
            guess,
            classifier,
            events,
            config,
        })
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub fn guess(&self) -> &GuessGame {
        &self.guess
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn window_state(&self) -> WindowState {
        self.window.read().state()
    }

    /// Copy of the current window.
    pub fn window(&self) -> EventWindow {
        self.window.read().clone()
    }

    pub fn close_pending(&self) -> bool {
        self.pending_close.lock().is_some()
    }

    /// Current standings using the configured tie-break and top-K.
    pub fn leaderboard(&self) -> Vec<RankedEntry> {
        self.counters
            .leaderboard(self.config.ranking.tie_break, Some(self.config.ranking.top_k))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Where and what to post for `event`.
    pub fn announcement(&self, event: &Event) -> Option<Announcement> {
        let channels = &self.config.channels;
        let channel = match event {
            Event::GuessWon { .. } => channels.guess.as_deref().unwrap_or(&channels.announce),
            _ => &channels.announce,
        };
        event.announcement(channel)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Classify `event` and run every route it takes.
    pub fn handle(&self, event: &InboundEvent, authorizer: &dyn Authorizer) -> Vec<Outcome> {
        self.classifier
            .classify(event)
            .into_iter()
            .filter_map(|kind| match kind {
                EventKind::EngagementMessage => Some(self.count_message(event)),
                EventKind::GuessAttempt => Some(self.submit_guess(event)),
                EventKind::AdminCommand(cmd) => Some(self.run_command(event, &cmd, authorizer)),
                EventKind::Other => None,
            })
            .collect()
    }

    fn count_message(&self, event: &InboundEvent) -> Outcome {
        let Some(epoch) = self.window.read().accepting_epoch() else {
            return Outcome::Ignored {
                reason: IgnoreReason::WindowIdle,
            };
        };
        match self
            .counters
            .increment_in(epoch, &event.participant_id, event.timestamp)
        {
            Ok(Some(score)) => Outcome::Counted {
                participant_id: event.participant_id.clone(),
                epoch,
                score,
            },
            Ok(None) => {
                tracing::debug!(
                    participant = %event.participant_id,
                    epoch,
                    "increment arrived after close"
                );
                Outcome::Rejected(Rejection::WindowClosed { epoch })
            }
            Err(e) => {
                tracing::warn!(participant = %event.participant_id, epoch, error = %e, "increment failed");
                Outcome::Failed {
                    message: e.to_string(),
                }
            }
        }
    }

    fn submit_guess(&self, event: &InboundEvent) -> Outcome {
        if !self.config.guess.enabled {
            return Outcome::Ignored {
                reason: IgnoreReason::GuessDisabled,
            };
        }
        let result = self.guess.submit_guess(&event.participant_id, &event.text);
        if let GuessOutcome::Win {
            target,
            wins,
            guess_epoch,
        } = &result
        {
            self.emit(Event::GuessWon {
                participant_id: event.participant_id.clone(),
                target: *target,
                guess_epoch: *guess_epoch,
                wins: *wins,
                at: event.timestamp,
            });
        }
        Outcome::Guess {
            participant_id: event.participant_id.clone(),
            result,
        }
    }

    fn run_command(
        &self,
        event: &InboundEvent,
        command: &AdminCommand,
        authorizer: &dyn Authorizer,
    ) -> Outcome {
        let action = match admin::admit(
            authorizer,
            &self.limiter,
            &self.config.rate_limits,
            &event.participant_id,
            command,
            Instant::now(),
        ) {
            Ok(action) => action,
            Err(rejection) => return Outcome::Rejected(rejection),
        };

        let effect = match action {
            AdminAction::Purge { channel_id, count } => CommandEffect::Purge { channel_id, count },
            AdminAction::Send { channel_id, text } => CommandEffect::Send { channel_id, text },
            AdminAction::Leaderboard { guess: false } => CommandEffect::Send {
                channel_id: event.channel_id.clone(),
                text: admin::render_standings(self.counters.epoch(), &self.leaderboard()),
            },
            AdminAction::Leaderboard { guess: true } => CommandEffect::Send {
                channel_id: event.channel_id.clone(),
                text: admin::render_guess_board(
                    &self.guess.leaderboard(Some(self.config.ranking.top_k)),
                ),
            },
        };

        tracing::info!(actor = %event.participant_id, command = command.name(), "admin command admitted");
        Outcome::Command {
            participant_id: event.participant_id.clone(),
            effect,
        }
    }

    /// Start collecting the current counter epoch. A no-op (reported as
    /// [`Event::OpenSkipped`]) while a window is active or a close is still
    /// waiting to reset the counters.
    pub fn open_window(&self, now: DateTime<Utc>) -> Event {
        let pending = self.pending_close.lock();
        let event = match *pending {
            Some(epoch) => Event::OpenSkipped { epoch, at: now },
            None => self.window.write().open(self.counters.epoch(), now),
        };
        drop(pending);

        match &event {
            Event::WindowOpened { epoch, closes_at, .. } => {
                tracing::info!(epoch, closes_at = %closes_at, "window opened");
            }
            Event::OpenSkipped { epoch, .. } => {
                tracing::info!(epoch, "open skipped, previous window still running");
            }
            _ => {}
        }
        self.emit(event.clone());
        event
    }

    /// Stop counting, rank the final snapshot and reset the counters.
    ///
    /// Returns `Ok(None)` when no window is active and no close is pending.
    ///
    /// # Errors
    /// If the counters cannot be reset, the window stays idle and the close
    /// stays pending; calling again retries it.
    pub fn close_window(&self, now: DateTime<Utc>) -> Result<Option<Event>> {
        let mut pending = self.pending_close.lock();
        let epoch = match self.window.write().close() {
            Some(epoch) => epoch,
            None => match *pending {
                Some(epoch) => epoch,
                None => return Ok(None),
            },
        };

        if self.counters.epoch() != epoch {
            *pending = None;
            return Ok(None);
        }

        *pending = Some(epoch);
        let summary = match self.counters.close_epoch() {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(epoch, error = %e, "close failed, will retry");
                return Err(e);
            }
        };
        *pending = None;
        drop(pending);

        tracing::info!(
            epoch,
            participants = summary.standings.len(),
            winner = summary.winner.as_ref().map(|w| w.participant_id.as_str()),
            "window closed"
        );

        let event = Event::WindowClosed {
            epoch: summary.epoch,
            winner: summary.winner,
            standings: summary.standings,
            at: now,
        };
        self.emit(event.clone());
        Ok(Some(event))
    }

    /// Write pending counters (relaxed policy).
    pub fn flush(&self) -> Result<usize> {
        let written = self.counters.flush()?;
        if written > 0 {
            tracing::debug!(written, "counters flushed");
        }
        Ok(written)
    }

    /// Drop rate-limit ledgers that have been idle longer than any
    /// configured interval.
    pub fn sweep_rate_limits(&self) -> usize {
        let limits = &self.config.rate_limits;
        let longest = limits
            .commands
            .values()
            .map(|l| l.interval())
            .chain(std::iter::once(limits.default.interval()))
            .max()
            .unwrap_or_default();
        self.limiter.sweep(longest, Instant::now())
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::AllowList;
    use crate::storage::MemoryPersistence;

    fn engine_with(config: Config) -> (Arc<MemoryPersistence>, Engine) {
        let backend = Arc::new(MemoryPersistence::new());
        let engine = Engine::new(config, backend.clone()).unwrap();
        (backend, engine)
    }

    fn engine() -> (Arc<MemoryPersistence>, Engine) {
        engine_with(Config::default())
    }

    fn nobody() -> AllowList {
        AllowList::default()
    }

    #[test]
    fn messages_count_only_while_active() {
        let (_, engine) = engine();
        let msg = InboundEvent::new("amy", "chat", "hello");
        assert_eq!(
            engine.handle(&msg, &nobody()),
            vec![Outcome::Ignored {
                reason: IgnoreReason::WindowIdle
            }]
        );

        engine.open_window(Utc::now());
        assert_eq!(
            engine.handle(&msg, &nobody()),
            vec![Outcome::Counted {
                participant_id: "amy".into(),
                epoch: 1,
                score: 1
            }]
        );
    }

    #[test]
    fn close_announces_winner_and_resets() {
        let (_, engine) = engine();
        let mut rx = engine.subscribe();
        engine.open_window(Utc::now());
        for (pid, n) in [("amy", 1), ("bob", 2), ("cat", 3)] {
            for _ in 0..n {
                engine.handle(&InboundEvent::new(pid, "chat", "hi"), &nobody());
            }
        }

        let closed = engine.close_window(Utc::now()).unwrap().unwrap();
        match &closed {
            Event::WindowClosed { epoch, winner, standings, .. } => {
                assert_eq!(*epoch, 1);
                assert_eq!(winner.as_ref().unwrap().participant_id, "cat");
                assert_eq!(standings.len(), 3);
            }
            other => panic!("Expected WindowClosed, got {other:?}"),
        }
        assert!(engine.counters().is_empty());
        assert_eq!(engine.counters().epoch(), 2);
        assert_eq!(engine.window_state(), WindowState::Idle);

        assert!(matches!(rx.try_recv().unwrap(), Event::WindowOpened { .. }));
        assert!(matches!(rx.try_recv().unwrap(), Event::WindowClosed { .. }));

        let text = engine.announcement(&closed).unwrap().text;
        assert!(text.contains("cat"));
    }

    #[test]
    fn oversized_window_is_rejected_at_construction() {
        let mut config = Config::default();
        config.window.active_secs = 10_000_000_000_000;
        let backend = Arc::new(MemoryPersistence::new());
        assert!(Engine::new(config, backend).is_err());
    }

    #[test]
    fn close_when_idle_is_noop() {
        let (_, engine) = engine();
        assert!(engine.close_window(Utc::now()).unwrap().is_none());
    }

    #[test]
    fn failed_close_stays_pending_and_blocks_open() {
        let (backend, engine) = engine();
        engine.open_window(Utc::now());
        engine.handle(&InboundEvent::new("amy", "chat", "hi"), &nobody());

        backend.set_fail_writes(true);
        assert!(engine.close_window(Utc::now()).is_err());
        assert!(engine.close_pending());
        assert_eq!(engine.window_state(), WindowState::Idle);
        assert!(matches!(engine.open_window(Utc::now()), Event::OpenSkipped { epoch: 1, .. }));

        backend.set_fail_writes(false);
        let closed = engine.close_window(Utc::now()).unwrap().unwrap();
        assert!(matches!(closed, Event::WindowClosed { epoch: 1, winner: Some(_), .. }));
        assert!(!engine.close_pending());
        assert!(matches!(engine.open_window(Utc::now()), Event::WindowOpened { epoch: 2, .. }));
    }

    #[test]
    fn persistence_failure_is_isolated_per_event() {
        let (backend, engine) = engine();
        engine.open_window(Utc::now());
        backend.set_fail_writes(true);
        let failed = engine.handle(&InboundEvent::new("amy", "chat", "hi"), &nobody());
        assert!(matches!(failed[0], Outcome::Failed { .. }));

        backend.set_fail_writes(false);
        let ok = engine.handle(&InboundEvent::new("bob", "chat", "hi"), &nobody());
        assert!(matches!(ok[0], Outcome::Counted { score: 1, .. }));
        assert_eq!(engine.counters().score_of("amy"), 0);
    }

    #[test]
    fn guess_win_emits_event() {
        let mut config = Config::default();
        config.channels.guess = Some("numbers".into());
        config.channels.engagement = Some("chat".into());
        let (_, engine) = engine_with(config);
        let mut rx = engine.subscribe();
        engine.guess().set_target(7);

        let outcomes = engine.handle(&InboundEvent::new("amy", "numbers", "7"), &nobody());
        assert!(matches!(
            &outcomes[..],
            [Outcome::Guess {
                result: GuessOutcome::Win { target: 7, wins: 1, .. },
                ..
            }]
        ));
        let won = rx.try_recv().unwrap();
        assert_eq!(engine.announcement(&won).unwrap().channel_id, "numbers");
    }

    #[test]
    fn admin_commands_are_gated() {
        let mut config = Config::default();
        config.rate_limits.commands.insert(
            "purge".into(),
            crate::storage::RateLimitConfig {
                limit: 1,
                interval_secs: 60,
            },
        );
        let (_, engine) = engine_with(config);
        let admins = AllowList::new(["mod"]);

        let denied = engine.handle(&InboundEvent::new("amy", "chat", "!purge 5"), &admins);
        assert!(matches!(denied[0], Outcome::Rejected(Rejection::PermissionDenied { .. })));

        let ok = engine.handle(&InboundEvent::new("mod", "chat", "!purge 5"), &admins);
        assert_eq!(
            ok,
            vec![Outcome::Command {
                participant_id: "mod".into(),
                effect: CommandEffect::Purge {
                    channel_id: "chat".into(),
                    count: 5
                }
            }]
        );

        let limited = engine.handle(&InboundEvent::new("mod", "chat", "!purge 5"), &admins);
        assert!(matches!(limited[0], Outcome::Rejected(Rejection::RateLimited { .. })));
    }

    #[test]
    fn leaderboard_command_posts_standings() {
        let (_, engine) = engine();
        engine.open_window(Utc::now());
        engine.handle(&InboundEvent::new("amy", "chat", "hi"), &nobody());
        let out = engine.handle(
            &InboundEvent::new("mod", "chat", "!leaderboard"),
            &AllowList::new(["mod"]),
        );
        match &out[..] {
            [Outcome::Command {
                effect: CommandEffect::Send { channel_id, text },
                ..
            }] => {
                assert_eq!(channel_id, "chat");
                assert!(text.contains("1. amy (1)"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn outcomes_serialize_with_tags() {
        let o = Outcome::Rejected(Rejection::WindowClosed { epoch: 3 });
        let json = serde_json::to_value(&o).unwrap();
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["kind"], "window_closed");
    }
}
