//! Timer-driven window transitions.
//!
//! The scheduler is a single tokio task selecting over deadlines:
//!
//! - a repeating open tick every `window.period_secs`
//! - the close deadline of the active window (`opened + active_secs`)
//! - a flush tick under the relaxed persistence policy
//! - the shutdown signal
//!
//! Transitions run on this task, never on the handlers that ingest events.
//! A close whose reset fails is retried after `window.close_retry_secs`.
//! On shutdown, a pending close is finished (and an active window closed
//! when `window.close_on_shutdown` is set) before the task returns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::counter::PersistencePolicy;
use crate::engine::Engine;
use crate::events::Event;

pub struct Scheduler {
    engine: Arc<Engine>,
}

/// Owner's side of a running [`Scheduler`].
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait for the scheduler to finish its last close
    /// and flush.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "scheduler task panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Spawn the scheduler on the current tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(self.run(rx));
        SchedulerHandle { shutdown: tx, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let cfg = self.engine.config().clone();
        let period = cfg.window.period();
        let active = cfg.window.active();
        let retry = Duration::from_secs(cfg.window.close_retry_secs.max(1));
        let relaxed = self.engine.counters().policy() == PersistencePolicy::Relaxed;
        let flush_every = Duration::from_secs(cfg.persistence.flush_interval_secs);

        let first_open = if cfg.window.open_on_start {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut opens = time::interval_at(first_open, period);
        opens.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut flushes = time::interval_at(Instant::now() + flush_every, flush_every);
        flushes.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut close_at: Option<Instant> = None;

        tracing::info!(
            period_secs = period.as_secs(),
            active_secs = active.as_secs(),
            relaxed,
            "scheduler started"
        );

        loop {
            // A close due at the same instant as the next open runs first.
            tokio::select! {
                biased;
                _ = time::sleep_until(close_at.unwrap_or_else(Instant::now)), if close_at.is_some() => {
                    close_at = match self.engine.close_window(Utc::now()) {
                        Ok(_) => None,
                        Err(_) => Some(Instant::now() + retry),
                    };
                }
                _ = opens.tick() => {
                    if let Event::WindowOpened { .. } = self.engine.open_window(Utc::now()) {
                        close_at = Some(Instant::now() + active);
                    }
                    self.engine.sweep_rate_limits();
                }
                _ = flushes.tick(), if relaxed => {
                    if let Err(e) = self.engine.flush() {
                        tracing::warn!(error = %e, "flush failed, keeping counters pending");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.finish(cfg.window.close_on_shutdown);
    }

    fn finish(&self, close_active: bool) {
        if self.engine.close_pending() || (close_active && self.engine.window().is_active()) {
            if let Err(e) = self.engine.close_window(Utc::now()) {
                tracing::error!(error = %e, "close on shutdown failed");
            }
        }
        if let Err(e) = self.engine.flush() {
            tracing::error!(error = %e, "final flush failed");
        }
        tracing::info!("scheduler stopped");
    }
}
