//! Engine integration tests.
//!
//! Drives a shared `Arc<Engine>` the way a gateway does: many handler tasks
//! on a multi-thread runtime, window transitions from another task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chatpulse_core::{
    AllowList, CommandEffect, Config, Engine, Event, InboundEvent, MemoryPersistence, Outcome,
    Rejection, WindowState,
};
use chrono::{Duration, Utc};

// ============================================================================
// Test Helpers
// ============================================================================

fn engine(config: Config) -> Arc<Engine> {
    Arc::new(Engine::new(config, Arc::new(MemoryPersistence::new())).unwrap())
}

fn msg(pid: &str) -> InboundEvent {
    InboundEvent::new(pid, "chat", "hello")
}

// ============================================================================
// Window lifecycle
// ============================================================================

#[test]
fn three_participants_highest_count_wins() {
    let engine = engine(Config::default());
    let start = Utc::now();
    engine.open_window(start);

    let mut offset = 0;
    for (pid, n) in [("p1", 1), ("p2", 2), ("p3", 3)] {
        for _ in 0..n {
            offset += 1;
            engine.handle(&msg(pid).at(start + Duration::seconds(offset)), &AllowList::default());
        }
    }

    let closed = engine.close_window(start + Duration::minutes(10)).unwrap();
    match closed {
        Some(Event::WindowClosed {
            epoch,
            winner: Some(winner),
            standings,
            ..
        }) => {
            assert_eq!(epoch, 1);
            assert_eq!(winner.participant_id, "p3");
            assert_eq!(winner.score, 3);
            let order: Vec<_> = standings.iter().map(|e| e.participant_id.as_str()).collect();
            assert_eq!(order, vec!["p3", "p2", "p1"]);
        }
        other => panic!("Expected WindowClosed with a winner, got {other:?}"),
    }
    assert!(engine.counters().snapshot().is_empty());
    assert_eq!(engine.window_state(), WindowState::Idle);
}

#[test]
fn tie_is_won_by_first_to_reach_score() {
    let engine = engine(Config::default());
    let t0 = Utc::now();
    engine.open_window(t0);

    // zed reaches 2 before amy does.
    for (pid, secs) in [("zed", 1), ("amy", 2), ("zed", 3), ("amy", 4)] {
        engine.handle(&msg(pid).at(t0 + Duration::seconds(secs)), &AllowList::default());
    }

    let Some(Event::WindowClosed { winner, standings, .. }) = engine.close_window(t0).unwrap() else {
        panic!("window was active");
    };
    assert_eq!(winner.unwrap().participant_id, "zed");
    // Standings break ties by participant id.
    assert_eq!(standings[0].participant_id, "amy");
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_handlers_lose_no_increments() {
    let engine = engine(Config::default());
    engine.open_window(Utc::now());

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..125 {
                engine.handle(&msg("amy"), &AllowList::default());
            }
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    assert_eq!(engine.counters().score_of("amy"), 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn increments_racing_close_are_counted_or_rejected() {
    let engine = engine(Config::default());
    engine.open_window(Utc::now());

    let counted = Arc::new(AtomicU64::new(0));
    let rejected = Arc::new(AtomicU64::new(0));
    let mut tasks = Vec::new();
    for i in 0..4 {
        let engine = engine.clone();
        let counted = counted.clone();
        let rejected = rejected.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..200 {
                for outcome in engine.handle(&msg(&format!("p{i}")), &AllowList::default()) {
                    match outcome {
                        Outcome::Counted { .. } => counted.fetch_add(1, Ordering::SeqCst),
                        Outcome::Rejected(Rejection::WindowClosed { .. }) => {
                            rejected.fetch_add(1, Ordering::SeqCst)
                        }
                        _ => 0,
                    };
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    tokio::task::yield_now().await;
    let closed = engine.close_window(Utc::now()).unwrap();
    for t in tasks {
        t.await.unwrap();
    }

    let Some(Event::WindowClosed { standings, .. }) = closed else {
        panic!("window was active");
    };
    let in_final: u64 = standings.iter().map(|e| e.score).sum();

    // Every counted increment is in the final standings; nothing leaked
    // into the next epoch.
    assert_eq!(in_final, counted.load(Ordering::SeqCst));
    assert!(engine.counters().is_empty());
}

// ============================================================================
// Admin commands
// ============================================================================

#[test]
fn sixth_purge_in_a_minute_is_rate_limited() {
    let engine = engine(Config::default());
    let admins = AllowList::new(["mod"]);

    for _ in 0..5 {
        let out = engine.handle(&InboundEvent::new("mod", "chat", "!purge 10"), &admins);
        assert!(matches!(
            &out[..],
            [Outcome::Command {
                effect: CommandEffect::Purge { count: 10, .. },
                ..
            }]
        ));
    }
    let out = engine.handle(&InboundEvent::new("mod", "chat", "!purge 10"), &admins);
    match &out[..] {
        [Outcome::Rejected(Rejection::RateLimited { retry_after, .. })] => {
            assert!(*retry_after > std::time::Duration::ZERO);
            assert!(*retry_after <= std::time::Duration::from_secs(60));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }

    // Other commands have their own ledger.
    let out = engine.handle(&InboundEvent::new("mod", "chat", "!send news hi all"), &admins);
    assert!(matches!(&out[..], [Outcome::Command { .. }]));
}

#[test]
fn commands_and_bots_are_never_counted() {
    let engine = engine(Config::default());
    engine.open_window(Utc::now());

    engine.handle(&InboundEvent::new("mod", "chat", "!leaderboard"), &AllowList::new(["mod"]));
    let mut bot = msg("helper-bot");
    bot.is_bot = true;
    assert!(engine.handle(&bot, &AllowList::default()).is_empty());

    assert!(engine.counters().is_empty());
}
