//! JSON-lines driver.
//!
//! Reads one [`InboundEvent`] per stdin line and prints, one JSON object per
//! line on stdout:
//!
//! - the outcomes of each event (`{"outcome": ...}`)
//! - engine events as they happen (`{"type": "WindowOpened", ...}`)
//! - announcements to post (`{"announce": {"channel_id": ..., "text": ...}}`)
//!
//! Stops on EOF or Ctrl-C, letting the scheduler finish its last close.

use std::path::Path;
use std::sync::Arc;

use chatpulse_core::{
    AllowList, Engine, Event, InboundEvent, Outcome, Rejection, Scheduler,
};
use clap::Args;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use super::{load_config, open_database, CliResult};

#[derive(Args)]
pub struct RunArgs {
    /// Participant allowed to run admin commands (repeatable)
    #[arg(long = "admin")]
    admins: Vec<String>,
}

pub fn run(args: RunArgs, dir: &Path) -> CliResult {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(drive(args, dir))
}

async fn drive(args: RunArgs, dir: &Path) -> CliResult {
    let config = load_config(dir)?;
    let db = Arc::new(open_database(dir)?);
    let open_on_start = config.window.open_on_start;
    let engine = Arc::new(Engine::new(config, db)?);
    let admins = AllowList::new(args.admins);

    let mut events = engine.subscribe();
    let scheduler = Scheduler::new(engine.clone()).spawn();

    // Read input only once the first window is open, so the first lines
    // are counted deterministically.
    if open_on_start {
        if let Ok(event) = events.recv().await {
            print_event(&engine, &event)?;
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => process_line(&engine, &admins, &line)?,
                    None => {
                        tracing::info!("end of input");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => print_event(&engine, &event)?,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event output fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = &mut interrupted => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        }
    }

    scheduler.shutdown().await;
    while let Ok(event) = events.try_recv() {
        print_event(&engine, &event)?;
    }
    Ok(())
}

fn process_line(engine: &Engine, admins: &AllowList, line: &str) -> CliResult {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }

    // Handled inline so outcomes print in input order.
    let outcomes = match serde_json::from_str::<InboundEvent>(line) {
        Ok(event) => engine.handle(&event, admins),
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed event");
            vec![Outcome::Rejected(Rejection::InvalidInput {
                message: e.to_string(),
            })]
        }
    };
    for outcome in &outcomes {
        println!("{}", serde_json::to_string(outcome)?);
    }
    Ok(())
}

fn print_event(engine: &Engine, event: &Event) -> CliResult {
    println!("{}", serde_json::to_string(event)?);
    if let Some(announcement) = engine.announcement(event) {
        println!("{}", json!({ "announce": announcement }));
    }
    Ok(())
}
