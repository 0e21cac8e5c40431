use std::path::Path;

use clap::Args;
use chatpulse_core::admin::render_standings;
use chatpulse_core::ranking;
use chatpulse_core::CounterPersistence;

use super::{load_config, open_database, CliResult};

#[derive(Args)]
pub struct LeaderboardArgs {
    /// Number of entries (default: ranking.top_k)
    #[arg(long)]
    top: Option<usize>,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

/// Standings of the open epoch as last persisted. Under the relaxed policy
/// a running engine may hold newer, unflushed counts.
pub fn run(args: LeaderboardArgs, dir: &Path) -> CliResult {
    let config = load_config(dir)?;
    let db = open_database(dir)?;

    let Some(epoch) = db.current_epoch()? else {
        if args.json {
            println!("[]");
        } else {
            println!("No events recorded yet.");
        }
        return Ok(());
    };

    let scores = db.load(epoch)?;
    let top = args.top.unwrap_or(config.ranking.top_k);
    let entries = ranking::rank(&scores, config.ranking.tie_break, Some(top));

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        println!("{}", render_standings(epoch, &entries));
    }
    Ok(())
}
