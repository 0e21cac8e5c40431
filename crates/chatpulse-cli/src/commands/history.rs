use std::path::Path;

use clap::Args;

use super::{open_database, CliResult};

#[derive(Args)]
pub struct HistoryArgs {
    /// Number of epochs to show, newest first
    #[arg(long, default_value_t = 10)]
    limit: usize,
    /// Print JSON instead of text
    #[arg(long)]
    json: bool,
}

pub fn run(args: HistoryArgs, dir: &Path) -> CliResult {
    let db = open_database(dir)?;
    let epochs = db.recent_epochs(args.limit)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&epochs)?);
        return Ok(());
    }

    for e in &epochs {
        let status = match (&e.closed_at, &e.winner_id, e.winner_score) {
            (None, _, _) => "open".to_string(),
            (Some(_), Some(id), Some(score)) => format!("won by {id} ({score})"),
            (Some(_), _, _) => "closed, no participants".to_string(),
        };
        println!(
            "#{:<4} {}  {status}",
            e.epoch_id,
            e.started_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
