use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "chatpulse", version, about = "Chat engagement engine CLI")]
struct Cli {
    /// Directory holding config.toml and chatpulse.db
    /// (default: ~/.config/chatpulse, or chatpulse-dev with CHATPULSE_ENV=dev)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine over JSON-lines events read from stdin
    Run(commands::run::RunArgs),
    /// Show the current event standings
    Leaderboard(commands::leaderboard::LeaderboardArgs),
    /// Show closed and open epochs
    History(commands::history::HistoryArgs),
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let dir = match commands::resolve_data_dir(cli.data_dir) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(args, &dir),
        Commands::Leaderboard(args) => commands::leaderboard::run(args, &dir),
        Commands::History(args) => commands::history::run(args, &dir),
        Commands::Config { action } => commands::config::run(action, &dir),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
