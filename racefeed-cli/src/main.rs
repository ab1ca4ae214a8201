//! Racefeed CLI - serve and watch live race telemetry feeds.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use racefeed::config::ConfigFile;
use racefeed::logging::init_logging;

mod commands;
mod error;

use commands::common::resolve_config_path;
use commands::config::ConfigCommands;
use commands::fetch::FetchArgs;
use commands::serve::ServeArgs;
use commands::watch::WatchArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "racefeed")]
#[command(version = racefeed::VERSION)]
#[command(about = "Stream live race telemetry and follow it per driver", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/racefeed/config.ini)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the feed server
    Serve(ServeArgs),

    /// Follow a live feed in the terminal
    Watch(WatchArgs),

    /// Print the most recent race once, as JSON
    Fetch(FetchArgs),

    /// View or change configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = resolve_config_path(cli.config);

    if let Commands::Config(command) = cli.command {
        return commands::config::run(command, &config_path);
    }

    let config = ConfigFile::load_from(&config_path)?;
    let mut logging = config.logging_config();
    if cli.verbose {
        logging = logging.with_level("debug");
    }
    let _log_guard = init_logging(&logging);

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args, config),
        Commands::Watch(args) => commands::watch::run(args, config),
        Commands::Fetch(args) => commands::fetch::run(args, config),
        Commands::Config(_) => Ok(()),
    }
}
