//! `racefeed serve`: run the feed server.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use console::style;
use racefeed::config::ConfigFile;
use racefeed::server::{self, AppState};
use racefeed::OverlapPolicy;

use super::common::{open_store, runtime, shutdown_on_ctrl_c};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on (default: [server] bind)
    #[arg(long)]
    pub bind: Option<String>,

    /// JSON file holding an array of races (default: [store] path, or empty)
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Milliseconds between store reads for each stream
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Start a new read every tick even if the previous one is still running
    #[arg(long)]
    pub allow_overlap: bool,
}

/// Apply command-line overrides on top of the file settings.
fn apply_overrides(args: &ServeArgs, config: &mut ConfigFile) -> Result<(), CliError> {
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(store) = &args.store {
        config.store.path = Some(store.clone());
    }
    if let Some(ms) = args.poll_interval_ms {
        if ms == 0 {
            return Err(CliError::Config(
                "--poll-interval-ms must be greater than zero".to_string(),
            ));
        }
        config.server.poll_interval = Duration::from_millis(ms);
    }
    if args.allow_overlap {
        config.server.overlap = OverlapPolicy::AllowOverlap;
    }
    Ok(())
}

pub fn run(args: ServeArgs, mut config: ConfigFile) -> Result<(), CliError> {
    apply_overrides(&args, &mut config)?;

    println!("Racefeed Server v{}", racefeed::VERSION);
    println!("======================");
    println!();
    println!("Bind:          {}", config.server.bind);
    match &config.store.path {
        Some(path) => println!("Store:         {}", path.display()),
        None => println!("Store:         in-memory (empty)"),
    }
    println!(
        "Poll interval: {} ms ({})",
        config.server.poll_interval.as_millis(),
        config.server.overlap
    );
    println!();

    runtime()?.block_on(async {
        let shutdown = shutdown_on_ctrl_c();
        let store = open_store(config.store.path.as_deref());
        let state = AppState::new(store, config.publisher_config(), shutdown);

        let listener = server::bind(&config.server.bind).await?;
        println!(
            "{} http://{}/api/races/realtime",
            style("Streaming on").green().bold(),
            listener.local_addr()?
        );
        println!("Press Ctrl+C to stop");
        println!();

        server::serve(listener, state).await?;
        println!();
        println!("Server stopped.");
        Ok::<(), CliError>(())
    })
}
