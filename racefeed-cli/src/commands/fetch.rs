//! `racefeed fetch`: print the one-shot query result as JSON.

use clap::Args;
use racefeed::config::ConfigFile;

use super::common::{feed_client, runtime};
use crate::error::CliError;

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Only include this driver
    #[arg(long)]
    pub driver: Option<String>,

    /// API root of the feed server (default: [client] url)
    #[arg(long)]
    pub url: Option<String>,
}

pub fn run(args: FetchArgs, config: ConfigFile) -> Result<(), CliError> {
    let client = feed_client(args.url, &config)?;
    let races = runtime()?.block_on(client.fetch_races(args.driver.as_deref()))?;

    let json = serde_json::to_string_pretty(&races)
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    println!("{}", json);
    Ok(())
}
