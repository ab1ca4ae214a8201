//! CLI error type.

use std::fmt;

use racefeed::config::ConfigError;
use racefeed::server::ServerError;
use racefeed::ConsumerError;

/// Errors surfaced to the user by `racefeed` commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid arguments or configuration values.
    Config(String),
    /// Reading or writing the config file failed.
    ConfigFile(ConfigError),
    /// The feed server failed.
    Serve(ServerError),
    /// Talking to a feed server failed.
    Client(ConsumerError),
    /// Runtime setup or output failed.
    Io(std::io::Error),
}

impl CliError {
    /// Print the error and exit with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("{} {}", console::style("Error:").red().bold(), self);
        std::process::exit(1);
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Serve(e) => write!(f, "{}", e),
            CliError::Client(ConsumerError::NoRace) => {
                write!(f, "The server has no race data yet")
            }
            CliError::Client(e) => write!(f, "Feed request failed: {}", e),
            CliError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(_) => None,
            CliError::ConfigFile(e) => Some(e),
            CliError::Serve(e) => Some(e),
            CliError::Client(e) => Some(e),
            CliError::Io(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<ServerError> for CliError {
    fn from(e: ServerError) -> Self {
        CliError::Serve(e)
    }
}

impl From<ConsumerError> for CliError {
    fn from(e: ConsumerError) -> Self {
        CliError::Client(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e)
    }
}
