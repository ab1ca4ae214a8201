//! Helpers shared across CLI commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use racefeed::config::{config_file_path, ConfigFile};
use racefeed::{FeedClient, InMemoryStore, JsonFileStore, TelemetryStore};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;

/// The `--config` path, or the default location.
pub fn resolve_config_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path.unwrap_or_else(config_file_path)
}

/// Multi-threaded runtime for the async commands.
pub fn runtime() -> Result<Runtime, CliError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Io)
}

/// Token cancelled on the first Ctrl+C.
///
/// Must be called inside the runtime.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signalled = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
        signalled.cancel();
    });
    token
}

/// Store backend for `serve`: the JSON file when a path is given, otherwise
/// an empty in-memory store.
pub fn open_store(path: Option<&Path>) -> Arc<dyn TelemetryStore> {
    match path {
        Some(path) => Arc::new(JsonFileStore::new(path)),
        None => Arc::new(InMemoryStore::new()),
    }
}

/// Build a client from `--url` or the `[client] url` setting.
pub fn feed_client(cli_url: Option<String>, config: &ConfigFile) -> Result<FeedClient, CliError> {
    let url = cli_url.unwrap_or_else(|| config.client.url.clone());
    FeedClient::new(url).map_err(CliError::from)
}
