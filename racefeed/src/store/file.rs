//! JSON file race store.
//!
//! Reads a JSON array of race documents from disk on every query. Whatever
//! process maintains the file (an ingestion service, a replay tool, a test
//! fixture) is outside this crate; the file is only ever read.

use std::path::{Path, PathBuf};

use tracing::trace;

use super::{select_most_recent, BoxFuture, StoreError, TelemetryStore};
use crate::model::Race;

/// Store backed by a JSON file containing `[Race, ...]`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_races(&self) -> Result<Vec<Race>, StoreError> {
        let bytes = tokio::fs::read(&self.path).await?;
        // An empty file is an empty store, not a decode failure.
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        let races: Vec<Race> = serde_json::from_slice(&bytes)?;
        trace!(path = %self.path.display(), races = races.len(), "Read race file");
        Ok(races)
    }
}

impl TelemetryStore for JsonFileStore {
    fn most_recent_race<'a>(
        &'a self,
        driver_filter: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<Race>, StoreError>> {
        Box::pin(async move {
            let races = self.read_races().await?;
            Ok(select_most_recent(races, driver_filter))
        })
    }
}
