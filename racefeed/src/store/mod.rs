//! Telemetry store interface.
//!
//! The store is an opaque, shared, read-only collaborator. This module defines
//! the single query the streaming subsystem needs and two backends:
//!
//! - [`InMemoryStore`] - races held in memory, for tests and embedding
//! - [`JsonFileStore`] - a JSON document re-read on every query
//!
//! # Query Semantics
//!
//! `most_recent_race` sorts races by id descending and takes one. With a
//! driver filter, the driver sequence is reduced to the entries whose name
//! equals the filter (zero or one); every other field passes through.
//!
//! # Dyn Compatibility
//!
//! The trait returns `Pin<Box<dyn Future>>` so that the server can hold an
//! `Arc<dyn TelemetryStore>` shared by every subscription.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::model::Race;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors a store read can produce.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error reading the backing data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored documents could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The read did not finish within the allowed time.
    #[error("Store read timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The store is unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to race documents.
///
/// Implementations must be idempotent and side-effect free: the publisher
/// calls `most_recent_race` once per poll cycle per subscriber.
pub trait TelemetryStore: Send + Sync {
    /// Fetch the race with the greatest id, optionally reduced to one driver.
    ///
    /// Returns `Ok(None)` when the store holds no race at all.
    fn most_recent_race<'a>(
        &'a self,
        driver_filter: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<Race>, StoreError>>;
}

/// Pick the race with the greatest id and apply the driver filter.
///
/// Shared by every backend so the query semantics stay identical.
pub fn select_most_recent<I>(races: I, driver_filter: Option<&str>) -> Option<Race>
where
    I: IntoIterator<Item = Race>,
{
    let mut race = races.into_iter().max_by_key(|r| r.id)?;
    if let Some(name) = driver_filter {
        race.retain_driver(name);
    }
    Some(race)
}
