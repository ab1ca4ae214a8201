//! In-memory race store.

use parking_lot::RwLock;

use super::{select_most_recent, BoxFuture, StoreError, TelemetryStore};
use crate::model::Race;

/// Races held in memory behind a read-write lock.
///
/// Writers replace whole race documents; readers always get a full clone,
/// matching the "re-read in full on every poll" model of a real store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    races: RwLock<Vec<Race>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with races.
    pub fn with_races(races: Vec<Race>) -> Self {
        Self {
            races: RwLock::new(races),
        }
    }

    /// Insert a race, replacing any existing race with the same id.
    pub fn upsert_race(&self, race: Race) {
        let mut races = self.races.write();
        match races.iter_mut().find(|r| r.id == race.id) {
            Some(existing) => *existing = race,
            None => races.push(race),
        }
    }

    /// Remove every race.
    pub fn clear(&self) {
        self.races.write().clear();
    }

    pub fn len(&self) -> usize {
        self.races.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.races.read().is_empty()
    }
}

impl TelemetryStore for InMemoryStore {
    fn most_recent_race<'a>(
        &'a self,
        driver_filter: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<Race>, StoreError>> {
        let selected = {
            let races = self.races.read();
            races
                .iter()
                .max_by_key(|r| r.id)
                .cloned()
                .and_then(|race| select_most_recent(Some(race), driver_filter))
        };
        Box::pin(async move { Ok(selected) })
    }
}
