//! Per-driver reconciliation of partial snapshots.
//!
//! Individual poll cycles may name only a fraction of the drivers in a race
//! (upstream batching, lost events, filters). The reconciler keeps a stable
//! name → [`DriverSummary`] map across those cycles:
//!
//! - Seeded from the roster with "unknown" placeholders.
//! - Each batch overwrites the entries it mentions (last write wins per name).
//! - Names absent from a batch keep their previous entry; nothing is ever
//!   removed or reset.
//! - An empty batch means "no information this cycle" and changes nothing.
//!
//! Display order is roster order, followed by names first seen in the feed in
//! the order they appeared.
//!
//! One reconciler serves exactly one subscription and is only mutated from
//! that subscription's callback, so it needs no internal locking.

use std::collections::HashMap;

use crate::model::{Driver, DriverSummary};
use crate::roster::Roster;

/// Merged view of every driver seen on one subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciler {
    entries: Vec<DriverSummary>,
    index: HashMap<String, usize>,
}

impl Reconciler {
    /// Create a reconciler with a placeholder for every roster name.
    pub fn new(roster: &Roster) -> Self {
        let mut reconciler = Self::default();
        for name in roster.names() {
            reconciler.upsert(DriverSummary::unknown(name.as_str()));
        }
        reconciler
    }

    /// Merge one batch of driver snapshots.
    ///
    /// Returns the number of entries written. An empty batch is a no-op.
    pub fn apply(&mut self, drivers: &[Driver]) -> usize {
        if drivers.is_empty() {
            return 0;
        }

        for driver in drivers {
            self.upsert(DriverSummary::from_driver(driver));
        }
        drivers.len()
    }

    fn upsert(&mut self, summary: DriverSummary) {
        match self.index.get(&summary.name) {
            Some(&slot) => self.entries[slot] = summary,
            None => {
                self.index.insert(summary.name.clone(), self.entries.len());
                self.entries.push(summary);
            }
        }
    }

    /// Summary for one driver.
    pub fn get(&self, name: &str) -> Option<&DriverSummary> {
        self.index.get(name).map(|&slot| &self.entries[slot])
    }

    /// All summaries in display order.
    pub fn summaries(&self) -> &[DriverSummary] {
        &self.entries
    }

    /// Number of drivers that have reported telemetry.
    pub fn reporting(&self) -> usize {
        self.entries.iter().filter(|s| s.has_data()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Latest full snapshot of a single driver.
///
/// The single-driver counterpart of [`Reconciler`]: each update replaces the
/// held driver, and nothing ever clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverView {
    name: String,
    driver: Option<Driver>,
}

impl DriverView {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: None,
        }
    }

    /// Replace the held snapshot.
    ///
    /// Returns `false` and ignores the update when it belongs to another
    /// driver.
    pub fn apply(&mut self, driver: Driver) -> bool {
        if driver.name != self.name {
            return false;
        }
        self.driver = Some(driver);
        true
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> Option<&Driver> {
        self.driver.as_ref()
    }

    /// Summary of the held snapshot, or a placeholder before any data.
    pub fn summary(&self) -> DriverSummary {
        match &self.driver {
            Some(driver) => DriverSummary::from_driver(driver),
            None => DriverSummary::unknown(self.name.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CornerSample, TireTelemetry};
    use proptest::prelude::*;

    fn sample(corner: u32) -> CornerSample {
        CornerSample::new(corner, 3.0, TireTelemetry::uniform(92.0, 20.0, 10_500.0))
    }

    fn driver(name: &str, lap: u32, corner: u32) -> Driver {
        Driver::new(name, "Team").with_sample(lap, sample(corner))
    }

    #[test]
    fn test_seeded_with_placeholders() {
        let reconciler = Reconciler::new(&Roster::new(["A", "B"]));
        assert_eq!(reconciler.len(), 2);
        assert_eq!(reconciler.get("A"), Some(&DriverSummary::unknown("A")));
        assert_eq!(reconciler.reporting(), 0);
    }

    #[test]
    fn test_partial_batches_merge() {
        let mut reconciler = Reconciler::new(&Roster::new(["A", "B", "C"]));

        reconciler.apply(&[driver("A", 1, 1)]);
        reconciler.apply(&[driver("B", 1, 2)]);

        let a = reconciler.get("A").unwrap();
        assert_eq!(a.last_corner.as_ref().unwrap().corner_index, 1);
        let b = reconciler.get("B").unwrap();
        assert_eq!(b.last_corner.as_ref().unwrap().corner_index, 2);
        assert_eq!(reconciler.get("C"), Some(&DriverSummary::unknown("C")));
        assert_eq!(reconciler.reporting(), 2);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let mut reconciler = Reconciler::new(&Roster::new(["A", "B"]));
        reconciler.apply(&[driver("A", 2, 7)]);
        let before = reconciler.clone();

        assert_eq!(reconciler.apply(&[]), 0);
        assert_eq!(reconciler, before);
    }

    #[test]
    fn test_numeric_lap_selection() {
        let d = Driver::new("A", "T")
            .with_sample(1, sample(1))
            .with_sample(2, sample(2))
            .with_sample(10, sample(3));

        let mut reconciler = Reconciler::default();
        reconciler.apply(&[d]);
        let summary = reconciler.get("A").unwrap();
        assert_eq!(summary.lap_label, "10");
        assert_eq!(summary.last_corner.as_ref().unwrap().corner_index, 3);
    }

    #[test]
    fn test_last_corner_is_sequence_last() {
        let d = Driver::new("A", "T")
            .with_sample(3, sample(5))
            .with_sample(3, sample(2));

        let mut reconciler = Reconciler::default();
        reconciler.apply(&[d]);
        assert_eq!(
            reconciler.get("A").unwrap().last_corner.as_ref().unwrap().corner_index,
            2
        );
    }

    #[test]
    fn test_unknown_names_appended_in_order() {
        let mut reconciler = Reconciler::new(&Roster::new(["A"]));
        reconciler.apply(&[driver("Z", 1, 1), driver("Y", 1, 1)]);

        let names: Vec<&str> = reconciler.summaries().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "Z", "Y"]);
    }

    #[test]
    fn test_later_batch_overwrites_entry() {
        let mut reconciler = Reconciler::default();
        reconciler.apply(&[driver("A", 1, 4)]);
        reconciler.apply(&[driver("A", 2, 1)]);

        let a = reconciler.get("A").unwrap();
        assert_eq!(a.lap_label, "2");
        assert_eq!(reconciler.len(), 1);
    }

    #[test]
    fn test_driver_view_replaces_and_ignores_others() {
        let mut view = DriverView::new("A");
        assert!(!view.summary().has_data());

        assert!(view.apply(driver("A", 1, 3)));
        assert!(!view.apply(driver("B", 1, 9)));
        assert_eq!(view.summary().last_corner.unwrap().corner_index, 3);

        assert!(view.apply(driver("A", 2, 1)));
        assert_eq!(view.driver().unwrap().laps.len(), 1);
        assert_eq!(view.summary().lap_label, "2");
    }

    proptest! {
        /// Names never disappear, and each name reflects the last batch that
        /// mentioned it.
        #[test]
        fn prop_merge_is_monotone_last_write_wins(
            batches in prop::collection::vec(
                prop::collection::vec((0usize..6, 1u32..5, 0u32..20), 0..6),
                0..12,
            )
        ) {
            let names = ["A", "B", "C", "D", "E", "F"];
            let mut reconciler = Reconciler::new(&Roster::new(["A", "B"]));
            let mut expected: HashMap<String, DriverSummary> = HashMap::new();
            let mut seen: Vec<String> = vec!["A".to_string(), "B".to_string()];

            for batch in batches {
                let drivers: Vec<Driver> = batch
                    .iter()
                    .map(|(n, lap, corner)| driver(names[*n], *lap, *corner))
                    .collect();
                reconciler.apply(&drivers);

                for d in &drivers {
                    expected.insert(d.name.clone(), DriverSummary::from_driver(d));
                    if !seen.contains(&d.name) {
                        seen.push(d.name.clone());
                    }
                }

                for name in &seen {
                    prop_assert!(reconciler.get(name).is_some());
                }
                for (name, summary) in &expected {
                    prop_assert_eq!(reconciler.get(name), Some(summary));
                }
                prop_assert_eq!(reconciler.len(), seen.len());
            }
        }
    }
}
