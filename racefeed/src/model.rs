//! Race telemetry data model.
//!
//! These types are read-only projections of the documents held by the
//! telemetry store. They are rebuilt in full on every poll and never mutated
//! in place by the streaming subsystem.
//!
//! # Document Shape
//!
//! ```text
//! Race
//! ├── id, startedAt
//! └── drivers[]
//!     └── Driver
//!         ├── name, team
//!         └── laps { "1": [CornerSample, ...], "2": [...], ... }
//!                         └── tire: TireTelemetry
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// One timed session, identified by a strictly increasing integer id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Race {
    /// Externally assigned, monotonically increasing race id.
    pub id: u64,

    /// Race start as fractional seconds since the Unix epoch.
    pub started_at: f64,

    /// Participants in the order the store returned them.
    ///
    /// A malformed driver entry is logged and left out; it never hides the
    /// rest of the race.
    #[serde(default, deserialize_with = "drivers_skipping_malformed")]
    pub drivers: Vec<Driver>,
}

impl Race {
    /// Create a race with no drivers.
    pub fn new(id: u64, started_at: f64) -> Self {
        Self {
            id,
            started_at,
            drivers: Vec::new(),
        }
    }

    /// Add a driver, builder style.
    pub fn with_driver(mut self, driver: Driver) -> Self {
        self.drivers.push(driver);
        self
    }

    /// Find a driver by exact name.
    pub fn driver(&self, name: &str) -> Option<&Driver> {
        self.drivers.iter().find(|d| d.name == name)
    }

    /// Keep only the drivers whose name equals `name`.
    ///
    /// All other race fields pass through unchanged.
    pub fn retain_driver(&mut self, name: &str) {
        self.drivers.retain(|d| d.name == name);
    }

    /// Start time converted to a UTC timestamp, if representable.
    pub fn started_at_utc(&self) -> Option<DateTime<Utc>> {
        if !self.started_at.is_finite() {
            return None;
        }
        let secs = self.started_at.floor();
        let nanos = ((self.started_at - secs) * 1_000_000_000.0) as u32;
        DateTime::from_timestamp(secs as i64, nanos)
    }
}

/// One participant, identified by name within a race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    /// Driver name; the merge key across snapshots.
    pub name: String,

    #[serde(default)]
    pub team: String,

    /// Corner samples grouped by string-encoded lap number.
    ///
    /// Key order carries no meaning; use [`Driver::latest_lap`] for the
    /// numerically greatest lap.
    #[serde(default)]
    pub laps: BTreeMap<String, Vec<CornerSample>>,
}

impl Driver {
    /// Create a driver with no laps.
    pub fn new(name: impl Into<String>, team: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: team.into(),
            laps: BTreeMap::new(),
        }
    }

    /// Append a sample to the given lap, builder style.
    pub fn with_sample(mut self, lap: u32, sample: CornerSample) -> Self {
        self.laps.entry(lap.to_string()).or_default().push(sample);
        self
    }

    /// The lap key with the numerically greatest value.
    ///
    /// Keys that are not unsigned integers are skipped, so `"10"` beats `"9"`
    /// and a stray `"warmup"` key never wins.
    pub fn latest_lap(&self) -> Option<(&str, &[CornerSample])> {
        self.laps
            .iter()
            .filter_map(|(key, samples)| {
                key.trim()
                    .parse::<u64>()
                    .ok()
                    .map(|n| (n, key.as_str(), samples.as_slice()))
            })
            .max_by_key(|(n, _, _)| *n)
            .map(|(_, key, samples)| (key, samples))
    }

    /// Total number of corner samples across all laps.
    pub fn sample_count(&self) -> usize {
        self.laps.values().map(Vec::len).sum()
    }
}

/// One measurement point at a track location within a lap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CornerSample {
    pub corner_index: u32,
    pub lap_time_seconds: f64,
    #[serde(default)]
    pub tire: TireTelemetry,
}

impl CornerSample {
    pub fn new(corner_index: u32, lap_time_seconds: f64, tire: TireTelemetry) -> Self {
        Self {
            corner_index,
            lap_time_seconds,
            tire,
        }
    }
}

/// Wheel position label used as the key of per-tire readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TirePosition {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl TirePosition {
    /// All four positions in display order.
    pub const ALL: [TirePosition; 4] = [
        TirePosition::FrontLeft,
        TirePosition::FrontRight,
        TirePosition::RearLeft,
        TirePosition::RearRight,
    ];

    /// Two-letter abbreviation used in compact output.
    pub fn short_label(&self) -> &'static str {
        match self {
            TirePosition::FrontLeft => "FL",
            TirePosition::FrontRight => "FR",
            TirePosition::RearLeft => "RL",
            TirePosition::RearRight => "RR",
        }
    }
}

impl TirePosition {
    /// Wire label, e.g. `front-left`.
    pub fn label(&self) -> &'static str {
        match self {
            TirePosition::FrontLeft => "front-left",
            TirePosition::FrontRight => "front-right",
            TirePosition::RearLeft => "rear-left",
            TirePosition::RearRight => "rear-right",
        }
    }

    /// Position for a wire label; `None` for labels this model does not know.
    pub fn from_label(label: &str) -> Option<Self> {
        TirePosition::ALL.into_iter().find(|p| p.label() == label)
    }
}

impl fmt::Display for TirePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tire temperatures, pressures and engine speed at one corner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TireTelemetry {
    /// Readings under unknown labels or with non-numeric values are dropped.
    #[serde(default, deserialize_with = "known_positions")]
    pub temperature_celsius: BTreeMap<TirePosition, f64>,
    #[serde(default, deserialize_with = "known_positions")]
    pub pressure_psi: BTreeMap<TirePosition, f64>,
    #[serde(default)]
    pub rpm: f64,
}

impl TireTelemetry {
    /// Build a reading with the same temperature and pressure on all four tires.
    pub fn uniform(temperature_celsius: f64, pressure_psi: f64, rpm: f64) -> Self {
        Self {
            temperature_celsius: TirePosition::ALL
                .iter()
                .map(|p| (*p, temperature_celsius))
                .collect(),
            pressure_psi: TirePosition::ALL.iter().map(|p| (*p, pressure_psi)).collect(),
            rpm,
        }
    }

    pub fn temperature(&self, position: TirePosition) -> Option<f64> {
        self.temperature_celsius.get(&position).copied()
    }

    pub fn pressure(&self, position: TirePosition) -> Option<f64> {
        self.pressure_psi.get(&position).copied()
    }
}

fn drivers_skipping_malformed<'de, D>(deserializer: D) -> Result<Vec<Driver>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    let drivers = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<Driver>(entry) {
            Ok(driver) => Some(driver),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed driver entry");
                None
            }
        })
        .collect();
    Ok(drivers)
}

fn known_positions<'de, D>(deserializer: D) -> Result<BTreeMap<TirePosition, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|(label, value)| Some((TirePosition::from_label(&label)?, value.as_f64()?)))
        .collect())
}

/// Reduced per-driver projection used when many drivers are shown at once.
///
/// Derived on the consumer side only; never sent over the wire by the
/// publisher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverSummary {
    pub name: String,
    pub team: String,
    /// Most recently appended sample of the most recent lap.
    pub last_corner: Option<CornerSample>,
    /// Key of the most recent lap, or empty when no lap is known.
    pub lap_label: String,
}

impl DriverSummary {
    /// Placeholder for a driver that has not reported any data yet.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            team: String::new(),
            last_corner: None,
            lap_label: String::new(),
        }
    }

    /// Project a full driver snapshot down to its latest position.
    ///
    /// The last corner is the last element of the lap's sample sequence, not
    /// the sample with the highest corner index.
    pub fn from_driver(driver: &Driver) -> Self {
        let (lap_label, last_corner) = match driver.latest_lap() {
            Some((key, samples)) => (key.to_string(), samples.last().cloned()),
            None => (String::new(), None),
        };

        Self {
            name: driver.name.clone(),
            team: driver.team.clone(),
            last_corner,
            lap_label,
        }
    }

    /// Whether any telemetry has been seen for this driver.
    pub fn has_data(&self) -> bool {
        self.last_corner.is_some()
    }
}
