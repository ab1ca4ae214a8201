//! Snapshot publisher: turns a periodically re-read store query into a push feed.
//!
//! Each subscriber gets its own polling task. Tasks share nothing but the
//! read-only store, and each performs its own read on every tick.
//!
//! # Cycle
//!
//! ```text
//!            ┌──────────── every poll_interval ────────────┐
//!            ▼                                             │
//!   ┌─────────────────┐   Ok(race)   ┌────────────────┐    │
//!   │ store read      │─────────────►│ [race] / []    │────┤
//!   │ (read_timeout)  │              └────────────────┘    │
//!   └────────┬────────┘                                    │
//!            │ Err / timeout         ┌────────────────┐    │
//!            └──────────────────────►│ {"error":true} │────┘
//!                                    └────────────────┘
//! ```
//!
//! Exactly one event is pushed per cycle, even when it is identical to the
//! previous one. No buffering, coalescing or dedup happens here; a stale read
//! is transmitted as-is.
//!
//! The task ends when the subscriber goes away (its receiver is dropped) or
//! when the shutdown token is cancelled. No store read is issued after that.
//!
//! # Example
//!
//! ```ignore
//! use racefeed::publisher::{PublisherConfig, SnapshotPublisher, SnapshotQuery};
//!
//! let publisher = SnapshotPublisher::new(store, PublisherConfig::default());
//! let mut events = publisher.subscribe(SnapshotQuery::driver("Oscar Piastri"), shutdown);
//! while let Some(event) = events.recv().await {
//!     // frame and push to the client
//! }
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::model::Race;
use crate::store::{StoreError, TelemetryStore};
use crate::transport::StreamEvent;

// =============================================================================
// Configuration
// =============================================================================

/// Default interval between store reads for one subscriber.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default limit on a single store read before it counts as failed.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Default number of events buffered between the poll task and the transport.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Shortest accepted poll interval; shorter values are raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Largest accepted per-subscriber buffer; larger values are lowered to this.
pub const MAX_CHANNEL_CAPACITY: usize = 65_536;

/// What to do when a tick fires while the previous read is still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Wait for the in-flight read; ticks missed meanwhile are skipped.
    #[default]
    SkipIfBusy,
    /// Start a new read on every tick; events go out in completion order.
    AllowOverlap,
}

impl OverlapPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapPolicy::SkipIfBusy => "skip",
            OverlapPolicy::AllowOverlap => "allow",
        }
    }
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" | "skip-if-busy" => Ok(OverlapPolicy::SkipIfBusy),
            "allow" | "allow-overlap" => Ok(OverlapPolicy::AllowOverlap),
            other => Err(format!(
                "invalid overlap policy '{}', expected 'skip' or 'allow'",
                other
            )),
        }
    }
}

/// Configuration for the per-subscriber polling loop.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Fixed cadence of store reads.
    pub poll_interval: Duration,

    /// A read taking longer than this is reported as an error for its cycle.
    pub read_timeout: Duration,

    /// Behaviour when reads are slower than the poll interval.
    pub overlap: OverlapPolicy,

    /// Events buffered per subscriber before the loop waits on the consumer.
    pub channel_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            overlap: OverlapPolicy::default(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl PublisherConfig {
    /// Set the read cadence, raised to at least [`MIN_POLL_INTERVAL`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_overlap(mut self, overlap: OverlapPolicy) -> Self {
        self.overlap = overlap;
        self
    }

    /// Set the buffer size, kept within `1..=MAX_CHANNEL_CAPACITY`.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.clamp(1, MAX_CHANNEL_CAPACITY);
        self
    }
}

/// What a subscriber asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotQuery {
    /// Restrict the race's drivers to this exact name.
    pub driver: Option<String>,
}

impl SnapshotQuery {
    /// Query for the whole race.
    pub fn all() -> Self {
        Self::default()
    }

    /// Query restricted to one driver.
    pub fn driver(name: impl Into<String>) -> Self {
        Self {
            driver: Some(name.into()),
        }
    }
}

// =============================================================================
// Publisher
// =============================================================================

/// Spawns one independent polling loop per subscriber.
#[derive(Clone)]
pub struct SnapshotPublisher {
    store: Arc<dyn TelemetryStore>,
    config: PublisherConfig,
}

impl SnapshotPublisher {
    pub fn new(store: Arc<dyn TelemetryStore>, config: PublisherConfig) -> Self {
        Self { store, config }
    }

    /// Start a polling loop for one subscriber.
    ///
    /// The first read happens immediately, then once per `poll_interval`.
    /// Dropping the returned receiver stops the loop.
    pub fn subscribe(
        &self,
        query: SnapshotQuery,
        shutdown: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.clamp(1, MAX_CHANNEL_CAPACITY));
        let store = Arc::clone(&self.store);
        let config = self.config.clone();

        tokio::spawn(async move {
            debug!(driver = ?query.driver, overlap = %config.overlap, "Subscriber polling started");
            match config.overlap {
                OverlapPolicy::SkipIfBusy => run_sequential(store, config, query, tx, shutdown).await,
                OverlapPolicy::AllowOverlap => {
                    run_overlapping(store, config, query, tx, shutdown).await
                }
            }
        });

        rx
    }
}

async fn read_cycle(
    store: &dyn TelemetryStore,
    driver: Option<&str>,
    read_timeout: Duration,
) -> Result<Option<Race>, StoreError> {
    match tokio::time::timeout(read_timeout, store.most_recent_race(driver)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(read_timeout)),
    }
}

fn ticker(poll_interval: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn run_sequential(
    store: Arc<dyn TelemetryStore>,
    config: PublisherConfig,
    query: SnapshotQuery,
    tx: mpsc::Sender<StreamEvent>,
    shutdown: CancellationToken,
) {
    let mut ticker = ticker(config.poll_interval);
    let mut health = ReadHealth::default();
    let mut cycle: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tx.closed() => break,
            _ = ticker.tick() => {}
        }

        cycle += 1;
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tx.closed() => break,
            result = read_cycle(store.as_ref(), query.driver.as_deref(), config.read_timeout) => result,
        };

        let event = health.record(cycle, result);
        if tx.send(event).await.is_err() {
            break;
        }
    }

    debug!(driver = ?query.driver, cycles = cycle, "Subscriber polling stopped");
}

async fn run_overlapping(
    store: Arc<dyn TelemetryStore>,
    config: PublisherConfig,
    query: SnapshotQuery,
    tx: mpsc::Sender<StreamEvent>,
    shutdown: CancellationToken,
) {
    let mut ticker = ticker(config.poll_interval);
    let mut health = ReadHealth::default();
    let mut in_flight = FuturesUnordered::new();
    let mut cycle: u64 = 0;
    let driver = query.driver.as_deref();
    let read_timeout = config.read_timeout;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tx.closed() => break,
            Some((n, result)) = in_flight.next(), if !in_flight.is_empty() => {
                let event = health.record(n, result);
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                cycle += 1;
                let n = cycle;
                let store = store.as_ref();
                in_flight.push(async move {
                    (n, read_cycle(store, driver, read_timeout).await)
                });
                if in_flight.len() > 1 {
                    trace!(in_flight = in_flight.len(), "Overlapping store reads");
                }
            }
        }
    }

    // Dropping `in_flight` cancels any read still pending.
    debug!(driver = ?query.driver, cycles = cycle, "Subscriber polling stopped");
}

/// Tracks consecutive read failures so a persistent outage logs once.
#[derive(Debug, Default)]
struct ReadHealth {
    consecutive_failures: u64,
}

impl ReadHealth {
    fn record(&mut self, cycle: u64, result: Result<Option<Race>, StoreError>) -> StreamEvent {
        match result {
            Ok(race) => {
                if self.consecutive_failures > 0 {
                    info!(
                        cycle,
                        failed_cycles = self.consecutive_failures,
                        "Store reads recovered"
                    );
                    self.consecutive_failures = 0;
                }
                if let Some(race) = &race {
                    trace!(cycle, race_id = race.id, drivers = race.drivers.len(), "Publishing race");
                }
                StreamEvent::from_race(race)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures == 1 {
                    warn!(cycle, error = %e, "Store read failed, sending error sentinel");
                } else {
                    debug!(
                        cycle,
                        error = %e,
                        consecutive = self.consecutive_failures,
                        "Store read failed again"
                    );
                }
                StreamEvent::error()
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
