//! Racefeed - live race telemetry streaming.
//!
//! A server polls a telemetry store for the most recent race and pushes each
//! snapshot to subscribers over an event stream. Clients decode the stream,
//! optionally narrowed to one driver, and merge partial snapshots into a
//! stable per-driver view.
//!
//! ```text
//! TelemetryStore ──poll──► SnapshotPublisher ──events──► server (axum)
//!                                                            │ data: [...]\n\n
//!                                                            ▼
//!                     Reconciler / DriverView ◄── subscribe ◄── FeedClient
//! ```

pub mod config;
pub mod consumer;
pub mod logging;
pub mod model;
pub mod publisher;
pub mod reconciler;
pub mod roster;
pub mod server;
pub mod store;
pub mod transport;

pub use consumer::{
    subscribe, subscribe_all, subscribe_driver, ConsumerError, EventSource, FeedClient,
    SnapshotUpdate, Subscription,
};
pub use model::{CornerSample, Driver, DriverSummary, Race, TirePosition, TireTelemetry};
pub use publisher::{OverlapPolicy, PublisherConfig, SnapshotPublisher, SnapshotQuery};
pub use reconciler::{DriverView, Reconciler};
pub use roster::Roster;
pub use store::{InMemoryStore, JsonFileStore, StoreError, TelemetryStore};
pub use transport::{StreamEvent, TransportError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
