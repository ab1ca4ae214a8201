//! End-to-end tests over a loopback HTTP server.
//!
//! These tests run the real stack:
//! - store → publisher → axum event stream
//! - FeedClient → frame decoder → subscription callback → reconciler
//!
//! Run with: `cargo test --test stream_integration`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use racefeed::server::{self, AppState};
use racefeed::store::BoxFuture;
use racefeed::{
    subscribe_all, subscribe_driver, ConsumerError, CornerSample, Driver, DriverSummary,
    FeedClient, InMemoryStore, PublisherConfig, Race, Reconciler, Roster, StoreError,
    TelemetryStore, TireTelemetry,
};

// ============================================================================
// Helper Functions
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn sample(corner: u32) -> CornerSample {
    CornerSample::new(corner, 2.5, TireTelemetry::uniform(95.0, 21.5, 11_000.0))
}

fn driver(name: &str, lap: u32, corner: u32) -> Driver {
    Driver::new(name, "Team").with_sample(lap, sample(corner))
}

/// Store wrapper that counts reads and can be switched into failure.
struct ObservedStore {
    inner: InMemoryStore,
    failing: AtomicBool,
    reads: AtomicUsize,
}

impl ObservedStore {
    fn new(races: Vec<Race>) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::with_races(races),
            failing: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        })
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl TelemetryStore for ObservedStore {
    fn most_recent_race<'a>(
        &'a self,
        driver_filter: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Option<Race>, StoreError>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("test outage".to_string()));
            }
            self.inner.most_recent_race(driver_filter).await
        })
    }
}

/// Start a server with a fast poll interval and return a client for it.
async fn start(store: Arc<dyn TelemetryStore>) -> (Arc<FeedClient>, CancellationToken) {
    let shutdown = CancellationToken::new();
    let config = PublisherConfig::default().with_poll_interval(Duration::from_millis(20));
    let state = AppState::new(store, config, shutdown.clone());

    let listener = server::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, state));

    let client = FeedClient::new(format!("http://{}/api", addr)).unwrap();
    (Arc::new(client), shutdown)
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("subscription closed")
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Partial batches from successive races merge into one stable view.
#[tokio::test]
async fn test_all_drivers_view_merges_partial_batches() {
    let store = Arc::new(InMemoryStore::with_races(vec![
        Race::new(1, 0.0).with_driver(driver("A", 1, 1))
    ]));
    let (client, shutdown) = start(store.clone()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = subscribe_all(client, move |drivers| {
        let _ = tx.send(drivers);
    });

    let mut reconciler = Reconciler::new(&Roster::new(["A", "B", "C"]));
    reconciler.apply(&recv(&mut rx).await);

    store.upsert_race(Race::new(1, 0.0).with_driver(driver("B", 1, 2)));
    loop {
        let batch = recv(&mut rx).await;
        reconciler.apply(&batch);
        if batch.iter().any(|d| d.name == "B") {
            break;
        }
    }

    let a = reconciler.get("A").unwrap();
    assert_eq!(a.last_corner.as_ref().unwrap().corner_index, 1);
    let b = reconciler.get("B").unwrap();
    assert_eq!(b.last_corner.as_ref().unwrap().corner_index, 2);
    assert_eq!(reconciler.get("C"), Some(&DriverSummary::unknown("C")));

    subscription.unsubscribe();
    shutdown.cancel();
}

/// A driver subscription only ever sees its own driver.
#[tokio::test]
async fn test_driver_subscription_is_filtered() {
    let store = Arc::new(InMemoryStore::with_races(vec![Race::new(7, 0.0)
        .with_driver(driver("A", 3, 4))
        .with_driver(driver("B", 2, 9))]));
    let (client, shutdown) = start(store).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = subscribe_driver(client, "B", move |d| {
        let _ = tx.send(d);
    });

    for _ in 0..3 {
        let d = recv(&mut rx).await;
        assert_eq!(d.name, "B");
        assert_eq!(d.latest_lap().unwrap().0, "2");
    }

    shutdown.cancel();
}

/// The one-shot endpoint seeds a view before streaming starts.
#[tokio::test]
async fn test_fetch_races_and_driver() {
    let store = Arc::new(InMemoryStore::with_races(vec![
        Race::new(1, 0.0).with_driver(driver("A", 1, 1)),
        Race::new(2, 0.0)
            .with_driver(driver("A", 4, 6))
            .with_driver(driver("Oscar Piastri", 4, 2)),
    ]));
    let (client, shutdown) = start(store).await;

    let races = client.fetch_races(None).await.unwrap();
    assert_eq!(races.len(), 1);
    assert_eq!(races[0].id, 2);
    assert_eq!(races[0].drivers.len(), 2);

    let oscar = client.fetch_driver("Oscar Piastri").await.unwrap();
    assert_eq!(oscar.latest_lap().unwrap().0, "4");

    let missing = client.fetch_driver("Nobody").await.unwrap_err();
    assert!(matches!(missing, ConsumerError::DriverNotFound(_)));

    shutdown.cancel();
}

#[tokio::test]
async fn test_fetch_from_empty_store_is_no_race() {
    let (client, shutdown) = start(Arc::new(InMemoryStore::new())).await;
    let err = client.fetch_races(None).await.unwrap_err();
    assert!(matches!(err, ConsumerError::NoRace));
    shutdown.cancel();
}

/// A 404 from an unknown route is a status error, not "no race".
#[tokio::test]
async fn test_wrong_api_root_is_status_error() {
    let (client, shutdown) = start(Arc::new(InMemoryStore::new())).await;
    let wrong = FeedClient::new(client.base_url().replace("/api", "/nope")).unwrap();

    let err = wrong.fetch_races(None).await.unwrap_err();
    assert!(matches!(err, ConsumerError::Status { status: 404, .. }));
    shutdown.cancel();
}

/// Store failures reach the client as sentinels, which are skipped; the
/// subscription survives and resumes when the store recovers.
#[tokio::test]
async fn test_store_outage_is_skipped_and_recovers() {
    let store = ObservedStore::new(vec![Race::new(1, 0.0).with_driver(driver("A", 1, 1))]);
    store.failing.store(true, Ordering::SeqCst);
    let (client, shutdown) = start(store.clone()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = subscribe_all(client, move |drivers| {
        let _ = tx.send(drivers);
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
    assert!(!subscription.is_closed());
    assert!(store.reads() > 1);

    store.failing.store(false, Ordering::SeqCst);
    let drivers = recv(&mut rx).await;
    assert_eq!(drivers[0].name, "A");

    shutdown.cancel();
}

/// An empty store streams empty batches, which never reach the callback.
#[tokio::test]
async fn test_empty_store_delivers_nothing() {
    let store = ObservedStore::new(Vec::new());
    let (client, shutdown) = start(store.clone()).await;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<Driver>>();
    let _subscription = subscribe_all(client, move |drivers| {
        let _ = tx.send(drivers);
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.reads() > 1);
    assert!(rx.try_recv().is_err());

    shutdown.cancel();
}

/// Unsubscribing closes the connection, which ends the server's poll loop.
#[tokio::test]
async fn test_unsubscribe_stops_server_polling() {
    let store = ObservedStore::new(vec![Race::new(1, 0.0).with_driver(driver("A", 1, 1))]);
    let (client, shutdown) = start(store.clone()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = subscribe_all(client, move |drivers| {
        let _ = tx.send(drivers);
    });
    recv(&mut rx).await;

    subscription.unsubscribe();
    assert!(subscription.is_closed());

    // Give the server time to notice the closed socket.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let settled = store.reads();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(store.reads(), settled);

    shutdown.cancel();
}

/// Server shutdown ends open streams, which closes the subscription.
#[tokio::test]
async fn test_server_shutdown_closes_subscription() {
    let store = Arc::new(InMemoryStore::with_races(vec![
        Race::new(1, 0.0).with_driver(driver("A", 1, 1))
    ]));
    let (client, shutdown) = start(store).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = subscribe_all(client, move |drivers| {
        let _ = tx.send(drivers);
    });
    recv(&mut rx).await;

    shutdown.cancel();
    tokio::time::timeout(RECV_TIMEOUT, subscription.closed())
        .await
        .expect("subscription did not close");
}
