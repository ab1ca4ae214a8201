//! Snapshot consumer: turns the event stream back into driver updates.
//!
//! A subscription opens one transport connection, decodes each frame, applies
//! the optional driver filter and hands the result to a callback:
//!
//! | payload                     | filter   | callback                        |
//! |-----------------------------|----------|---------------------------------|
//! | undecodable                 | any      | none (logged, dropped)          |
//! | `{"error":true}`            | any      | none                            |
//! | `[]`                        | any      | none                            |
//! | `[race]`                    | `name`   | `Driver` when `name` is present |
//! | `[race]` with no drivers    | none     | none                            |
//! | `[race]`                    | none     | `Drivers(race.drivers)`         |
//!
//! Empty input never reaches the callback: it means "no information this
//! cycle", not "everything cleared".
//!
//! A transport error or end of stream closes the subscription. There is no
//! automatic reconnect; callers that want one subscribe again.
//!
//! # Example
//!
//! ```ignore
//! use racefeed::consumer::{subscribe_all, FeedClient};
//! use racefeed::reconciler::Reconciler;
//!
//! let client = Arc::new(FeedClient::new("http://localhost:3000/api")?);
//! let mut reconciler = Reconciler::new(&roster);
//! let subscription = subscribe_all(client, move |drivers| {
//!     reconciler.apply(&drivers);
//! });
//!
//! // Later, from any cleanup path:
//! subscription.unsubscribe();
//! ```

mod http;

pub use http::FeedClient;

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::ReentrantMutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::Driver;
use crate::transport::{FrameDecoder, StreamEvent, TransportError};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Raw byte chunks received from an open stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ConsumerError>> + Send>>;

/// Errors surfaced by the consumer side.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// HTTP request or body read failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The one-shot endpoint reported that no race exists.
    #[error("No race found")]
    NoRace,

    /// The most recent race has no entry for the requested driver.
    #[error("Driver '{0}' not found in the current race")]
    DriverNotFound(String),

    /// Malformed payload.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The configured endpoint URL is unusable.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// A push channel the consumer can open.
///
/// Implemented by [`FeedClient`] over HTTP; tests plug in in-process sources.
pub trait EventSource: Send + Sync + 'static {
    /// Open one connection, optionally asking the server to filter by driver.
    fn open<'a>(&'a self, driver_filter: Option<&'a str>)
        -> BoxFuture<'a, Result<ByteStream, ConsumerError>>;
}

/// What a decoded event delivers to the callback.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotUpdate {
    /// The filtered driver's full snapshot.
    Driver(Driver),
    /// Every driver of the current race (never empty).
    Drivers(Vec<Driver>),
}

/// Decode one frame body into the update it carries, if any.
///
/// Failures are logged here and yield `None`; they never propagate.
pub fn decode_update(body: &str, driver_filter: Option<&str>) -> Option<SnapshotUpdate> {
    let races = match StreamEvent::from_json(body) {
        Ok(StreamEvent::Races(races)) => races,
        Ok(StreamEvent::Error(_)) => {
            debug!("Publisher reported a failed store read");
            return None;
        }
        Err(e) => {
            warn!(error = %e, "Dropping undecodable event");
            return None;
        }
    };

    let race = races.into_iter().next()?;
    match driver_filter {
        Some(name) => race
            .drivers
            .into_iter()
            .find(|d| d.name == name)
            .map(SnapshotUpdate::Driver),
        None if race.drivers.is_empty() => None,
        None => Some(SnapshotUpdate::Drivers(race.drivers)),
    }
}

// =============================================================================
// Subscription
// =============================================================================

type Handler = Box<dyn FnMut(SnapshotUpdate) + Send>;

struct Shared {
    /// Set by `unsubscribe`.
    cancel: CancellationToken,
    /// Set when the listener task ends for any reason.
    closed: CancellationToken,
    /// Held for the whole duration of a callback. Reentrant so the callback
    /// may unsubscribe its own subscription.
    handler: ReentrantMutex<RefCell<Option<Handler>>>,
}

impl Shared {
    fn deliver(&self, update: SnapshotUpdate) {
        let guard = self.handler.lock();
        if self.cancel.is_cancelled() {
            return;
        }
        // Taken out so a reentrant unsubscribe finds the slot empty instead
        // of hitting an active RefCell borrow.
        let Some(mut handler) = guard.borrow_mut().take() else {
            return;
        };
        handler(update);
        if !self.cancel.is_cancelled() {
            *guard.borrow_mut() = Some(handler);
        }
    }

    fn stop(&self) {
        self.cancel.cancel();
        let guard = self.handler.lock();
        guard.borrow_mut().take();
    }
}

/// Handle to a running subscription.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    /// Stop the subscription.
    ///
    /// Idempotent and safe to call before any event arrived or before the
    /// connection opened. When it returns, no callback is running (unless
    /// called from inside the callback itself) and none will start.
    pub fn unsubscribe(&self) {
        if !self.shared.cancel.is_cancelled() {
            debug!("Unsubscribing");
        }
        self.shared.stop();
    }

    /// Whether the callback sequence has ended.
    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled() || self.shared.closed.is_cancelled()
    }

    /// Wait until the callback sequence ends (transport error, end of stream
    /// or unsubscribe).
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.shared.cancel.cancelled() => {}
            _ = self.shared.closed.cancelled() => {}
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

/// Subscribe with an optional driver filter.
///
/// Must be called from within a Tokio runtime; the listener runs as a spawned
/// task.
pub fn subscribe<S, F>(source: Arc<S>, driver_filter: Option<String>, on_event: F) -> Subscription
where
    S: EventSource + ?Sized,
    F: FnMut(SnapshotUpdate) + Send + 'static,
{
    let shared = Arc::new(Shared {
        cancel: CancellationToken::new(),
        closed: CancellationToken::new(),
        handler: ReentrantMutex::new(RefCell::new(Some(Box::new(on_event)))),
    });

    let task_shared = Arc::clone(&shared);
    tokio::spawn(async move {
        // Fires on every exit path, including a panicking callback.
        let _closed = task_shared.closed.clone().drop_guard();
        listen(source.as_ref(), driver_filter.as_deref(), &task_shared).await;
    });

    Subscription { shared }
}

/// Subscribe to a single driver; `on_driver` gets that driver's snapshots.
pub fn subscribe_driver<S, F>(source: Arc<S>, name: impl Into<String>, mut on_driver: F) -> Subscription
where
    S: EventSource + ?Sized,
    F: FnMut(Driver) + Send + 'static,
{
    subscribe(source, Some(name.into()), move |update| {
        if let SnapshotUpdate::Driver(driver) = update {
            on_driver(driver);
        }
    })
}

/// Subscribe to the whole race; `on_drivers` gets every non-empty batch.
pub fn subscribe_all<S, F>(source: Arc<S>, mut on_drivers: F) -> Subscription
where
    S: EventSource + ?Sized,
    F: FnMut(Vec<Driver>) + Send + 'static,
{
    subscribe(source, None, move |update| {
        if let SnapshotUpdate::Drivers(drivers) = update {
            on_drivers(drivers);
        }
    })
}

async fn listen<S>(source: &S, driver_filter: Option<&str>, shared: &Shared)
where
    S: EventSource + ?Sized,
{
    let opened = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => return,
        opened = source.open(driver_filter) => opened,
    };

    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, driver = ?driver_filter, "Failed to open event stream");
            return;
        }
    };
    debug!(driver = ?driver_filter, "Event stream opened");

    let mut decoder = FrameDecoder::new();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                decoder.feed(&bytes);
                while let Some(frame) = decoder.next_frame() {
                    match frame {
                        Ok(body) => {
                            if let Some(update) = decode_update(&body, driver_filter) {
                                shared.deliver(update);
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping malformed frame"),
                    }
                    if shared.cancel.is_cancelled() {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Event stream failed, closing");
                break;
            }
            None => {
                debug!("Event stream ended");
                break;
            }
        }
    }
    // Dropping `stream` releases the connection.
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Race;
    use crate::transport::encode_event;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// In-process source fed through a channel; opens at most once.
    pub(crate) struct ChannelSource {
        rx: Mutex<Option<mpsc::UnboundedReceiver<Result<Bytes, ConsumerError>>>>,
        pub(crate) opened_with: Mutex<Option<Option<String>>>,
    }

    impl ChannelSource {
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedSender<Result<Bytes, ConsumerError>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let source = Arc::new(Self {
                rx: Mutex::new(Some(rx)),
                opened_with: Mutex::new(None),
            });
            (source, tx)
        }
    }

    impl EventSource for ChannelSource {
        fn open<'a>(
            &'a self,
            driver_filter: Option<&'a str>,
        ) -> BoxFuture<'a, Result<ByteStream, ConsumerError>> {
            *self.opened_with.lock() = Some(driver_filter.map(str::to_string));
            let rx = self.rx.lock().take();
            Box::pin(async move {
                let rx = rx.ok_or_else(|| ConsumerError::InvalidUrl("already opened".into()))?;
                let stream = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                Ok(Box::pin(stream) as ByteStream)
            })
        }
    }

    /// Source whose open never completes.
    struct PendingSource;

    impl EventSource for PendingSource {
        fn open<'a>(
            &'a self,
            _driver_filter: Option<&'a str>,
        ) -> BoxFuture<'a, Result<ByteStream, ConsumerError>> {
            Box::pin(futures::future::pending())
        }
    }

    fn grid() -> Race {
        let mut race = Race::new(5, 0.0);
        for i in 0..20 {
            race.drivers.push(Driver::new(format!("Driver {}", i), "Team"));
        }
        race.drivers.push(Driver::new("Oscar Piastri", "McLaren"));
        race
    }

    fn frame_of(race: Option<Race>) -> Bytes {
        encode_event(&StreamEvent::from_race(race)).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_decode_filtered_driver() {
        let body = StreamEvent::from_race(Some(grid())).to_json().unwrap();
        match decode_update(&body, Some("Oscar Piastri")) {
            Some(SnapshotUpdate::Driver(d)) => assert_eq!(d.name, "Oscar Piastri"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(decode_update(&body, Some("Nobody")).is_none());
    }

    #[test]
    fn test_decode_all_drivers() {
        let body = StreamEvent::from_race(Some(grid())).to_json().unwrap();
        match decode_update(&body, None) {
            Some(SnapshotUpdate::Drivers(drivers)) => assert_eq!(drivers.len(), 21),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_no_update_cases() {
        assert!(decode_update("[]", None).is_none());
        assert!(decode_update(r#"{"error":true}"#, None).is_none());
        assert!(decode_update("{garbage", None).is_none());

        let empty = StreamEvent::from_race(Some(Race::new(1, 0.0))).to_json().unwrap();
        assert!(decode_update(&empty, None).is_none());
    }

    #[test]
    fn test_decode_survives_foreign_tire_labels() {
        let body = r#"[{"id": 3, "startedAt": 0, "drivers": [
            {"name": "A", "laps": {"1": [{"cornerIndex": 1, "lapTimeSeconds": 2.0,
                "tire": {"temperatureCelsius": {"front-left": 90}, "rpm": 9000}}]}},
            {"name": "B", "laps": {"1": [{"cornerIndex": 1, "lapTimeSeconds": 2.0,
                "tire": {"temperatureCelsius": {"Dianteira direita": 90}, "rpm": 9000}}]}},
            {"name": "C", "laps": {"1": [{"cornerIndex": 1, "lapTimeSeconds": 2.0, "tire": {}}]}}
        ]}]"#;

        match decode_update(body, None) {
            Some(SnapshotUpdate::Drivers(drivers)) => assert_eq!(drivers.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            decode_update(body, Some("A")),
            Some(SnapshotUpdate::Driver(d)) if d.name == "A"
        ));
    }

    #[tokio::test]
    async fn test_panicking_callback_closes_subscription() {
        let (source, tx) = ChannelSource::new();
        let sub = subscribe_all(source, |_| panic!("callback failure"));

        tx.send(Ok(frame_of(Some(grid())))).unwrap();

        tokio::time::timeout(Duration::from_secs(1), sub.closed())
            .await
            .unwrap();
        assert!(sub.is_closed());
        sub.unsubscribe();
    }

    #[tokio::test]
    async fn test_filter_isolation() {
        let (source, tx) = ChannelSource::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let _sub = subscribe_driver(source.clone(), "Oscar Piastri", move |driver| {
            sink.lock().push(driver.name);
        });

        for _ in 0..3 {
            tx.send(Ok(frame_of(Some(grid())))).unwrap();
        }
        settle().await;

        assert_eq!(
            *source.opened_with.lock(),
            Some(Some("Oscar Piastri".to_string()))
        );
        let names = received.lock().clone();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n == "Oscar Piastri"));
    }

    #[tokio::test]
    async fn test_bad_frames_do_not_end_subscription() {
        let (source, tx) = ChannelSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let sub = subscribe_all(source, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(Ok(Bytes::from_static(b"data: {not json\n\n"))).unwrap();
        tx.send(Ok(Bytes::from_static(b"data: {\"error\":true}\n\n"))).unwrap();
        tx.send(Ok(frame_of(None))).unwrap();
        tx.send(Ok(frame_of(Some(grid())))).unwrap();
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!sub.is_closed());
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let (source, tx) = ChannelSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let _sub = subscribe_all(source, move |drivers| {
            assert_eq!(drivers.len(), 21);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let bytes = frame_of(Some(grid()));
        for chunk in bytes.chunks(13) {
            tx.send(Ok(Bytes::copy_from_slice(chunk))).unwrap();
        }
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transport_error_closes_subscription() {
        let (source, tx) = ChannelSource::new();
        let sub = subscribe_all(source, |_| {});

        tx.send(Err(ConsumerError::Status {
            status: 502,
            url: "http://test".into(),
        }))
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), sub.closed())
            .await
            .unwrap();
        assert!(sub.is_closed());
        // The sender side sees the connection released.
        settle().await;
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_end_of_stream_closes_subscription() {
        let (source, tx) = ChannelSource::new();
        let sub = subscribe_all(source, |_| {});
        drop(tx);

        tokio::time::timeout(Duration::from_secs(1), sub.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_stops_callbacks() {
        let (source, tx) = ChannelSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sub = subscribe_all(source, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tx.send(Ok(frame_of(Some(grid())))).unwrap();
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(sub.is_closed());

        let _ = tx.send(Ok(frame_of(Some(grid()))));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_before_connection_opens() {
        let sub = subscribe_all(Arc::new(PendingSource), |_| panic!("no events expected"));
        sub.unsubscribe();
        sub.unsubscribe();
        tokio::time::timeout(Duration::from_secs(1), sub.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_from_inside_callback() {
        let (source, tx) = ChannelSource::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let slot_in = Arc::clone(&slot);
        let counter = Arc::clone(&count);
        let sub = subscribe_all(source, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot_in.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        tx.send(Ok(frame_of(Some(grid())))).unwrap();
        tx.send(Ok(frame_of(Some(grid())))).unwrap();
        settle().await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(slot.lock().as_ref().unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (source, tx) = ChannelSource::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let sub = subscribe_all(source, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);

        let _ = tx.send(Ok(frame_of(Some(grid()))));
        settle().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
