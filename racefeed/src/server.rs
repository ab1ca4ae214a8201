//! HTTP endpoints for the feed.
//!
//! ```text
//! GET /api/races?driver=<name>           one-shot JSON array (0..1 race)
//! GET /api/races/realtime?driver=<name>  event stream, one frame per poll
//! GET /health                            liveness probe
//! ```
//!
//! Each stream request gets its own polling loop from the
//! [`SnapshotPublisher`]. When the client disconnects, the response body is
//! dropped, which drops the event receiver and stops that loop.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::publisher::{PublisherConfig, SnapshotPublisher, SnapshotQuery};
use crate::store::TelemetryStore;
use crate::transport::{encode_event, EVENT_STREAM_CONTENT_TYPE, NO_RACE_MESSAGE};

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listening socket.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The server loop failed.
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn TelemetryStore>,
    publisher: SnapshotPublisher,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        config: PublisherConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let publisher = SnapshotPublisher::new(Arc::clone(&store), config);
        Self {
            store,
            publisher,
            shutdown,
        }
    }
}

/// Query parameters accepted by both race endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct RaceParams {
    pub driver: Option<String>,
}

impl RaceParams {
    /// The driver filter, treating `?driver=` as absent.
    fn filter(&self) -> Option<&str> {
        self.driver.as_deref().filter(|d| !d.is_empty())
    }
}

/// Build the router with all feed endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/races", get(races))
        .route("/api/races/realtime", get(realtime))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

/// Bind `addr` for [`serve`].
pub async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Serve the feed until `state`'s shutdown token is cancelled.
///
/// Open streams end when the token fires because every polling loop watches
/// the same token.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ServerError> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    let shutdown = state.shutdown.clone();
    info!(addr = ?local, "Feed server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Feed server stopped");
    Ok(())
}

async fn races(State(state): State<AppState>, Query(params): Query<RaceParams>) -> Response {
    let filter = params.filter();
    match state.store.most_recent_race(filter).await {
        Ok(Some(race)) => {
            debug!(race_id = race.id, driver = ?filter, "Serving one-shot query");
            Json(vec![race]).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": NO_RACE_MESSAGE })),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, driver = ?filter, "One-shot race query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

async fn realtime(State(state): State<AppState>, Query(params): Query<RaceParams>) -> Response {
    let query = SnapshotQuery {
        driver: params.filter().map(str::to_string),
    };
    debug!(driver = ?query.driver, "Opening event stream");

    let events = state.publisher.subscribe(query, state.shutdown.child_token());

    let frames = futures::stream::unfold(events, |mut events| async move {
        loop {
            let Some(event) = events.recv().await else {
                return None;
            };
            match encode_event(&event) {
                Ok(frame) => return Some((Ok::<_, Infallible>(frame), events)),
                // Serializing our own model cannot realistically fail; skip the frame.
                Err(e) => error!(error = %e, "Failed to encode event"),
            }
        }
    });

    let mut response = Response::new(Body::from_stream(frames));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}
