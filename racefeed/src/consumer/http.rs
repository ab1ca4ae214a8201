//! HTTP client for the feed endpoints.

use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use super::{BoxFuture, ByteStream, ConsumerError, EventSource};
use crate::model::{Driver, Race};
use crate::transport::{EVENT_STREAM_CONTENT_TYPE, NO_RACE_MESSAGE};

/// Default timeout for establishing a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a one-shot request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for a feed server's `/races` and `/races/realtime` endpoints.
///
/// `base_url` is the API root, e.g. `http://localhost:3000/api`.
#[derive(Debug, Clone)]
pub struct FeedClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl FeedClient {
    /// Create a client with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ConsumerError> {
        Self::with_timeouts(base_url, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with custom timeouts.
    ///
    /// The request timeout applies to one-shot queries only; a stream stays
    /// open for as long as the server keeps it open.
    pub fn with_timeouts(
        base_url: impl Into<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ConsumerError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConsumerError::InvalidUrl(base_url));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn races_url(&self) -> String {
        format!("{}/races", self.base_url)
    }

    fn realtime_url(&self) -> String {
        format!("{}/races/realtime", self.base_url)
    }

    fn request(&self, url: &str, driver_filter: Option<&str>) -> reqwest::RequestBuilder {
        let builder = self.client.get(url);
        match driver_filter {
            Some(name) => builder.query(&[("driver", name)]),
            None => builder,
        }
    }

    /// One-shot query: the most recent race, driver-filtered if requested.
    ///
    /// Returns [`ConsumerError::NoRace`] when the server has no race.
    pub async fn fetch_races(&self, driver_filter: Option<&str>) -> Result<Vec<Race>, ConsumerError> {
        let url = self.races_url();
        let response = self
            .request(&url, driver_filter)
            .timeout(self.request_timeout)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            if is_no_race_body(&body) {
                return Err(ConsumerError::NoRace);
            }
            return Err(ConsumerError::Status {
                status: status.as_u16(),
                url,
            });
        }
        if !status.is_success() {
            return Err(ConsumerError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let races: Vec<Race> = response.json().await?;
        debug!(races = races.len(), driver = ?driver_filter, "Fetched races");
        Ok(races)
    }

    /// One-shot query for a single driver of the most recent race.
    pub async fn fetch_driver(&self, name: &str) -> Result<Driver, ConsumerError> {
        let races = self.fetch_races(Some(name)).await?;
        let race = races.into_iter().next().ok_or(ConsumerError::NoRace)?;
        race.drivers
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ConsumerError::DriverNotFound(name.to_string()))
    }
}

/// Whether a 404 body is the feed server's "no race" answer rather than an
/// unknown route.
fn is_no_race_body(body: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(|e| e == NO_RACE_MESSAGE))
        .unwrap_or(false)
}

impl EventSource for FeedClient {
    fn open<'a>(
        &'a self,
        driver_filter: Option<&'a str>,
    ) -> BoxFuture<'a, Result<ByteStream, ConsumerError>> {
        Box::pin(async move {
            let url = self.realtime_url();
            let response = self
                .request(&url, driver_filter)
                .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ConsumerError::Status {
                    status: status.as_u16(),
                    url,
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if !content_type.starts_with(EVENT_STREAM_CONTENT_TYPE) {
                warn!(content_type, url = %url, "Unexpected content type for event stream");
            }

            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ConsumerError::from));
            Ok(Box::pin(stream) as ByteStream)
        })
    }
}
