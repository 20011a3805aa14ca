//! Durable history via an external append-log service.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use agora_protocol::Envelope;

use crate::channel::ChannelKey;
use crate::store::{HistoryStore, SequenceId, StoreError, StoredEnvelope};

/// Stream backend configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base URL of the append-log service.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// How long to fail fast after a transport failure before probing again.
    pub retry_cooldown: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:7171".to_string(),
            timeout: Duration::from_secs(2),
            retry_cooldown: Duration::from_secs(10),
        }
    }
}

#[derive(Deserialize)]
struct AppendAck {
    seq: SequenceId,
}

#[derive(Deserialize)]
struct HistoryPage {
    #[serde(default)]
    entries: Vec<StoredEnvelope>,
}

/// History adapter over an HTTP append-log service.
///
/// Streams are addressed as `{base}/streams/{room}:{channel}`; entries live
/// under `/entries`. Every request is bounded by the configured timeout. A
/// transport failure marks the backend unavailable and starts the retry
/// cooldown; after the cooldown one request is let through as a probe, and
/// a success clears the mark.
pub struct StreamStore {
    client: Client,
    base: Url,
    retry_cooldown: Duration,
    down_since: Mutex<Option<Instant>>,
}

impl StreamStore {
    /// Create a stream store.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: StreamConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| StoreError::Backend(format!("invalid base url: {e}")))?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self {
            client,
            base,
            retry_cooldown: config.retry_cooldown,
            down_since: Mutex::new(None),
        })
    }

    fn stream_url(&self, key: &ChannelKey, entries: bool) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| StoreError::Backend("base url cannot carry paths".to_string()))?;
            segments.push("streams");
            segments.push(&key.to_string());
            if entries {
                segments.push("entries");
            }
        }
        Ok(url)
    }

    /// Fail fast while cooling down; after the cooldown the call proceeds
    /// as a half-open probe.
    fn gate(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(
                "cooling down after transport failure".to_string(),
            ))
        }
    }

    fn mark_failure(&self, error: &dyn std::fmt::Display) {
        let mut down = self.down_since.lock().unwrap();
        if down.is_none() {
            warn!(error = %error, "History backend unavailable");
        }
        *down = Some(Instant::now());
    }

    fn mark_success(&self) {
        let mut down = self.down_since.lock().unwrap();
        if down.take().is_some() {
            debug!("History backend recovered");
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.mark_failure(&e);
                return Err(StoreError::Unavailable(e.to_string()));
            }
        };
        match response.error_for_status() {
            Ok(response) => Ok(response),
            Err(e) => {
                self.mark_failure(&e);
                Err(StoreError::Backend(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl HistoryStore for StreamStore {
    async fn append(
        &self,
        key: &ChannelKey,
        envelope: &Envelope,
    ) -> Result<SequenceId, StoreError> {
        self.gate()?;
        let url = self.stream_url(key, true)?;

        let response = self.execute(self.client.post(url).json(envelope)).await?;
        let ack: AppendAck = match response.json().await {
            Ok(ack) => ack,
            Err(e) => {
                self.mark_failure(&e);
                return Err(StoreError::Backend(e.to_string()));
            }
        };

        self.mark_success();
        Ok(ack.seq)
    }

    async fn history(
        &self,
        key: &ChannelKey,
        limit: usize,
        before: Option<SequenceId>,
    ) -> Result<Vec<StoredEnvelope>, StoreError> {
        self.gate()?;
        let url = self.stream_url(key, true)?;

        let mut request = self.client.get(url).query(&[("limit", limit as u64)]);
        if let Some(bound) = before {
            request = request.query(&[("before", bound)]);
        }

        let response = self.execute(request).await?;
        let page: HistoryPage = match response.json().await {
            Ok(page) => page,
            Err(e) => {
                self.mark_failure(&e);
                return Err(StoreError::Backend(e.to_string()));
            }
        };

        self.mark_success();
        Ok(page.entries)
    }

    async fn purge(&self, key: &ChannelKey) -> Result<(), StoreError> {
        self.gate()?;
        let url = self.stream_url(key, false)?;

        self.execute(self.client.delete(url)).await?;
        self.mark_success();
        Ok(())
    }

    fn is_available(&self) -> bool {
        match *self.down_since.lock().unwrap() {
            None => true,
            Some(since) => since.elapsed() >= self.retry_cooldown,
        }
    }

    fn name(&self) -> &'static str {
        "stream"
    }
}
