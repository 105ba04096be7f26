//! HTTP implementation of [`ExileClient`]
//!
//! Request/response calls are plain JSON `GET`s against the configured
//! endpoint. The job stream is a long-lived `GET` answered with
//! `Content-Type: text/event-stream`; every SSE `data:` block carries one
//! JSON-encoded [`Job`].
//!
//! | Operation             | Route                  |
//! |-----------------------|------------------------|
//! | `fetch_configuration` | `GET v1/configuration` |
//! | `poll_events`         | `GET v1/events`        |
//! | `stream_jobs`         | `GET v1/jobs/stream`   |
//!
//! SSE handling:
//!
//! - `event: error` -- the data is surfaced as an [`AgentError::Stream`] item.
//! - `event: ping` and blocks without data are dropped.
//! - A block that is not valid UTF-8 becomes one error item.
//! - A transport failure while reading yields one error item and ends the
//!   stream.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::ExileConfig;
use crate::error::{AgentError, Result};
use crate::exile::{ConfigurationSnapshot, Event, ExileClient, Job, JobStream};

const CONFIGURATION_PATH: &str = "v1/configuration";
const EVENTS_PATH: &str = "v1/events";
const JOB_STREAM_PATH: &str = "v1/jobs/stream";

/// Body of `GET v1/events`.
#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<Event>,
}

/// JSON/SSE client for the remote Exile API.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::time::Duration;
/// use exile_agent::exile::HttpExileClient;
///
/// let client = HttpExileClient::new(
///     url::Url::parse("http://localhost:8080").unwrap(),
///     HashMap::new(),
///     Duration::from_secs(10),
/// )
/// .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct HttpExileClient {
    /// Underlying reqwest HTTP client.
    http_client: reqwest::Client,
    /// Base URL, always ending in `/` so relative routes join below it.
    endpoint: url::Url,
    /// Static extra headers merged into every request (e.g. Authorization).
    headers: HashMap<String, String>,
}

impl HttpExileClient {
    /// Construct a client targeting `endpoint`.
    ///
    /// No network I/O happens here. `connect_timeout` bounds connection
    /// establishment only; per-call bounds are applied by the callers.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Http`] if the reqwest client cannot be built.
    pub fn new(
        mut endpoint: url::Url,
        headers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(AgentError::Http)?;

        Ok(Self {
            http_client,
            endpoint,
            headers,
        })
    }

    /// Construct a client from the `exile` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if no endpoint is configured or it is
    /// not a valid URL.
    pub fn from_config(config: &ExileConfig) -> Result<Self> {
        let raw = config
            .endpoint
            .as_deref()
            .ok_or_else(|| AgentError::Config("exile.endpoint is not set".to_string()))?;
        let endpoint = url::Url::parse(raw)
            .map_err(|e| AgentError::Config(format!("Invalid exile.endpoint '{}': {}", raw, e)))?;

        let mut headers = HashMap::new();
        if let Some(token) = &config.api_token {
            headers.insert("Authorization".to_string(), format!("Bearer {}", token));
        }

        Self::new(
            endpoint,
            headers,
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    /// Base URL requests are resolved against.
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    fn get(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self
            .endpoint
            .join(path)
            .map_err(|e| AgentError::Config(format!("Invalid route '{}': {}", path, e)))?;

        let mut req = self.http_client.get(url);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        Ok(req)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, operation: &str) -> Result<T> {
        let response = self
            .get(path)?
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(AgentError::Http)?;

        check_status(response.status(), operation)?;

        let body = response.bytes().await.map_err(AgentError::Http)?;
        Ok(serde_json::from_slice(&body).map_err(AgentError::Serialization)?)
    }
}

#[async_trait::async_trait]
impl ExileClient for HttpExileClient {
    async fn fetch_configuration(&self) -> Result<ConfigurationSnapshot> {
        self.get_json(CONFIGURATION_PATH, "fetch_configuration")
            .await
    }

    async fn poll_events(&self) -> Result<Vec<Event>> {
        let body: EventsResponse = self.get_json(EVENTS_PATH, "poll_events").await?;
        Ok(body.events)
    }

    async fn stream_jobs(&self) -> Result<JobStream> {
        let response = self
            .get(JOB_STREAM_PATH)?
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(AgentError::Http)?;

        check_status(response.status(), "stream_jobs")?;

        Ok(parse_job_stream(response.bytes_stream()))
    }
}

/// Map a non-success HTTP status to an [`AgentError`].
fn check_status(status: StatusCode, operation: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(AgentError::Authentication(format!(
            "{} returned HTTP {}",
            operation, status
        ))
        .into());
    }

    Err(AgentError::Remote(format!("{} returned HTTP {}", operation, status)).into())
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

struct SseState {
    bytes: ByteStream,
    /// Raw bytes accumulated between blank-line boundaries. Blocks are only
    /// decoded once complete, so a character split across chunks survives.
    buffer: Vec<u8>,
    ready: VecDeque<Result<Job>>,
    done: bool,
}

impl SseState {
    fn push_block(&mut self, block: &[u8]) {
        let item = match std::str::from_utf8(block) {
            Ok(text) => parse_sse_block(text),
            Err(e) => Some(Err(AgentError::Stream(format!(
                "job stream block is not valid UTF-8: {}",
                e
            ))
            .into())),
        };
        if let Some(item) = item {
            self.ready.push_back(item);
        }
    }
}

/// Find the next blank line in `buffer`.
///
/// Returns the end of the block and the offset just past the separator.
/// Both `\n\n` and `\r\n\r\n` terminate a block.
fn find_block_end(buffer: &[u8]) -> Option<(usize, usize)> {
    buffer.iter().enumerate().find_map(|(i, b)| {
        if *b != b'\n' {
            return None;
        }
        let rest = &buffer[i + 1..];
        if rest.starts_with(b"\n") {
            Some((i, i + 2))
        } else if rest.starts_with(b"\r\n") {
            Some((i, i + 3))
        } else {
            None
        }
    })
}

/// Turn an SSE response body into a [`JobStream`].
///
/// # Arguments
///
/// * `byte_stream` - The raw HTTP response body as a stream of byte chunks.
pub fn parse_job_stream<S>(byte_stream: S) -> JobStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = SseState {
        bytes: Box::pin(byte_stream),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);

                    // SSE events are separated by blank lines.
                    while let Some((end, next)) = find_block_end(&state.buffer) {
                        let block: Vec<u8> = state.buffer.drain(..next).take(end).collect();
                        state.push_block(&block);
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    state.ready.push_back(Err(AgentError::Stream(format!(
                        "job stream interrupted: {}",
                        e
                    ))
                    .into()));
                }
                None => {
                    state.done = true;
                    let rest = std::mem::take(&mut state.buffer);
                    state.push_block(&rest);
                }
            }
        }
    }))
}

/// Parse one SSE event block into a job result, or `None` if it carries
/// nothing to deliver.
fn parse_sse_block(block: &str) -> Option<Result<Job>> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim());
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        }
        // `id:`, `retry:` and `:` comment lines are ignored.
    }

    let data = data_lines.join("\n");
    if data.is_empty() {
        return None;
    }

    match event_type {
        Some(et) if et.eq_ignore_ascii_case("ping") => None,
        Some(et) if et.eq_ignore_ascii_case("error") => {
            Some(Err(AgentError::Stream(data).into()))
        }
        _ => Some(
            serde_json::from_str::<Job>(&data)
                .map_err(|e| anyhow::Error::from(AgentError::Serialization(e))),
        ),
    }
}
