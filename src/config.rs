//! The configuration surface and its builder.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::SseError;
use crate::parser::ExpectField;

/// A caller-supplied hook invoked last when building the per-attempt
/// request; may rewrite anything.
pub type RequestTransformer = Arc<dyn Fn(reqwest::Request) -> reqwest::Request + Send + Sync>;

/// Immutable per-client configuration, snapshotted into a
/// [`RequestBuilder`](crate::request::RequestBuilder) on every attempt.
pub struct ClientConfig {
    pub(crate) url: Url,
    pub(crate) method: reqwest::Method,
    pub(crate) body: Option<Vec<u8>>,
    pub(crate) headers: HeaderMap,
    pub(crate) request_transformer: Option<RequestTransformer>,
    pub(crate) initial_last_event_id: Option<String>,
    pub(crate) reconnect_time: Duration,
    pub(crate) max_reconnect_time: Duration,
    pub(crate) backoff_reset_threshold: Duration,
    pub(crate) connect_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) read_buffer_size: usize,
    pub(crate) stream_event_data: bool,
    pub(crate) expect_fields: HashSet<ExpectField>,
    pub(crate) max_event_tasks_in_flight: usize,
}

/// Builds a [`ClientConfig`] (and, via [`ClientBuilder::build`], a
/// [`SseClient`](crate::controller::SseClient)) with documented defaults
/// for every option.
pub struct ClientBuilder {
    url: Url,
    method: reqwest::Method,
    body: Option<Vec<u8>>,
    headers: HeaderMap,
    request_transformer: Option<RequestTransformer>,
    last_event_id: Option<String>,
    reconnect_time: Duration,
    max_reconnect_time: Duration,
    backoff_reset_threshold: Duration,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    read_buffer_size: usize,
    stream_event_data: bool,
    expect_fields: HashSet<ExpectField>,
    max_event_tasks_in_flight: usize,
}

impl ClientBuilder {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: reqwest::Method::GET,
            body: None,
            headers: HeaderMap::new(),
            request_transformer: None,
            last_event_id: None,
            reconnect_time: Duration::from_secs(1),
            max_reconnect_time: Duration::from_secs(30),
            backoff_reset_threshold: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(5 * 60),
            write_timeout: Duration::from_secs(5),
            read_buffer_size: 1000,
            stream_event_data: false,
            expect_fields: HashSet::new(),
            max_event_tasks_in_flight: 0,
        }
    }

    /// Parses `url` and fails immediately if it isn't http(s) — convenience
    /// over [`ClientBuilder::new`] for string endpoints.
    pub fn parse(url: &str) -> Result<Self, SseError> {
        let url = Url::parse(url).map_err(|e| SseError::InvalidUrl(e.to_string()))?;
        Ok(Self::new(url))
    }

    pub fn method(mut self, method: reqwest::Method) -> Self {
        self.method = method;
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn request_transformer(
        mut self,
        transformer: impl Fn(reqwest::Request) -> reqwest::Request + Send + Sync + 'static,
    ) -> Self {
        self.request_transformer = Some(Arc::new(transformer));
        self
    }

    pub fn last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = Some(id.into());
        self
    }

    pub fn reconnect_time(mut self, duration: Duration) -> Self {
        self.reconnect_time = duration;
        self
    }

    pub fn max_reconnect_time(mut self, duration: Duration) -> Self {
        self.max_reconnect_time = duration;
        self
    }

    pub fn backoff_reset_threshold(mut self, duration: Duration) -> Self {
        self.backoff_reset_threshold = duration;
        self
    }

    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = duration;
        self
    }

    pub fn read_timeout(mut self, duration: Duration) -> Self {
        self.read_timeout = duration;
        self
    }

    pub fn write_timeout(mut self, duration: Duration) -> Self {
        self.write_timeout = duration;
        self
    }

    pub fn read_buffer_size(mut self, bytes: usize) -> Self {
        self.read_buffer_size = bytes;
        self
    }

    pub fn stream_event_data(mut self, enabled: bool) -> Self {
        self.stream_event_data = enabled;
        self
    }

    pub fn expect_fields(mut self, fields: impl IntoIterator<Item = ExpectField>) -> Self {
        self.expect_fields = fields.into_iter().collect();
        self
    }

    pub fn max_event_tasks_in_flight(mut self, permits: usize) -> Self {
        self.max_event_tasks_in_flight = permits;
        self
    }

    pub(crate) fn into_config(self) -> Result<ClientConfig, SseError> {
        if self.url.scheme() != "http" && self.url.scheme() != "https" {
            return Err(SseError::InvalidUrl(format!(
                "unsupported scheme `{}`, expected http or https",
                self.url.scheme()
            )));
        }
        Ok(ClientConfig {
            url: self.url,
            method: self.method,
            body: self.body,
            headers: self.headers,
            request_transformer: self.request_transformer,
            initial_last_event_id: self.last_event_id,
            reconnect_time: self.reconnect_time,
            max_reconnect_time: self.max_reconnect_time,
            backoff_reset_threshold: self.backoff_reset_threshold,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            read_buffer_size: self.read_buffer_size,
            stream_event_data: self.stream_event_data,
            expect_fields: self.expect_fields,
            max_event_tasks_in_flight: self.max_event_tasks_in_flight,
        })
    }
}
