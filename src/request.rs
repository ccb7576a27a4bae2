//! `RequestBuilder`: builds the per-attempt request from fixed
//! configuration plus the dynamic `Last-Event-ID`.

use reqwest::header::{HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL};

use crate::config::ClientConfig;
use crate::error::SseError;

pub(crate) struct RequestBuilder<'a> {
    client: &'a reqwest::Client,
    config: &'a ClientConfig,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a reqwest::Client, config: &'a ClientConfig) -> Self {
        Self { client, config }
    }

    /// Snapshots configuration plus `last_event_id` into a request,
    /// applying the caller's `request_transformer` last.
    pub(crate) fn build(&self, last_event_id: Option<&str>) -> Result<reqwest::Request, SseError> {
        let mut builder = self
            .client
            .request(self.config.method.clone(), self.config.url.clone());
        if let Some(body) = &self.config.body {
            builder = builder.body(body.clone());
        }
        let mut request = builder.build()?;

        let headers = request.headers_mut();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        for (name, value) in self.config.headers.iter() {
            headers.insert(name.clone(), value.clone());
        }
        if let Some(id) = last_event_id.filter(|id| !id.is_empty()) {
            match HeaderValue::from_str(id) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static("last-event-id"), value);
                }
                Err(error) => {
                    tracing::warn!(%error, "Last-Event-ID is not a valid header value, omitting it");
                }
            }
        }

        if let Some(transformer) = &self.config.request_transformer {
            request = transformer(request);
        }
        Ok(request)
    }
}
