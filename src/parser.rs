//! `EventParser`: applies the SSE field-parsing algorithm to a line
//! stream, maintaining the in-progress event and emitting completed (or,
//! in streaming mode, in-progress) events through a [`ParserSink`].

use std::collections::HashSet;

use async_trait::async_trait;
use url::Url;

use crate::error::SseError;
use crate::event::{MessageData, MessageEvent};
use crate::field::split_field;
use crate::line::ByteLineSource;

/// The two fields `expect_fields` may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectField {
    Event,
    Id,
}

/// The narrow capability the parser needs from the connection controller:
/// updating the server-controlled reconnect time, and reading/advancing
/// the session's last-seen event id. Modeled as a plain trait rather than
/// a back-pointer to the controller.
pub(crate) trait ParserCallbacks: Send + Sync {
    fn set_reconnect_time(&self, millis: u64);
    fn last_event_id(&self) -> Option<String>;
    fn set_last_event_id(&self, id: Option<String>);
}

/// Where completed/streaming events and comments go. Buffered events and
/// comments are queued onto the [`AsyncDispatcher`](crate::dispatch::AsyncDispatcher);
/// streaming events are dispatched synchronously, inline on the stream
/// worker, because their [`DataReader`](crate::line::DataReader) borrows
/// the [`ByteLineSource`] that only the stream worker may touch.
#[async_trait]
pub(crate) trait ParserSink: Send + Sync {
    async fn dispatch_message(&self, event_name: String, event: MessageEvent<'_>);
    async fn dispatch_message_sync(&self, event_name: String, event: MessageEvent<'_>);
    async fn dispatch_comment(&self, text: String);
}

pub(crate) struct EventParser {
    origin: Url,
    stream_event_data: bool,
    expect_event: bool,
    expect_id: bool,

    event_name: Option<String>,
    data_buf: String,
    data_seen: bool,
    id_buf: Option<String>,
    seen_event: bool,
    seen_id: bool,
    /// Set once a streaming dispatch has happened for the current event;
    /// further fields are ignored until the blank line that ends it.
    post_stream_suppress: bool,
}

impl EventParser {
    pub(crate) fn new(
        origin: Url,
        stream_event_data: bool,
        expect_fields: &HashSet<ExpectField>,
    ) -> Self {
        Self {
            origin,
            stream_event_data,
            expect_event: expect_fields.contains(&ExpectField::Event),
            expect_id: expect_fields.contains(&ExpectField::Id),
            event_name: None,
            data_buf: String::new(),
            data_seen: false,
            id_buf: None,
            seen_event: false,
            seen_id: false,
            post_stream_suppress: false,
        }
    }

    /// Runs until the source reaches clean end-of-input or errors.
    /// `Ok(())` on clean EOF; the caller treats that as `EndOfStream`.
    pub(crate) async fn run(
        &mut self,
        source: &mut ByteLineSource,
        callbacks: &impl ParserCallbacks,
        sink: &dyn ParserSink,
    ) -> Result<(), SseError> {
        loop {
            let line = match source.next_line().await? {
                Some(line) => line,
                None => return Ok(()),
            };

            if self.post_stream_suppress {
                if line.is_empty() {
                    self.post_stream_suppress = false;
                    self.reset_event();
                }
                continue;
            }

            if line.is_empty() {
                self.dispatch_if_eligible(callbacks, sink).await;
                self.reset_event();
                continue;
            }

            if let Some(rest) = line.strip_prefix(':') {
                let text = rest.strip_prefix(' ').unwrap_or(rest);
                sink.dispatch_comment(text.to_string()).await;
                continue;
            }

            let (field, value) = split_field(&line);
            match field {
                "event" => {
                    self.seen_event = true;
                    self.event_name = (!value.is_empty()).then(|| value.to_string());
                }
                "data" => {
                    if self.stream_event_data && !self.data_seen && self.expect_fields_satisfied()
                    {
                        self.data_seen = true;
                        self.dispatch_streaming(callbacks, sink, source, value)
                            .await?;
                        self.post_stream_suppress = true;
                        continue;
                    }
                    if !self.data_buf.is_empty() {
                        self.data_buf.push('\n');
                    }
                    self.data_buf.push_str(value);
                    self.data_seen = true;
                }
                "id" => {
                    if !value.contains('\0') {
                        self.id_buf = Some(value.to_string());
                        self.seen_id = true;
                    }
                }
                "retry" => {
                    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                        if let Ok(millis) = value.parse::<u64>() {
                            callbacks.set_reconnect_time(millis);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn expect_fields_satisfied(&self) -> bool {
        (!self.expect_event || self.seen_event) && (!self.expect_id || self.seen_id)
    }

    fn resolve_last_event_id(&mut self, callbacks: &impl ParserCallbacks) -> Option<String> {
        match self.id_buf.take() {
            Some(value) => {
                let new_id = (!value.is_empty()).then_some(value);
                callbacks.set_last_event_id(new_id.clone());
                new_id
            }
            None => callbacks.last_event_id(),
        }
    }

    async fn dispatch_if_eligible(&mut self, callbacks: &impl ParserCallbacks, sink: &dyn ParserSink) {
        if !self.data_seen {
            return;
        }
        let event_name = self
            .event_name
            .clone()
            .unwrap_or_else(|| "message".to_string());
        let last_event_id = self.resolve_last_event_id(callbacks);
        let data = std::mem::take(&mut self.data_buf);
        let event = MessageEvent {
            event_name: event_name.clone(),
            data: MessageData::Buffered(data),
            last_event_id,
            origin: self.origin.clone(),
        };
        sink.dispatch_message(event_name, event).await;
    }

    async fn dispatch_streaming(
        &mut self,
        callbacks: &impl ParserCallbacks,
        sink: &dyn ParserSink,
        source: &mut ByteLineSource,
        first_value: &str,
    ) -> Result<(), SseError> {
        let event_name = self
            .event_name
            .clone()
            .unwrap_or_else(|| "message".to_string());
        let last_event_id = self.resolve_last_event_id(callbacks);
        let reader = source.streaming_reader(first_value);
        let event = MessageEvent {
            event_name: event_name.clone(),
            data: MessageData::Streaming(reader),
            last_event_id,
            origin: self.origin.clone(),
        };
        sink.dispatch_message_sync(event_name, event).await;
        Ok(())
    }

    fn reset_event(&mut self) {
        self.event_name = None;
        self.data_buf.clear();
        self.data_seen = false;
        self.id_buf = None;
        self.seen_event = false;
        self.seen_id = false;
    }
}
