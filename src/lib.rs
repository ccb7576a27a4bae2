//! # `sse-client`
//!
//! `sse-client` is a reconnecting [Server-Sent Events (SSE)](https://developer.mozilla.org/en-US/docs/Web/API/Server-sent_events/Using_server-sent_events)
//! client built on top of [reqwest]. Unlike a plain `.bytes_stream()` over
//! an SSE response, it owns the whole connection lifecycle: reconnecting
//! with jittered backoff, replaying `Last-Event-ID`, and serializing
//! event delivery onto a dedicated worker so a slow [EventHandler] never
//! blocks the socket read.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use sse_client::{ClientBuilder, EventHandler, HandlerResult, MessageEvent};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_message(&self, event_name: &str, event: MessageEvent<'_>) -> HandlerResult {
//!         let data = event.data.into_string().await?;
//!         println!("{event_name}: {data}");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ClientBuilder::parse("https://sse.test-free.online/api/story")
//!         .unwrap()
//!         .build(Arc::new(Printer))
//!         .unwrap();
//!     client.start();
//!     client.await_closed(std::time::Duration::from_secs(60)).await;
//! }
//! ```
//!
//! ## Streaming large events
//!
//! Setting [`ClientBuilder::stream_event_data`] hands the handler a
//! [`DataReader`] instead of a fully-buffered `String` once `expect_fields`
//! (if configured) are satisfied, so a handler that only cares about the
//! first few bytes of a large event doesn't pay to buffer the rest.

mod config;
mod controller;
mod dispatch;
mod error;
mod event;
mod field;
mod handler;
mod line;
mod parser;
mod request;

pub use config::{ClientBuilder, RequestTransformer};
pub use controller::SseClient;
pub use error::SseError;
pub use event::{ErrorAction, MessageData, MessageEvent, ReadyState};
pub use handler::{ConnectionErrorHandler, EventHandler, HandlerError, HandlerResult};
pub use line::DataReader;
pub use parser::ExpectField;
