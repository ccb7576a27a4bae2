//! Error taxonomy for the SSE client.
//!
//! Parsing anomalies (unknown fields, malformed `retry:`, a NUL in `id:`)
//! are tolerated per the SSE spec and never surface as an [`SseError`].
//! Everything here is either a transport-level failure or a protocol-level
//! condition the [`ConnectionErrorHandler`](crate::handler::ConnectionErrorHandler)
//! gets a chance to veto before the client reconnects.

use reqwest::StatusCode;

/// Errors raised while establishing or reading an SSE stream.
#[derive(Debug, thiserror::Error)]
pub enum SseError {
    /// The request could not be sent, or the connection/body read failed.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server responded with a non-2xx status at stream start.
    #[error("unsuccessful response: {0}")]
    UnsuccessfulResponse(StatusCode),

    /// The server closed the stream cleanly after it had been established.
    #[error("end of stream")]
    EndOfStream,

    /// The underlying byte source failed (for sources other than `reqwest`,
    /// e.g. in tests).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A line was not valid UTF-8.
    #[error("invalid utf-8 on the wire: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Configuration was rejected at build time.
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl SseError {
    /// True for variants routed through both the
    /// [`ConnectionErrorHandler`](crate::handler::ConnectionErrorHandler)
    /// *and* the user's `on_error`, as opposed to [`SseError::EndOfStream`]
    /// which only reaches the connection error handler.
    pub fn reaches_user_handler(&self) -> bool {
        !matches!(self, SseError::EndOfStream)
    }
}
