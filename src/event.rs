//! The public data model: completed events, the streaming data handle, and
//! the controller's observable lifecycle state.

use url::Url;

use crate::line::DataReader;

/// The controller's lifecycle phase: transitions are monotone towards
/// [`ReadyState::Shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// The client has been constructed but `start()` has not been called.
    Raw,
    /// A connection attempt is in flight.
    Connecting,
    /// The stream is established and events may be flowing.
    Open,
    /// Between attempts, waiting out the backoff delay (or about to retry).
    Closed,
    /// Terminal. No further transitions are possible.
    Shutdown,
}

impl ReadyState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Raw,
            1 => ReadyState::Connecting,
            2 => ReadyState::Open,
            3 => ReadyState::Closed,
            _ => ReadyState::Shutdown,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ReadyState::Raw => 0,
            ReadyState::Connecting => 1,
            ReadyState::Open => 2,
            ReadyState::Closed => 3,
            ReadyState::Shutdown => 4,
        }
    }
}

/// What a [`ConnectionErrorHandler`](crate::handler::ConnectionErrorHandler)
/// decides to do after being consulted about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Keep going: fall through to the normal reconnect path.
    Proceed,
    /// Transition the client to [`ReadyState::Shutdown`] without retrying.
    Shutdown,
}

/// The `data` payload of a [`MessageEvent`].
///
/// Buffered mode (the default) concatenates every `data:` line of the event
/// eagerly. Streaming mode (`stream_event_data = true`) instead hands the
/// handler a [`DataReader`] it must drain before returning, never holding
/// the whole event body in memory at once.
pub enum MessageData<'a> {
    Buffered(String),
    Streaming(DataReader<'a>),
}

impl<'a> MessageData<'a> {
    /// Reads the payload to completion as an owned `String`, regardless of
    /// which mode produced it. For [`MessageData::Streaming`] this drains
    /// the reader, honoring the contract that a handler must fully consume
    /// (or close) it before returning.
    pub async fn into_string(self) -> Result<String, crate::error::SseError> {
        match self {
            MessageData::Buffered(s) => Ok(s),
            MessageData::Streaming(mut reader) => reader.read_to_string().await,
        }
    }
}

/// A completed SSE event delivered to
/// [`EventHandler::on_message`](crate::handler::EventHandler::on_message).
pub struct MessageEvent<'a> {
    /// `event:` field value, or `"message"` if the wire never set one.
    pub event_name: String,
    /// The event payload; see [`MessageData`].
    pub data: MessageData<'a>,
    /// The session's last-known `id:` at the moment this event was emitted.
    pub last_event_id: Option<String>,
    /// The stream's URL, for handlers juggling more than one client.
    pub origin: Url,
}
