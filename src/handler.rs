//! The two trait surfaces a caller implements: [`EventHandler`] receives
//! parsed events and lifecycle notifications; [`ConnectionErrorHandler`]
//! gets a veto over whether a failure should end in a reconnect or a
//! shutdown.

use async_trait::async_trait;

use crate::error::SseError;
use crate::event::{ErrorAction, MessageEvent};

/// Error type returned by handler callbacks. Anything is accepted; the
/// dispatcher logs it via `tracing::warn!` and moves on — a handler error
/// never reaches the stream worker or aborts the connection.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for [`EventHandler`] methods.
pub type HandlerResult = Result<(), HandlerError>;

/// Receives parsed events and connection lifecycle notifications.
///
/// All callbacks for a single client are strictly serialized and totally
/// ordered: `on_open` always precedes the `on_message`/`on_comment`
/// calls of that connection, and `on_closed` always follows them. A
/// handler that never returns (or never drains a streaming
/// [`MessageEvent`](crate::event::MessageEvent)) will wedge the dispatch
/// worker and, once any configured backpressure permits are exhausted,
/// the stream worker too — this crate does not install a watchdog for
/// that case.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// A connection was just established; no events have been delivered
    /// for it yet.
    async fn on_open(&self) -> HandlerResult {
        Ok(())
    }

    /// The connection that the most recent `on_open` announced has ended,
    /// whether cleanly or via error.
    async fn on_closed(&self) -> HandlerResult {
        Ok(())
    }

    /// A well-formed event reached the blank line (buffered mode) or its
    /// first `data:` line (streaming mode). `event_name` is `"message"`
    /// when the wire never set one explicitly.
    async fn on_message(&self, event_name: &str, event: MessageEvent<'_>) -> HandlerResult;

    /// A comment line (`: ...`) was seen on the wire.
    async fn on_comment(&self, _text: &str) -> HandlerResult {
        Ok(())
    }

    /// A transport or protocol error was not vetoed by the
    /// [`ConnectionErrorHandler`] (notably, [`SseError::EndOfStream`]
    /// never reaches here).
    async fn on_error(&self, _error: &SseError) -> HandlerResult {
        Ok(())
    }
}

/// Consulted before a transport/protocol failure is reconnected from. The
/// default implementation always proceeds with the normal reconnect
/// policy.
#[async_trait]
pub trait ConnectionErrorHandler: Send + Sync {
    async fn on_connection_error(&self, _error: &SseError) -> ErrorAction {
        ErrorAction::Proceed
    }
}

/// The handler used when no [`ConnectionErrorHandler`] is configured.
pub(crate) struct DefaultConnectionErrorHandler;

#[async_trait]
impl ConnectionErrorHandler for DefaultConnectionErrorHandler {}
