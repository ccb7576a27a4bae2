//! `SseClient`: the `ReadyState` machine, the stream worker, and the
//! reconnect/backoff policy.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt as _;
use url::Url;

use crate::config::{ClientBuilder, ClientConfig};
use crate::dispatch::AsyncDispatcher;
use crate::error::SseError;
use crate::event::{ErrorAction, MessageData, MessageEvent, ReadyState};
use crate::handler::{ConnectionErrorHandler, DefaultConnectionErrorHandler, EventHandler};
use crate::line::ByteLineSource;
use crate::parser::{EventParser, ParserCallbacks, ParserSink};
use crate::request::RequestBuilder;

/// Atomically-published state shared between the public handle, the
/// stream worker, and (via [`ParserCallbacks`]) the parser.
struct SharedState {
    url: Url,
    ready_state: AtomicU8,
    reconnect_millis: AtomicU64,
    last_event_id: Mutex<Option<String>>,
    current_call: Mutex<Option<tokio::task::AbortHandle>>,
    connected_at: Mutex<Option<Instant>>,
    shutdown_notify: Notify,
}

impl SharedState {
    fn new(url: Url, initial_last_event_id: Option<String>, initial_reconnect: Duration) -> Self {
        Self {
            url,
            ready_state: AtomicU8::new(ReadyState::Raw.as_u8()),
            reconnect_millis: AtomicU64::new(initial_reconnect.as_millis() as u64),
            last_event_id: Mutex::new(initial_last_event_id),
            current_call: Mutex::new(None),
            connected_at: Mutex::new(None),
            shutdown_notify: Notify::new(),
        }
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.ready_state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ReadyState) {
        self.ready_state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn try_transition(&self, from: ReadyState, to: ReadyState) -> bool {
        self.ready_state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// CAS `Open` or `Connecting` to `Closed`; `false` if another caller
    /// already moved the state elsewhere (e.g. to `Shutdown`).
    fn try_transition_to_closed(&self) -> bool {
        loop {
            let current = self.ready_state();
            if !matches!(current, ReadyState::Open | ReadyState::Connecting) {
                return false;
            }
            if self.try_transition(current, ReadyState::Closed) {
                return true;
            }
        }
    }

    /// CAS any non-`Shutdown` state to `Shutdown`. Idempotent: returns
    /// `true` only for the caller that actually performed the transition.
    fn try_begin_shutdown(&self) -> bool {
        loop {
            let current = self.ready_state();
            if current == ReadyState::Shutdown {
                return false;
            }
            if self.try_transition(current, ReadyState::Shutdown) {
                return true;
            }
        }
    }

    fn reconnect_time(&self) -> Duration {
        Duration::from_millis(self.reconnect_millis.load(Ordering::SeqCst))
    }

    fn abort_current_call(&self) {
        if let Some(handle) = self.current_call.lock().unwrap().as_ref() {
            handle.abort();
        }
    }

    fn set_current_call(&self, handle: tokio::task::AbortHandle) {
        *self.current_call.lock().unwrap() = Some(handle);
    }

    fn clear_current_call(&self) {
        *self.current_call.lock().unwrap() = None;
    }

    fn mark_connected_now(&self) {
        *self.connected_at.lock().unwrap() = Some(Instant::now());
    }

    fn clear_connected_at(&self) {
        *self.connected_at.lock().unwrap() = None;
    }

    fn connected_at(&self) -> Option<Instant> {
        *self.connected_at.lock().unwrap()
    }
}

impl ParserCallbacks for SharedState {
    fn set_reconnect_time(&self, millis: u64) {
        self.reconnect_millis.store(millis, Ordering::SeqCst);
    }

    fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().unwrap().clone()
    }

    fn set_last_event_id(&self, id: Option<String>) {
        *self.last_event_id.lock().unwrap() = id;
    }
}

/// Routes parser output to the dispatcher (buffered events, comments) or
/// directly to the handler (streaming events, after a barrier).
struct ControllerSink {
    dispatcher: Arc<AsyncDispatcher>,
    handler: Arc<dyn EventHandler>,
}

#[async_trait]
impl ParserSink for ControllerSink {
    async fn dispatch_message(&self, event_name: String, event: MessageEvent<'_>) {
        let MessageEvent {
            data,
            last_event_id,
            origin,
            ..
        } = event;
        let data = match data {
            MessageData::Buffered(data) => data,
            MessageData::Streaming(_) => {
                tracing::error!("streaming event reached the buffered dispatch path, dropping it");
                return;
            }
        };
        self.dispatcher
            .submit_message(event_name, data, last_event_id, origin)
            .await;
    }

    async fn dispatch_message_sync(&self, event_name: String, event: MessageEvent<'_>) {
        // Wait for everything already queued so this inline call still
        // lands in submission order relative to buffered dispatches.
        self.dispatcher.barrier().await;
        let result = self.handler.on_message(&event_name, event).await;
        crate::dispatch::log_handler_result("on_message", result);
    }

    async fn dispatch_comment(&self, text: String) {
        self.dispatcher.submit_comment(text).await;
    }
}

/// Computes the next backoff sleep, and the `attempts` counter to carry
/// forward. `initial <= 0` (represented as `Duration::ZERO`) disables
/// backoff entirely.
pub(crate) fn compute_backoff(
    attempts: u32,
    initial: Duration,
    max: Duration,
    reset: bool,
) -> (u32, Option<Duration>) {
    if initial.is_zero() {
        return (attempts, None);
    }
    let attempts = if reset { 1 } else { attempts };
    let shift = attempts.min(30);
    let scaled_millis = initial.as_millis().saturating_mul(1u128 << shift);
    let ceiling_millis = scaled_millis.min(max.as_millis()).min(i32::MAX as u128) as u64;
    let jitter_millis = if ceiling_millis == 0 {
        0
    } else {
        rand::rng().random_range(0..=ceiling_millis)
    };
    let sleep_millis = ceiling_millis / 2 + jitter_millis / 2;
    (attempts, Some(Duration::from_millis(sleep_millis)))
}

async fn run_attempt(
    shared: Arc<SharedState>,
    config: Arc<ClientConfig>,
    dispatcher: Arc<AsyncDispatcher>,
    sink: Arc<ControllerSink>,
    http: reqwest::Client,
) -> SseError {
    shared.set_state(ReadyState::Connecting);
    shared.clear_connected_at();

    let last_event_id = ParserCallbacks::last_event_id(shared.as_ref());
    let request = match RequestBuilder::new(&http, &config).build(last_event_id.as_deref()) {
        Ok(request) => request,
        Err(error) => return error,
    };

    tracing::debug!(url = %config.url, "connecting to event stream");
    let response = match http.execute(request).await {
        Ok(response) => response,
        Err(error) => return SseError::Transport(error),
    };

    if !response.status().is_success() {
        return SseError::UnsuccessfulResponse(response.status());
    }

    shared.set_state(ReadyState::Open);
    shared.mark_connected_now();
    tracing::info!(url = %config.url, "event stream open");
    dispatcher.submit_open().await;

    let body = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other));
    let reader = tokio_util::io::StreamReader::new(body);
    let mut source = ByteLineSource::new(reader, config.read_buffer_size);
    let mut parser = EventParser::new(
        config.url.clone(),
        config.stream_event_data,
        &config.expect_fields,
    );

    match parser.run(&mut source, shared.as_ref(), sink.as_ref()).await {
        Ok(()) => SseError::EndOfStream,
        Err(error) => error,
    }
}

async fn run_stream_worker(
    shared: Arc<SharedState>,
    config: Arc<ClientConfig>,
    dispatcher: Arc<AsyncDispatcher>,
    handler: Arc<dyn EventHandler>,
    error_handler: Arc<dyn ConnectionErrorHandler>,
    http: reqwest::Client,
) {
    let sink = Arc::new(ControllerSink {
        dispatcher: dispatcher.clone(),
        handler: handler.clone(),
    });
    let mut attempts: u32 = 0;

    loop {
        if shared.ready_state() == ReadyState::Shutdown {
            break;
        }

        if attempts > 0 {
            let reset = shared
                .connected_at()
                .map(|at| at.elapsed() >= config.backoff_reset_threshold)
                .unwrap_or(false);
            let (new_attempts, sleep) = compute_backoff(
                attempts,
                shared.reconnect_time(),
                config.max_reconnect_time,
                reset,
            );
            attempts = new_attempts;
            if let Some(sleep) = sleep {
                tokio::select! {
                    _ = tokio::time::sleep(sleep) => {}
                    _ = shared.shutdown_notify.notified() => break,
                }
            }
        }
        attempts += 1;

        if shared.ready_state() == ReadyState::Shutdown {
            break;
        }

        let task = tokio::spawn(run_attempt(
            shared.clone(),
            config.clone(),
            dispatcher.clone(),
            sink.clone(),
            http.clone(),
        ));
        shared.set_current_call(task.abort_handle());
        let outcome = task.await;
        shared.clear_current_call();

        let error = match outcome {
            Ok(error) => error,
            Err(join_error) if join_error.is_cancelled() => {
                if shared.ready_state() == ReadyState::Shutdown {
                    break;
                }
                // restart() cancelled us while Open; loop back to the next
                // attempt, backoff counters intact (`connected_at` stands).
                if shared.try_transition_to_closed() {
                    dispatcher.submit_closed().await;
                }
                continue;
            }
            Err(join_error) => std::panic::resume_unwind(join_error.into_panic()),
        };

        let action = {
            if matches!(error, SseError::EndOfStream) {
                tracing::debug!(url = %config.url, "event stream ended cleanly");
            } else {
                tracing::warn!(url = %config.url, %error, "event stream connection error");
            }
            let action = error_handler.on_connection_error(&error).await;
            if action == ErrorAction::Proceed && error.reaches_user_handler() {
                dispatcher.submit_error(error).await;
            }
            action
        };

        match action {
            ErrorAction::Shutdown => {
                tracing::info!(url = %config.url, "connection error handler requested shutdown");
                shared.try_begin_shutdown();
                break;
            }
            ErrorAction::Proceed => {
                if shared.try_transition_to_closed() {
                    dispatcher.submit_closed().await;
                }
            }
        }
    }

    shared.try_begin_shutdown();
    shared.abort_current_call();
    dispatcher.shutdown(Duration::from_secs(30)).await;
    tracing::info!(url = %config.url, "event stream client shut down");
}

/// A reconnecting Server-Sent Events client. Construct via
/// [`ClientBuilder::build`], then call [`SseClient::start`].
pub struct SseClient {
    shared: Arc<SharedState>,
    config: Arc<ClientConfig>,
    dispatcher: Arc<AsyncDispatcher>,
    http: reqwest::Client,
    handler: Arc<dyn EventHandler>,
    error_handler: Arc<dyn ConnectionErrorHandler>,
    stream_worker: Mutex<Option<JoinHandle<()>>>,
}

impl SseClient {
    pub(crate) fn new(builder: ClientBuilder, handler: Arc<dyn EventHandler>) -> Result<Self, SseError> {
        Self::with_error_handler(builder, handler, Arc::new(DefaultConnectionErrorHandler))
    }

    pub(crate) fn with_error_handler(
        builder: ClientBuilder,
        handler: Arc<dyn EventHandler>,
        error_handler: Arc<dyn ConnectionErrorHandler>,
    ) -> Result<Self, SseError> {
        let config = builder.into_config()?;
        // `write_timeout` has no reqwest equivalent to wire into; kept as a
        // documented, validated option with no enforcement point.
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(SseError::Transport)?;
        let shared = Arc::new(SharedState::new(
            config.url.clone(),
            config.initial_last_event_id.clone(),
            config.reconnect_time,
        ));
        let dispatcher = Arc::new(AsyncDispatcher::new(
            handler.clone(),
            config.max_event_tasks_in_flight,
        ));
        Ok(Self {
            shared,
            config: Arc::new(config),
            dispatcher,
            http,
            handler,
            error_handler,
            stream_worker: Mutex::new(None),
        })
    }

    /// Idempotent; a no-op unless the client is still [`ReadyState::Raw`].
    pub fn start(&self) {
        if self.shared.try_transition(ReadyState::Raw, ReadyState::Connecting) {
            self.spawn_worker();
        }
    }

    /// Non-blocking. Equivalent to [`SseClient::start`] from `Raw`;
    /// cancels the in-flight call (preserving backoff state) from `Open`;
    /// a no-op otherwise.
    pub fn restart(&self) {
        match self.shared.ready_state() {
            ReadyState::Raw => self.start(),
            ReadyState::Open => self.shared.abort_current_call(),
            _ => {}
        }
    }

    /// Idempotent and non-blocking: signals shutdown and returns
    /// immediately. Call [`SseClient::await_closed`] to wait for the
    /// workers to actually finish.
    pub fn close(&self) {
        if self.shared.try_begin_shutdown() {
            self.shared.abort_current_call();
            self.shared.shutdown_notify.notify_waiters();
        }
    }

    /// Blocks up to `timeout` for the stream worker (and, transitively,
    /// the dispatch worker it shuts down on exit) to terminate.
    pub async fn await_closed(&self, timeout: Duration) -> bool {
        let handle = self.stream_worker.lock().unwrap().take();
        match handle {
            Some(handle) => matches!(tokio::time::timeout(timeout, handle).await, Ok(Ok(()))),
            None => true,
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    pub fn last_event_id(&self) -> Option<String> {
        ParserCallbacks::last_event_id(self.shared.as_ref())
    }

    pub fn url(&self) -> &Url {
        &self.config.url
    }

    fn spawn_worker(&self) {
        let handle = tokio::spawn(run_stream_worker(
            self.shared.clone(),
            self.config.clone(),
            self.dispatcher.clone(),
            self.handler.clone(),
            self.error_handler.clone(),
            self.http.clone(),
        ));
        *self.stream_worker.lock().unwrap() = Some(handle);
    }
}

impl ClientBuilder {
    /// Builds the client with the default [`ConnectionErrorHandler`]
    /// (always [`ErrorAction::Proceed`]).
    pub fn build(self, handler: Arc<dyn EventHandler>) -> Result<SseClient, SseError> {
        SseClient::new(self, handler)
    }

    /// Builds the client with a caller-supplied [`ConnectionErrorHandler`].
    pub fn build_with_error_handler(
        self,
        handler: Arc<dyn EventHandler>,
        error_handler: Arc<dyn ConnectionErrorHandler>,
    ) -> Result<SseClient, SseError> {
        SseClient::with_error_handler(self, handler, error_handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_upper_half_of_ceiling() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        for attempt in 1..10 {
            let (_, sleep) = compute_backoff(attempt, initial, max, false);
            let sleep = sleep.unwrap();
            let ceiling = (initial.as_millis() as u64)
                .saturating_mul(1u64 << attempt.min(30))
                .min(max.as_millis() as u64);
            assert!(sleep.as_millis() as u64 >= ceiling / 2, "attempt {attempt}");
            assert!(sleep.as_millis() as u64 <= ceiling, "attempt {attempt}");
        }
    }

    #[test]
    fn backoff_resets_to_attempt_one() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let (attempts_after, _) = compute_backoff(7, initial, max, true);
        assert_eq!(attempts_after, 1);
    }

    #[test]
    fn zero_initial_disables_backoff() {
        let (attempts_after, sleep) = compute_backoff(3, Duration::ZERO, Duration::from_secs(30), false);
        assert_eq!(attempts_after, 3);
        assert!(sleep.is_none());
    }

    #[test]
    fn ceiling_is_capped_at_max() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let (_, sleep) = compute_backoff(10, initial, max, false);
        assert!(sleep.unwrap() <= max);
    }

    #[test]
    fn connected_at_does_not_leak_into_later_failed_attempts() {
        let shared = SharedState::new(
            Url::parse("https://example.test/events").unwrap(),
            None,
            Duration::from_secs(1),
        );
        assert!(shared.connected_at().is_none());

        shared.mark_connected_now();
        assert!(shared.connected_at().is_some());

        // A later attempt that never reaches Open must start from a clean
        // slate, not see the previous connection's timestamp.
        shared.clear_connected_at();
        assert!(shared.connected_at().is_none());
    }
}
