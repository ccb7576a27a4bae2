//! `AsyncDispatcher`: serializes handler callbacks onto a dedicated
//! worker task, with an optional in-flight permit count for backpressure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use url::Url;

use crate::error::SseError;
use crate::event::{MessageData, MessageEvent};
use crate::handler::{EventHandler, HandlerResult};

struct QueuedMessage {
    event_name: String,
    data: String,
    last_event_id: Option<String>,
    origin: Url,
}

enum DispatchItem {
    Open,
    Closed,
    Message(QueuedMessage),
    Comment(String),
    Error(SseError),
    /// Resolved once every item submitted before it has been processed.
    /// Lets the stream worker wait out the queue before making a
    /// synchronous streaming-mode dispatch, so total ordering holds even
    /// though that call bypasses the queue entirely.
    Barrier(oneshot::Sender<()>),
}

type QueueEntry = (DispatchItem, Option<OwnedSemaphorePermit>);

pub(crate) struct AsyncDispatcher {
    tx: Mutex<Option<mpsc::UnboundedSender<QueueEntry>>>,
    semaphore: Option<Arc<Semaphore>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncDispatcher {
    pub(crate) fn new(handler: Arc<dyn EventHandler>, max_in_flight: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight)));
        let worker = tokio::spawn(Self::run_worker(rx, handler));
        Self {
            tx: Mutex::new(Some(tx)),
            semaphore,
            worker: Mutex::new(Some(worker)),
        }
    }

    async fn acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        match &self.semaphore {
            Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
            None => None,
        }
    }

    fn send(&self, item: DispatchItem, permit: Option<OwnedSemaphorePermit>) {
        if let Some(tx) = self.tx.lock().unwrap().as_ref() {
            let _ = tx.send((item, permit));
        }
    }

    pub(crate) async fn submit_open(&self) {
        let permit = self.acquire_permit().await;
        self.send(DispatchItem::Open, permit);
    }

    pub(crate) async fn submit_closed(&self) {
        let permit = self.acquire_permit().await;
        self.send(DispatchItem::Closed, permit);
    }

    pub(crate) async fn submit_comment(&self, text: String) {
        let permit = self.acquire_permit().await;
        self.send(DispatchItem::Comment(text), permit);
    }

    pub(crate) async fn submit_error(&self, error: SseError) {
        let permit = self.acquire_permit().await;
        self.send(DispatchItem::Error(error), permit);
    }

    pub(crate) async fn submit_message(
        &self,
        event_name: String,
        data: String,
        last_event_id: Option<String>,
        origin: Url,
    ) {
        let permit = self.acquire_permit().await;
        self.send(
            DispatchItem::Message(QueuedMessage {
                event_name,
                data,
                last_event_id,
                origin,
            }),
            permit,
        );
    }

    /// Waits until every item submitted so far has been handled.
    pub(crate) async fn barrier(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let sent = self
            .tx
            .lock()
            .unwrap()
            .as_ref()
            .map(|tx| tx.send((DispatchItem::Barrier(done_tx), None)).is_ok())
            .unwrap_or(false);
        if sent {
            let _ = done_rx.await;
        }
    }

    /// Closes the queue and waits (up to `timeout`) for the worker to
    /// drain and exit.
    pub(crate) async fn shutdown(&self, timeout: Duration) -> bool {
        self.tx.lock().unwrap().take();
        let handle = self.worker.lock().unwrap().take();
        match handle {
            Some(handle) => matches!(tokio::time::timeout(timeout, handle).await, Ok(Ok(()))),
            None => true,
        }
    }

    async fn run_worker(mut rx: mpsc::UnboundedReceiver<QueueEntry>, handler: Arc<dyn EventHandler>) {
        while let Some((item, _permit)) = rx.recv().await {
            match item {
                DispatchItem::Open => log_handler_result("on_open", handler.on_open().await),
                DispatchItem::Closed => log_handler_result("on_closed", handler.on_closed().await),
                DispatchItem::Comment(text) => {
                    log_handler_result("on_comment", handler.on_comment(&text).await)
                }
                DispatchItem::Error(err) => {
                    log_handler_result("on_error", handler.on_error(&err).await)
                }
                DispatchItem::Message(msg) => {
                    let event_name = msg.event_name;
                    let event = MessageEvent {
                        event_name: event_name.clone(),
                        data: MessageData::Buffered(msg.data),
                        last_event_id: msg.last_event_id,
                        origin: msg.origin,
                    };
                    log_handler_result(
                        "on_message",
                        handler.on_message(&event_name, event).await,
                    );
                }
                DispatchItem::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }
    }
}

/// Logs a handler error and swallows it — handler failures never
/// propagate to the stream worker.
pub(crate) fn log_handler_result(callback: &str, result: HandlerResult) {
    if let Err(error) = result {
        tracing::warn!(callback, %error, "event handler callback returned an error");
    }
}
