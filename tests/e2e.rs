use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use httpmock::MockServer;
use sse_client::{
    ClientBuilder, ConnectionErrorHandler, ErrorAction, EventHandler, ExpectField, HandlerResult,
    MessageEvent, SseError,
};

/// Surfaces the crate's `tracing` output (connection lifecycle, swallowed
/// handler errors) under `cargo test -- --nocapture`; silent otherwise.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default)]
struct CollectingHandler {
    opens: Mutex<usize>,
    closes: Mutex<usize>,
    messages: Mutex<Vec<(String, String, Option<String>)>>,
    comments: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for CollectingHandler {
    async fn on_open(&self) -> HandlerResult {
        *self.opens.lock().unwrap() += 1;
        Ok(())
    }

    async fn on_closed(&self) -> HandlerResult {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }

    async fn on_message(&self, event_name: &str, event: MessageEvent<'_>) -> HandlerResult {
        let last_event_id = event.last_event_id.clone();
        let data = event.data.into_string().await?;
        self.messages
            .lock()
            .unwrap()
            .push((event_name.to_string(), data, last_event_id));
        Ok(())
    }

    async fn on_comment(&self, text: &str) -> HandlerResult {
        self.comments.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn on_error(&self, error: &SseError) -> HandlerResult {
        self.errors.lock().unwrap().push(error.to_string());
        Ok(())
    }
}

/// Lets a fixed number of connection errors proceed to a normal reconnect,
/// then shuts the client down on the next one. Keeps these tests bounded
/// to exactly as many attempts as each scenario needs.
struct ShutdownAfter {
    remaining_proceeds: Mutex<usize>,
}

impl ShutdownAfter {
    fn new(proceeds: usize) -> Self {
        Self {
            remaining_proceeds: Mutex::new(proceeds),
        }
    }
}

#[async_trait]
impl ConnectionErrorHandler for ShutdownAfter {
    async fn on_connection_error(&self, _error: &SseError) -> ErrorAction {
        let mut remaining = self.remaining_proceeds.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            ErrorAction::Proceed
        } else {
            ErrorAction::Shutdown
        }
    }
}

#[tokio::test]
async fn basic_events_and_comments_are_delivered_in_order() {
    init_tracing();
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/sse");
            then.status(200).header("content-type", "text/event-stream").body(
                "data: foo\n\n\
                 data: foo\ndata: bar\ndata: baz\n\n\
                 event: coin\ndata: prout\n\n\
                 event: foo\n\n\
                 :\n\n\
                 id: plop\nretry: 12342\n\n\
                 data:\n\n\
                 nodata\n\n\
                 data: asdsadsadsasadsad\n\n",
            );
        })
        .await;

    let handler = Arc::new(CollectingHandler::default());
    let client = ClientBuilder::new(url::Url::parse(&server.url("/sse")).unwrap())
        .build_with_error_handler(handler.clone(), Arc::new(ShutdownAfter::new(0)))
        .unwrap();
    client.start();
    assert!(client.await_closed(Duration::from_secs(5)).await);

    mock.assert_async().await;
    assert_eq!(
        *handler.messages.lock().unwrap(),
        vec![
            ("message".to_string(), "foo".to_string(), None),
            ("message".to_string(), "foo\nbar\nbaz".to_string(), None),
            ("coin".to_string(), "prout".to_string(), None),
            ("message".to_string(), String::new(), None),
            ("message".to_string(), "asdsadsadsasadsad".to_string(), None),
        ]
    );
    assert_eq!(*handler.comments.lock().unwrap(), vec![String::new()]);
    assert_eq!(*handler.opens.lock().unwrap(), 1);
    assert_eq!(*handler.closes.lock().unwrap(), 1);
}

#[tokio::test]
async fn last_event_id_is_replayed_on_reconnect() {
    init_tracing();
    let server = MockServer::start_async().await;
    // Tags each outgoing request with its attempt number via a query
    // parameter, so the two mocks below can't both match the same
    // request regardless of header-matching quirks.
    let attempt = Arc::new(Mutex::new(0u32));
    let first = server
        .mock_async(|when, then| {
            when.method("GET").path("/sse").query_param("attempt", "1");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("id: 1\ndata: first\n\n");
        })
        .await;
    let second = server
        .mock_async(|when, then| {
            when.method("GET")
                .path("/sse")
                .query_param("attempt", "2")
                .header("last-event-id", "1");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: second\n\n");
        })
        .await;

    let handler = Arc::new(CollectingHandler::default());
    let client = ClientBuilder::new(url::Url::parse(&server.url("/sse")).unwrap())
        .reconnect_time(Duration::from_millis(5))
        .max_reconnect_time(Duration::from_millis(20))
        .request_transformer(move |mut request| {
            let mut n = attempt.lock().unwrap();
            *n += 1;
            request
                .url_mut()
                .query_pairs_mut()
                .append_pair("attempt", &n.to_string());
            request
        })
        .build_with_error_handler(handler.clone(), Arc::new(ShutdownAfter::new(1)))
        .unwrap();
    client.start();
    assert!(client.await_closed(Duration::from_secs(5)).await);

    first.assert_hits_async(1).await;
    second.assert_hits_async(1).await;
    assert_eq!(
        *handler.messages.lock().unwrap(),
        vec![
            ("message".to_string(), "first".to_string(), Some("1".to_string())),
            ("message".to_string(), "second".to_string(), Some("1".to_string())),
        ]
    );
}

#[tokio::test]
async fn streaming_mode_falls_back_to_buffered_when_expect_fields_unmet() {
    init_tracing();
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/sse");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: chunk1\nevent: big\n\n");
        })
        .await;

    let handler = Arc::new(CollectingHandler::default());
    let client = ClientBuilder::new(url::Url::parse(&server.url("/sse")).unwrap())
        .stream_event_data(true)
        .expect_fields([ExpectField::Event])
        .build_with_error_handler(handler.clone(), Arc::new(ShutdownAfter::new(0)))
        .unwrap();
    client.start();
    assert!(client.await_closed(Duration::from_secs(5)).await);

    mock.assert_async().await;
    assert_eq!(
        *handler.messages.lock().unwrap(),
        vec![("big".to_string(), "chunk1".to_string(), None)]
    );
}

#[tokio::test]
async fn unsuccessful_response_then_reconnect_recovers() {
    init_tracing();
    let server = MockServer::start_async().await;
    let attempt = Arc::new(Mutex::new(0u32));
    let failing = server
        .mock_async(|when, then| {
            when.method("GET").path("/sse").query_param("attempt", "1");
            then.status(500);
        })
        .await;
    let recovering = server
        .mock_async(|when, then| {
            when.method("GET").path("/sse").query_param("attempt", "2");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body("data: ok\n\n");
        })
        .await;

    let handler = Arc::new(CollectingHandler::default());
    let client = ClientBuilder::new(url::Url::parse(&server.url("/sse")).unwrap())
        .reconnect_time(Duration::from_millis(5))
        .max_reconnect_time(Duration::from_millis(20))
        .request_transformer(move |mut request| {
            let mut n = attempt.lock().unwrap();
            *n += 1;
            request
                .url_mut()
                .query_pairs_mut()
                .append_pair("attempt", &n.to_string());
            request
        })
        .build_with_error_handler(handler.clone(), Arc::new(ShutdownAfter::new(1)))
        .unwrap();
    client.start();
    assert!(client.await_closed(Duration::from_secs(5)).await);

    failing.assert_hits_async(1).await;
    recovering.assert_hits_async(1).await;
    assert_eq!(handler.errors.lock().unwrap().len(), 1);
    assert_eq!(*handler.opens.lock().unwrap(), 1);
    assert_eq!(
        *handler.messages.lock().unwrap(),
        vec![("message".to_string(), "ok".to_string(), None)]
    );
}

#[tokio::test]
async fn unsuccessful_response_reaches_on_error_unless_handler_shuts_down() {
    init_tracing();
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/sse");
            then.status(500);
        })
        .await;

    let handler = Arc::new(CollectingHandler::default());
    let client = ClientBuilder::new(url::Url::parse(&server.url("/sse")).unwrap())
        .reconnect_time(Duration::from_millis(5))
        .max_reconnect_time(Duration::from_millis(20))
        .build_with_error_handler(handler.clone(), Arc::new(ShutdownAfter::new(1)))
        .unwrap();
    client.start();
    assert!(client.await_closed(Duration::from_secs(5)).await);

    mock.assert_hits_async(2).await;
    assert_eq!(handler.errors.lock().unwrap().len(), 1);
    assert_eq!(*handler.opens.lock().unwrap(), 0);
}

#[tokio::test]
async fn connection_error_handler_shutdown_suppresses_on_error() {
    init_tracing();
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method("GET").path("/sse");
            then.status(500);
        })
        .await;

    let handler = Arc::new(CollectingHandler::default());
    let client = ClientBuilder::new(url::Url::parse(&server.url("/sse")).unwrap())
        .build_with_error_handler(handler.clone(), Arc::new(ShutdownAfter::new(0)))
        .unwrap();
    client.start();
    assert!(client.await_closed(Duration::from_secs(5)).await);

    mock.assert_hits_async(1).await;
    assert!(handler.errors.lock().unwrap().is_empty());
}
