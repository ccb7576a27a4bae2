use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sse_client::{ClientBuilder, EventHandler, HandlerResult, MessageEvent};

struct Printer;

#[async_trait]
impl EventHandler for Printer {
    async fn on_message(&self, event_name: &str, event: MessageEvent<'_>) -> HandlerResult {
        if event_name == "message" {
            let data = event.data.into_string().await?;
            print!("{data} ");
            std::io::stdout().flush().ok();
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let client = ClientBuilder::parse("https://sse.test-free.online/api/story")
        .unwrap()
        .build(Arc::new(Printer))
        .unwrap();

    client.start();
    client.await_closed(Duration::from_secs(300)).await;
    println!();
}
