use std::error::Error;
use std::sync::Arc;

use household_stream::stream::client::StreamClient;
use household_stream::stream::proto::Event;
use household_stream::stream::providers::{MemorySubscriptionStore, StaticToken};
use household_stream::stream::session::{StreamListener, StreamSession};
use household_stream::StreamError;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;

struct PrintListener;

impl StreamListener for PrintListener {
    fn on_open(&mut self) {
        println!("connecting...");
    }

    fn on_event(&mut self, event: Event) {
        println!("{} {}", event.name, serde_json::Value::Object(event.payload));
    }

    fn on_close(&mut self, error: Option<StreamError>) {
        match error {
            Some(error) => println!("disconnected: {error}"),
            None => println!("disconnected"),
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let token = "REPLACE_WITH_ACCESS_TOKEN".to_string();
    let household_id = "REPLACE_WITH_HOUSEHOLD_ID".to_string();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = StreamClient::new()?
            .with_token_supplier(StaticToken::new(SecretString::new(token)));
        let store = Arc::new(MemorySubscriptionStore::with_subscription(
            household_id.clone(),
        ));

        let (session, mut updates) = StreamSession::spawn(client, store);
        session.connect(household_id)?;

        let mut listener = PrintListener;
        tokio::select! {
            _ = updates.deliver_to(&mut listener) => {}
            _ = tokio::signal::ctrl_c() => session.disconnect()?,
        }

        Ok::<(), Box<dyn Error>>(())
    })
}
