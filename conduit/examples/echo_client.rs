//! Minimal echo client: sends a handful of lines to an
//! [`echo_server`](../echo_server.rs) and prints what comes back.
//!
//! Run with `cargo run --example echo_client -- 127.0.0.1 9000`.

use conduit::{EndpointConfig, Handler, Message};
use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    conduit::dev_tracing::init_tracing();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().and_then(|s| s.parse().ok()).unwrap_or(9000);

    let handler = Handler::new(None);
    let (_id, client) = handler
        .create_client_endpoint(EndpointConfig::default().with_no_delay(true))
        .expect("handler is active");

    let received = Arc::new(AtomicUsize::new(0));
    let received2 = received.clone();
    client.on_message(move |_channel, msg| {
        println!("< {}", msg.as_str().unwrap_or("<binary>"));
        received2.fetch_add(1, Ordering::SeqCst);
    });

    client.connect(&host, port).expect("failed to connect");

    let lines = ["hello", "from", "conduit"];
    for line in lines {
        println!("> {line}");
        client.write(Message::from_str(line)).expect("endpoint is active");
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while received.load(Ordering::SeqCst) < lines.len() && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    client.close();
}
