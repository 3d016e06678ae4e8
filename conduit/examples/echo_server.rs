//! Minimal echo server: every message read from a client is written back
//! to that same client.
//!
//! Run with `cargo run --example echo_server -- 9000`, then connect with
//! `nc 127.0.0.1 9000`.

use conduit::{EndpointConfig, Handler};
use std::env;

fn main() {
    conduit::dev_tracing::init_tracing();

    let port: u16 = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9000);

    let handler = Handler::new(None);
    let (_id, server) = handler
        .create_server_endpoint(EndpointConfig::default().with_no_delay(true))
        .expect("handler is active");

    server.on_connect(|channel, connected| {
        let peer = channel.peer_addr().map(|a| a.to_string()).unwrap_or_default();
        println!("{peer} {}", if connected { "connected" } else { "disconnected" });
    });

    server.on_message(|channel, msg| {
        channel.queue_write(msg.clone());
    });

    server.bind_and_listen(port).expect("failed to bind");
    println!("echoing on port {port}, press Ctrl+C to stop");

    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
