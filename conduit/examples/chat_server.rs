//! Broadcast chat server: a message from one client is fanned out to every
//! other connected client.
//!
//! Run with `cargo run --example chat_server -- 9001`, then connect
//! several `nc 127.0.0.1 9001` sessions.

use conduit::{EndpointConfig, Handler};
use std::env;
use std::sync::Arc;

fn main() {
    conduit::dev_tracing::init_tracing();

    let port: u16 = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9001);

    let handler = Handler::new(None);
    let (_id, server) = handler
        .create_server_endpoint(EndpointConfig::default().with_no_delay(true))
        .expect("handler is active");
    let server_for_broadcast = Arc::clone(&server);

    server.on_message(move |channel, msg| {
        let from = channel.client_descriptor();
        for fd in server_for_broadcast.client_descriptors() {
            if fd != from {
                let _ = server_for_broadcast.write(fd, msg.clone());
            }
        }
    });

    server.bind_and_listen(port).expect("failed to bind");
    println!("chat relay on port {port}, press Ctrl+C to stop");

    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}
