//! End-to-end scenarios exercising a real `Handler` + `ServerEndpoint` +
//! `ClientEndpoint` pair over loopback TCP.

use conduit::{EndpointConfig, Handler, Message};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn bound_server(handler: &Arc<Handler>) -> (Arc<conduit::ServerEndpoint>, u16) {
    let (_id, server) = handler
        .create_server_endpoint(EndpointConfig::default().with_no_delay(true))
        .unwrap();
    let port = portpicker::pick_unused_port().expect("no free port");
    server.bind_and_listen(port).unwrap();
    (server, port)
}

fn connected_client(handler: &Arc<Handler>, port: u16) -> Arc<conduit::ClientEndpoint> {
    let (_id, client) = handler
        .create_client_endpoint(EndpointConfig::default().with_no_delay(true))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || client.connect("127.0.0.1", port).is_ok()));
    client
}

#[test]
fn echo_roundtrip() {
    let handler = Handler::new(Some(2));
    let (server, port) = bound_server(&handler);
    server.on_message(|channel, msg| channel.queue_write(msg.clone()));

    let client = connected_client(&handler, port);
    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();
    client.on_message(move |_, msg| received2.lock().unwrap().extend_from_slice(msg.as_slice()));

    client.write(Message::from_str("ping")).unwrap();
    assert!(wait_until(Duration::from_secs(2), || !received.lock().unwrap().is_empty()));
    assert_eq!(received.lock().unwrap().as_slice(), b"ping");
}

#[test]
fn graceful_peer_close_marks_the_channel_closing() {
    let handler = Handler::new(Some(2));
    let (server, port) = bound_server(&handler);

    let client = connected_client(&handler, port);
    assert!(wait_until(Duration::from_secs(1), || server.client_count() == 1));

    client.close();

    assert!(wait_until(Duration::from_secs(2), || server.client_count() == 0));
}

#[test]
fn large_write_is_split_across_multiple_sends() {
    let handler = Handler::new(Some(2));
    let (server, port) = bound_server(&handler);
    server.on_message(|channel, msg| channel.queue_write(msg.clone()));

    // Small buffer forces the payload across many `recv`/`send` ticks.
    let (_id, client) = handler
        .create_client_endpoint(EndpointConfig::default().with_buffer_size(16))
        .unwrap();
    assert!(wait_until(Duration::from_secs(2), || client.connect("127.0.0.1", port).is_ok()));

    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let received2 = received.clone();
    client.on_message(move |_, msg| received2.lock().unwrap().extend_from_slice(msg.as_slice()));

    let payload = vec![7u8; 8192];
    client.write(Message::from_vec(payload.clone())).unwrap();

    assert!(wait_until(Duration::from_secs(5), || received.lock().unwrap().len() == payload.len()));
    assert_eq!(received.lock().unwrap().as_slice(), payload.as_slice());
}

#[test]
fn a_panicking_listener_does_not_take_down_other_subscribers() {
    let handler = Handler::new(Some(2));
    let (server, port) = bound_server(&handler);

    let survived = Arc::new(AtomicBool::new(false));
    let survived2 = survived.clone();
    server.on_message(|_channel, _msg| panic!("listener exploded"));
    server.on_message(move |_channel, _msg| {
        survived2.store(true, Ordering::SeqCst);
    });

    let client = connected_client(&handler, port);
    client.write(Message::from_str("trigger")).unwrap();

    assert!(wait_until(Duration::from_secs(2), || survived.load(Ordering::SeqCst)));
}

#[test]
fn many_threads_writing_concurrently_all_arrive() {
    let handler = Handler::new(Some(2));
    let (server, port) = bound_server(&handler);

    let received_count = Arc::new(AtomicUsize::new(0));
    let received_count2 = received_count.clone();
    server.on_message(move |_channel, _msg| {
        received_count2.fetch_add(1, Ordering::SeqCst);
    });

    let client = connected_client(&handler, port);
    let writers: Vec<_> = (0..8)
        .map(|i| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                for n in 0..20 {
                    client.write(Message::from_str(&format!("w{i}-{n}"))).unwrap();
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }

    assert!(wait_until(Duration::from_secs(3), || received_count.load(Ordering::SeqCst) == 160));
}

#[test]
fn handler_shutdown_while_logger_is_still_draining() {
    let handler = Handler::new(Some(2));
    handler.set_debug_enabled(true);
    let (server, port) = bound_server(&handler);

    let received_count = Arc::new(AtomicUsize::new(0));
    let received_count2 = received_count.clone();
    server.on_message(move |_channel, _msg| {
        received_count2.fetch_add(1, Ordering::SeqCst);
    });

    let client = connected_client(&handler, port);
    for _ in 0..50 {
        client.write(Message::from_str("flood")).unwrap();
    }

    // Close the client immediately after issuing the writes: its outbound
    // queue is very likely still holding some of the 50 flood messages,
    // unsent. `ClientEndpoint::close` must drain that queue before tearing
    // the channel down, so every message should still reach the server.
    client.close();
    assert!(wait_until(Duration::from_secs(2), || received_count.load(Ordering::SeqCst) == 50));

    // Shutting down the whole handler afterwards exercises the logger's
    // backlog of Debug records describing those ticks draining too.
    handler.shutdown();
    assert!(!handler.is_active());
}
