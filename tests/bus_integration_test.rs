//! Integration tests for the bus against a loopback WebSocket server.
//!
//! Each test binds its own listener on an ephemeral port and plays the
//! server side by hand, so frame ordering and timing are fully controlled.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use topicbus::commands::services::{self, ServiceStatus};
use topicbus::{Bus, BusConfig, BusError, ConnectionState, Reply};

type ServerSocket = WebSocketStream<TcpStream>;

/// Bind a listener and return it with the endpoint a bus should use.
async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, endpoint)
}

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Read the next text frame as JSON.
async fn read_frame(socket: &mut ServerSocket) -> Value {
    loop {
        let msg = socket.next().await.unwrap().unwrap();
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

async fn write_frame(socket: &mut ServerSocket, frame: Value) {
    socket.send(Message::text(frame.to_string())).await.unwrap();
}

fn lenient(endpoint: &str) -> BusConfig {
    let mut config = BusConfig::with_endpoint(endpoint);
    config.accept_missing_value = true;
    config
}

/// Poll `check` until it holds or a second has passed.
async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 1s");
}

#[tokio::test]
async fn test_send_before_open_is_transmitted_once() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    bus.send("greet", "hello");
    assert!(!bus.is_ready());

    let mut socket = accept(&listener).await;
    let frame = read_frame(&mut socket).await;
    assert_eq!(
        frame,
        json!({"topic": "greet", "code": "payload", "value": "hello"})
    );
    assert!(bus.is_ready());

    // Nothing else follows.
    let extra = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(extra.is_err());
}

#[tokio::test]
async fn test_queued_sends_keep_order() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    for i in 0..5 {
        bus.send("seq", i);
    }

    let mut socket = accept(&listener).await;
    for i in 0..5 {
        assert_eq!(read_frame(&mut socket).await["value"], json!(i));
    }

    // Once open, sends go straight through.
    bus.send("seq", 5);
    assert_eq!(read_frame(&mut socket).await["value"], json!(5));
}

#[tokio::test]
async fn test_request_callback_fires_once() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    bus.request("ping", "x", move |code, value| {
        sink.lock().unwrap().push((code.to_string(), value.clone()));
    });

    let mut socket = accept(&listener).await;
    let request = read_frame(&mut socket).await;
    assert_eq!(request["topic"], "ping");
    assert_eq!(request["value"], "x");

    for _ in 0..2 {
        write_frame(
            &mut socket,
            json!({"topic": "ping", "code": "payload", "value": "pong"}),
        )
        .await;
    }

    eventually(|| !calls.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(
        *calls.lock().unwrap(),
        vec![("payload".to_string(), json!("pong"))]
    );
    assert!(bus.registry().is_empty());
}

#[tokio::test]
async fn test_call_round_trip_leaves_no_subscription() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let request = read_frame(&mut socket).await;
        write_frame(
            &mut socket,
            json!({"topic": request["topic"], "code": "payload", "value": "Debian 12 x86_64"}),
        )
        .await;
        socket
    });

    let reply = bus.call("node-info", "node-info").await.unwrap();
    assert_eq!(
        reply,
        Reply {
            code: "payload".to_string(),
            value: json!("Debian 12 x86_64"),
        }
    );
    assert!(bus.registry().is_empty());

    drop(server.await.unwrap());
}

#[tokio::test]
async fn test_call_dropped_by_timeout_unsubscribes() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let _ = read_frame(&mut socket).await;
        // Never answer.
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let result = tokio::time::timeout(Duration::from_millis(200), bus.call("slow", "x")).await;
    assert!(result.is_err());
    assert!(bus.registry().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_stream_ends_on_end_frame_without_value() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(lenient(&endpoint));

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let request = read_frame(&mut socket).await;
        let topic = request["topic"].clone();
        for line in ["Downloading", "Installing"] {
            write_frame(
                &mut socket,
                json!({"topic": topic, "code": "payload", "value": line}),
            )
            .await;
        }
        write_frame(&mut socket, json!({"topic": topic, "code": "end"})).await;
        socket
    });

    let replies = bus.stream("gameap-install", "gameap-install").collect().await;
    let values: Vec<_> = replies.iter().map(Reply::value_text).collect();
    assert_eq!(values, vec!["Downloading", "Installing"]);
    assert!(bus.registry().is_empty());

    drop(server.await.unwrap());
}

#[tokio::test]
async fn test_server_close_reaches_close_handler_and_pending_calls() {
    let (listener, endpoint) = listen().await;

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reasons);
    let bus = Bus::builder(BusConfig::with_endpoint(&endpoint))
        .on_close(move |reason| sink.lock().unwrap().push(reason))
        .connect();

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let _ = read_frame(&mut socket).await;
        socket.close(None).await.unwrap();
        // Drain until the client acknowledges.
        while let Some(Ok(_)) = socket.next().await {}
    });

    let pending = bus.call("service-gameap-status", "service-status gameap").await;
    assert_eq!(pending, Err(BusError::Closed));

    bus.closed().await;
    assert_eq!(bus.state(), ConnectionState::Closed);
    eventually(|| reasons.lock().unwrap().len() == 1).await;

    // Later calls fail straight away.
    assert_eq!(bus.call("node-info", "node-info").await, Err(BusError::Closed));
    assert!(bus.registry().is_empty());

    server.await.unwrap();
}

#[tokio::test]
async fn test_malformed_frames_do_not_disturb_delivery() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    bus.subscribe("service-nginx-status", move |_, code, value| {
        assert_eq!(code, "payload");
        assert_eq!(value, &json!("active"));
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut socket = accept(&listener).await;
    socket.send(Message::text("not json")).await.unwrap();
    write_frame(&mut socket, json!({"code": "payload", "value": 1})).await;
    write_frame(&mut socket, json!(["service-nginx-status"])).await;
    write_frame(
        &mut socket,
        json!({"topic": "service-nginx-status", "code": "payload", "value": "active"}),
    )
    .await;

    eventually(|| received.load(Ordering::SeqCst) == 1).await;
    assert!(bus.is_ready());
}

#[tokio::test]
async fn test_fan_out_to_every_subscriber() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let order = Arc::clone(&order);
        bus.subscribe("status", move |_, _, value| {
            order.lock().unwrap().push((name, value.clone()));
        });
    }

    let mut socket = accept(&listener).await;
    write_frame(
        &mut socket,
        json!({"topic": "status", "code": "payload", "value": 7}),
    )
    .await;

    eventually(|| order.lock().unwrap().len() == 2).await;
    assert_eq!(
        *order.lock().unwrap(),
        vec![("first", json!(7)), ("second", json!(7))]
    );
}

#[tokio::test]
async fn test_exit_sends_exit_topic() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    bus.exit();

    let mut socket = accept(&listener).await;
    let frame = read_frame(&mut socket).await;
    assert_eq!(frame["topic"], "exit");
    assert_eq!(frame["code"], "payload");

    socket.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), bus.closed())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_client_close_sends_close_frame() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    let mut socket = accept(&listener).await;
    bus.wait_ready().await.unwrap();
    bus.close();

    let msg = socket.next().await.unwrap().unwrap();
    assert!(msg.is_close());
    bus.closed().await;
    assert_eq!(bus.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_service_status_queries_run_concurrently() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(lenient(&endpoint));

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        // Collect every request first so all five must be in flight at once.
        let mut requests = Vec::new();
        for _ in 0..services::SERVICES.len() {
            requests.push(read_frame(&mut socket).await);
        }
        // Answer in reverse to show replies are matched by topic.
        for request in requests.into_iter().rev() {
            let topic = request["topic"].clone();
            let reply = match request["value"].as_str().unwrap() {
                "service-status gameap" => json!({"topic": topic, "code": "payload", "value": "active"}),
                "service-status gameap-daemon" => {
                    json!({"topic": topic, "code": "payload", "value": "inactive"})
                }
                "service-status nginx" => {
                    json!({"topic": topic, "code": "payload", "value": "not found"})
                }
                "service-status mysql" => {
                    json!({"topic": topic, "code": "error", "value": "failed to get service status"})
                }
                // php-fpm never answers.
                _ => continue,
            };
            write_frame(&mut socket, reply).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    bus.wait_ready().await.unwrap();
    let reports = services::query_all(&bus, Duration::from_millis(500)).await;
    let statuses: Vec<_> = reports
        .iter()
        .map(|r| (r.name.as_str(), r.status.clone()))
        .collect();

    assert_eq!(
        statuses,
        vec![
            ("gameap", ServiceStatus::Active),
            ("gameap-daemon", ServiceStatus::Inactive),
            ("nginx", ServiceStatus::NotFound),
            (
                "mysql",
                ServiceStatus::Failed("failed to get service status".to_string())
            ),
            ("php-fpm", ServiceStatus::Failed("timed out".to_string())),
        ]
    );
    assert!(bus.registry().is_empty());

    server.abort();
}

#[tokio::test]
async fn test_dropping_bus_closes_socket_despite_callback_handle() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    let weak = bus.downgrade();
    bus.subscribe("ping", move |_, _, value| {
        if let Some(bus) = weak.upgrade() {
            bus.send("pong", value.clone());
        }
    });

    let mut socket = accept(&listener).await;
    bus.wait_ready().await.unwrap();

    // The callback can still reach the bus while a strong handle exists.
    write_frame(
        &mut socket,
        json!({"topic": "ping", "code": "payload", "value": 1}),
    )
    .await;
    assert_eq!(read_frame(&mut socket).await["topic"], "pong");

    drop(bus);

    let msg = tokio::time::timeout(Duration::from_secs(1), socket.next())
        .await
        .expect("server should see the connection close")
        .unwrap()
        .unwrap();
    assert!(msg.is_close());
}

#[tokio::test]
async fn test_strict_stream_ignores_end_without_value() {
    let (listener, endpoint) = listen().await;
    let bus = Bus::connect(BusConfig::with_endpoint(&endpoint));

    let server = tokio::spawn(async move {
        let mut socket = accept(&listener).await;
        let request = read_frame(&mut socket).await;
        let topic = request["topic"].clone();
        write_frame(
            &mut socket,
            json!({"topic": topic, "code": "payload", "value": "Installing"}),
        )
        .await;
        write_frame(&mut socket, json!({"topic": topic, "code": "end"})).await;
        socket
    });

    let mut replies = bus.stream("gameap-install", "gameap-install");
    assert_eq!(replies.next().await.unwrap().value_text(), "Installing");

    // The bare `end` is rejected, so the stream is still waiting.
    let pending = tokio::time::timeout(Duration::from_millis(200), replies.next()).await;
    assert!(pending.is_err());

    // Only the connection closing finishes it.
    let mut socket = server.await.unwrap();
    socket.close(None).await.unwrap();
    assert_eq!(replies.next().await, None);
}
