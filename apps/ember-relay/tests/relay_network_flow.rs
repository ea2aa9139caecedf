use std::time::Duration;

use ember_relay::{build_router, AppConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message},
};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn test_app(config: AppConfig) -> axum::Router {
    build_router(&config).expect("router should build")
}

async fn spawn_server(app: axum::Router) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener
        .local_addr()
        .expect("listener addr should be readable");
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("server should run without errors");
    });
    (addr, server)
}

async fn connect_ws(addr: std::net::SocketAddr, ip: &'static str) -> WsStream {
    let ws_url = format!("ws://{addr}/ws");
    let mut ws_request = ws_url
        .into_client_request()
        .expect("websocket request should build");
    ws_request
        .headers_mut()
        .insert("x-forwarded-for", http::HeaderValue::from_static(ip));
    let (socket, _response) = connect_async(ws_request)
        .await
        .expect("websocket handshake should succeed");
    socket
}

async fn send_event(socket: &mut WsStream, event_type: &str, data: Value) {
    let envelope = json!({"v": 1, "t": event_type, "d": data});
    socket
        .send(Message::text(envelope.to_string()))
        .await
        .expect("event should send");
}

async fn next_text_event(socket: &mut WsStream) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("event should arrive before timeout")
            .expect("event should be emitted")
            .expect("event should decode");
        match frame {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("event should be valid json");
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn next_event_of_type(socket: &mut WsStream, event_type: &str) -> Value {
    for _ in 0..8 {
        let event = next_text_event(socket).await;
        if event["t"] == event_type {
            return event;
        }
    }
    panic!("expected event type {event_type}");
}

#[tokio::test]
async fn room_flow_relays_chat_typing_and_presence() {
    let app = test_app(AppConfig::default());
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.10").await;
    send_event(&mut alice, "join", json!({"room": "abc123", "nick": "Alice"})).await;
    let presence = next_event_of_type(&mut alice, "presence").await;
    assert_eq!(presence["d"]["count"], 1);

    let mut bob = connect_ws(addr, "203.0.113.11").await;
    send_event(&mut bob, "join", json!({"room": "abc123", "nick": "Bob"})).await;

    let joined = next_event_of_type(&mut alice, "system").await;
    assert_eq!(joined["d"], "Bob joined");
    let presence = next_event_of_type(&mut alice, "presence").await;
    assert_eq!(presence["d"]["count"], 2);
    let presence = next_event_of_type(&mut bob, "presence").await;
    assert_eq!(presence["d"]["count"], 2);

    send_event(
        &mut alice,
        "msg",
        json!({"text": "hello room", "clientId": "c-7"}),
    )
    .await;

    let ack = next_event_of_type(&mut alice, "msg:ack").await;
    assert_eq!(ack["d"]["clientId"], "c-7");
    assert_eq!(ack["d"]["nick"], "Alice");
    assert!(ack["d"]["id"].as_str().is_some_and(|id| !id.is_empty()));

    let relayed = next_event_of_type(&mut bob, "msg").await;
    assert_eq!(relayed["d"]["text"], "hello room");
    assert_eq!(relayed["d"]["nick"], "Alice");
    assert_eq!(relayed["d"]["id"], ack["d"]["id"]);

    send_event(&mut bob, "typing", json!({})).await;
    let typing = next_event_of_type(&mut alice, "typing").await;
    assert_eq!(typing["d"]["nick"], "Bob");

    send_event(&mut bob, "stop-typing", json!({})).await;
    let stopped = next_event_of_type(&mut alice, "stop-typing").await;
    assert_eq!(stopped["d"]["nick"], "Bob");

    alice.close(None).await.expect("socket close should succeed");
    let left = next_event_of_type(&mut bob, "system").await;
    assert_eq!(left["d"], "Alice left");
    let presence = next_event_of_type(&mut bob, "presence").await;
    assert_eq!(presence["d"]["count"], 1);

    server.abort();
}

#[tokio::test]
async fn late_joiner_receives_history_replay() {
    let app = test_app(AppConfig::default());
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.20").await;
    send_event(&mut alice, "join", json!({"room": "hist01", "nick": "Alice"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;

    send_event(&mut alice, "msg", json!({"text": "first"})).await;
    send_event(&mut alice, "msg", json!({"text": "second"})).await;
    let _ = next_event_of_type(&mut alice, "msg:ack").await;
    let _ = next_event_of_type(&mut alice, "msg:ack").await;

    let mut bob = connect_ws(addr, "203.0.113.21").await;
    send_event(&mut bob, "join", json!({"room": "hist01", "nick": "Bob"})).await;

    let history = next_event_of_type(&mut bob, "history").await;
    let items = history["d"].as_array().expect("history should be a list");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["text"], "first");
    assert_eq!(items[1]["text"], "second");

    server.abort();
}

#[tokio::test]
async fn chat_throttle_sends_notice_instead_of_relaying() {
    let app = test_app(AppConfig {
        chat_messages_per_window: 3,
        chat_window: Duration::from_secs(30),
        ..AppConfig::default()
    });
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.30").await;
    send_event(&mut alice, "join", json!({"room": "limit1", "nick": "Alice"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;

    for n in 0..4 {
        send_event(&mut alice, "msg", json!({"text": format!("msg {n}")})).await;
    }

    for _ in 0..3 {
        let _ = next_event_of_type(&mut alice, "msg:ack").await;
    }
    let notice = next_event_of_type(&mut alice, "system").await;
    assert_eq!(notice["d"], "You are sending messages too quickly. Slow down.");

    server.abort();
}

#[tokio::test]
async fn throttled_message_never_enters_history() {
    let app = test_app(AppConfig {
        chat_messages_per_window: 2,
        chat_window: Duration::from_secs(30),
        ..AppConfig::default()
    });
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.35").await;
    send_event(&mut alice, "join", json!({"room": "limit2", "nick": "Alice"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;

    for n in 0..3 {
        send_event(&mut alice, "msg", json!({"text": format!("msg {n}")})).await;
    }
    let _ = next_event_of_type(&mut alice, "msg:ack").await;
    let _ = next_event_of_type(&mut alice, "msg:ack").await;
    let _ = next_event_of_type(&mut alice, "system").await;

    let mut bob = connect_ws(addr, "203.0.113.36").await;
    send_event(&mut bob, "join", json!({"room": "limit2", "nick": "Bob"})).await;
    let history = next_event_of_type(&mut bob, "history").await;
    let items = history["d"].as_array().expect("history should be a list");
    assert_eq!(items.len(), 2);

    server.abort();
}

#[tokio::test]
async fn chunk_throttle_drops_with_one_notice_and_resumes_after_reset() {
    let app = test_app(AppConfig {
        file_chunks_per_window: 2,
        file_chunk_window: Duration::from_secs(1),
        ..AppConfig::default()
    });
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.90").await;
    send_event(&mut alice, "join", json!({"room": "chunks1", "nick": "Alice"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;
    let mut bob = connect_ws(addr, "203.0.113.91").await;
    send_event(&mut bob, "join", json!({"room": "chunks1", "nick": "Bob"})).await;
    let _ = next_event_of_type(&mut bob, "presence").await;
    let _ = next_event_of_type(&mut alice, "presence").await;

    for seq in 0..4 {
        send_event(
            &mut alice,
            "file-chunk",
            json!({"fileId": "f1", "seq": seq, "chunk": "aGk="}),
        )
        .await;
    }

    // Only the in-budget chunks reach the room.
    for seq in 0..2 {
        let chunk = next_event_of_type(&mut bob, "file-chunk").await;
        assert_eq!(chunk["d"]["seq"], seq);
    }
    // One notice for the whole violation window, not one per drop.
    let notice = next_event_of_type(&mut alice, "system").await;
    assert_eq!(notice["d"], "You are sending file chunks too quickly. Slow down.");

    tokio::time::sleep(Duration::from_millis(1300)).await;
    send_event(
        &mut alice,
        "file-chunk",
        json!({"fileId": "f1", "seq": 9, "chunk": "aGk="}),
    )
    .await;
    let resumed = next_event_of_type(&mut bob, "file-chunk").await;
    assert_eq!(resumed["d"]["seq"], 9);

    // The next thing Alice sees is her own ack, so no second notice
    // was queued behind the first.
    send_event(&mut alice, "msg", json!({"text": "done"})).await;
    let next = next_text_event(&mut alice).await;
    assert_eq!(next["t"], "msg:ack");

    server.abort();
}

#[tokio::test]
async fn file_transfer_relays_meta_chunks_and_done() {
    let app = test_app(AppConfig::default());
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.40").await;
    send_event(&mut alice, "join", json!({"room": "files1", "nick": "Alice"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;
    let mut bob = connect_ws(addr, "203.0.113.41").await;
    send_event(&mut bob, "join", json!({"room": "files1", "nick": "Bob"})).await;
    let _ = next_event_of_type(&mut bob, "presence").await;

    send_event(
        &mut alice,
        "file-meta",
        json!({"meta": {"id": "f1", "name": "notes.txt", "size": 2048, "type": "text/plain"}}),
    )
    .await;
    let meta = next_event_of_type(&mut bob, "file-meta").await;
    assert_eq!(meta["d"]["from"], "Alice");
    assert_eq!(meta["d"]["meta"]["id"], "f1");
    assert_eq!(meta["d"]["meta"]["type"], "text/plain");

    send_event(
        &mut alice,
        "file-chunk",
        json!({"fileId": "f1", "seq": 0, "chunk": "aGVsbG8="}),
    )
    .await;
    let chunk = next_event_of_type(&mut bob, "file-chunk").await;
    assert_eq!(chunk["d"]["fileId"], "f1");
    assert_eq!(chunk["d"]["seq"], 0);
    assert_eq!(chunk["d"]["chunk"], "aGVsbG8=");

    send_event(&mut alice, "file-done", json!({"fileId": "f1"})).await;
    let done = next_event_of_type(&mut bob, "file-done").await;
    assert_eq!(done["d"]["fileId"], "f1");
    assert_eq!(done["d"]["from"], "Alice");

    server.abort();
}

#[tokio::test]
async fn oversized_file_meta_is_rejected_with_notice() {
    let app = test_app(AppConfig::default());
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.50").await;
    send_event(&mut alice, "join", json!({"room": "files2", "nick": "Alice"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;
    let mut bob = connect_ws(addr, "203.0.113.51").await;
    send_event(&mut bob, "join", json!({"room": "files2", "nick": "Bob"})).await;
    let _ = next_event_of_type(&mut bob, "presence").await;
    // Drain Alice's join notifications so the next system event she
    // sees is the rejection notice.
    let _ = next_event_of_type(&mut alice, "presence").await;

    let oversize = 51_u64 * 1024 * 1024;
    send_event(
        &mut alice,
        "file-meta",
        json!({"meta": {"id": "huge", "name": "huge.bin", "size": oversize, "type": "application/octet-stream"}}),
    )
    .await;
    let notice = next_event_of_type(&mut alice, "system").await;
    assert_eq!(notice["d"], "File too large to relay.");

    // A follow-up marker is the next thing Bob sees; the rejected
    // announcement never reached him.
    send_event(&mut alice, "file-done", json!({"fileId": "huge"})).await;
    let next = next_event_of_type(&mut bob, "file-done").await;
    assert_eq!(next["d"]["fileId"], "huge");

    server.abort();
}

#[tokio::test]
async fn switching_rooms_notifies_both_rooms() {
    let app = test_app(AppConfig::default());
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.60").await;
    send_event(&mut alice, "join", json!({"room": "room-a", "nick": "Alice"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;
    let mut bob = connect_ws(addr, "203.0.113.61").await;
    send_event(&mut bob, "join", json!({"room": "room-a", "nick": "Bob"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;
    let _ = next_event_of_type(&mut bob, "presence").await;

    send_event(&mut bob, "join", json!({"room": "room-b", "nick": "Bob"})).await;

    let left = next_event_of_type(&mut alice, "system").await;
    assert_eq!(left["d"], "Bob left");
    let presence = next_event_of_type(&mut alice, "presence").await;
    assert_eq!(presence["d"]["count"], 1);
    let presence = next_event_of_type(&mut bob, "presence").await;
    assert_eq!(presence["d"]["count"], 1);

    server.abort();
}

#[tokio::test]
async fn malformed_frames_are_dropped_without_disconnect() {
    let app = test_app(AppConfig::default());
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.70").await;
    send_event(&mut alice, "join", json!({"room": "tough1", "nick": "Alice"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;

    alice
        .send(Message::text("this is not json"))
        .await
        .expect("frame should send");
    alice
        .send(Message::text(r#"{"v": 99, "t": "msg", "d": {}}"#))
        .await
        .expect("frame should send");
    alice
        .send(Message::text(r#"{"v": 1, "t": "no-such-event", "d": {}}"#))
        .await
        .expect("frame should send");

    // Connection survives the junk and keeps serving events.
    send_event(&mut alice, "msg", json!({"text": "still here"})).await;
    let ack = next_event_of_type(&mut alice, "msg:ack").await;
    assert_eq!(ack["d"]["text"], "still here");

    server.abort();
}

#[tokio::test]
async fn long_chat_text_is_truncated() {
    let app = test_app(AppConfig {
        max_text_chars: 10,
        ..AppConfig::default()
    });
    let (addr, server) = spawn_server(app).await;

    let mut alice = connect_ws(addr, "203.0.113.80").await;
    send_event(&mut alice, "join", json!({"room": "trunc1", "nick": "Alice"})).await;
    let _ = next_event_of_type(&mut alice, "presence").await;

    send_event(&mut alice, "msg", json!({"text": "0123456789abcdef"})).await;
    let ack = next_event_of_type(&mut alice, "msg:ack").await;
    assert_eq!(ack["d"]["text"], "0123456789");

    server.abort();
}
