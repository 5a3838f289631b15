//! End-to-end tests against loopback fake-node WebSocket servers.
//!
//! Each test runs its own listener on a unique port and drives a real
//! client through connect, stats, disconnect, reconnect, and failover.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async, WebSocketStream};

use crooner::{Client, ClientIdentity, NodeDescriptor, NodeEvent, SocketOptions};

static PORT: AtomicU16 = AtomicU16::new(23100);

fn next_port() -> u16 {
    PORT.fetch_add(1, Ordering::SeqCst)
}

fn descriptor(name: &str, port: u16) -> NodeDescriptor {
    NodeDescriptor {
        name: name.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        password: "youshallnotpass".to_string(),
    }
}

fn fast_client() -> Client {
    Client::with_options(
        ClientIdentity {
            user_id: 506381097473310721,
            shard_count: 2,
        },
        SocketOptions {
            reconnect_delay: Duration::from_millis(50),
        },
    )
}

async fn listen(port: u16) -> TcpListener {
    TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("bind fake node")
}

async fn accept_one(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept");
    accept_async(stream).await.expect("websocket handshake")
}

fn stats_frame(playing: u32) -> String {
    json!({
        "op": "stats",
        "players": playing,
        "playingPlayers": playing,
        "cpu": {"cores": 4, "systemLoad": 0.1, "lavalinkLoad": 0.05},
        "memory": {"free": 1024, "used": 2048, "allocated": 4096, "reservable": 8192},
    })
    .to_string()
}

/// Poll until `condition` holds, panicking after `deadline`.
async fn wait_for(deadline: Duration, what: &str, mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        assert!(
            start.elapsed() < deadline,
            "timed out waiting for {what} after {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_handshake_headers_and_stats() {
    let port = next_port();
    let listener = listen(port).await;

    // Capture the handshake headers the client presents
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let mut ws = accept_hdr_async(stream, |request: &Request, response: Response| {
            let headers = request.headers();
            assert_eq!(headers["Authorization"], "youshallnotpass");
            assert_eq!(headers["Num-Shards"], "2");
            assert_eq!(headers["User-Id"], "506381097473310721");
            Ok::<_, ErrorResponse>(response)
        })
        .await
        .expect("websocket handshake");

        ws.send(Message::Text(stats_frame(3))).await.expect("send stats");
        // Hold the connection open until the test is done with it
        while ws.next().await.is_some() {}
    });

    let client = fast_client();
    let mut events = client.subscribe();
    let node = client.add_node(descriptor("nearby", port)).unwrap();

    wait_for(Duration::from_secs(5), "node health", || node.is_healthy()).await;
    wait_for(Duration::from_secs(5), "stats snapshot", || {
        node.stats().is_some()
    })
    .await;

    assert_eq!(node.stats().unwrap().playing_players, 3);
    assert!(node.penalty().is_finite());

    // Connected must precede StatsUpdated on the bus
    let mut saw_connected = false;
    loop {
        match events.recv().await.unwrap() {
            NodeEvent::Connected { node } => {
                assert_eq!(node, "nearby");
                saw_connected = true;
            }
            NodeEvent::StatsUpdated { node } => {
                assert_eq!(node, "nearby");
                assert!(saw_connected);
                break;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    client.shutdown();
    server.abort();
}

#[tokio::test]
async fn test_send_while_down_queues_then_flushes() {
    let port = next_port();

    let client = fast_client();
    let node = client.add_node(descriptor("nearby", port)).unwrap();

    // Nothing is listening yet: the payload must queue, not error
    node.send(json!({"op": "play", "guildId": "42", "track": "abc"}));
    assert!(!node.is_healthy());

    // Bring the node up; the queued payload arrives with the reconnect
    let listener = listen(port).await;
    let mut ws = accept_one(&listener).await;

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("flush within deadline")
        .expect("stream open")
        .expect("frame ok");
    match frame {
        Message::Text(text) => {
            let payload: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(payload["op"], "play");
            assert_eq!(payload["track"], "abc");
        }
        other => panic!("unexpected frame: {other:?}"),
    }

    // Once connected, sends go straight through
    wait_for(Duration::from_secs(5), "node health", || node.is_healthy()).await;
    node.send(json!({"op": "pause", "guildId": "42", "pause": true}));
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("send within deadline")
        .expect("stream open")
        .expect("frame ok");
    assert!(matches!(frame, Message::Text(text) if text.contains("pause")));

    client.shutdown();
}

#[tokio::test]
async fn test_reconnect_preserves_identity() {
    let port = next_port();
    let listener = listen(port).await;

    let client = fast_client();
    let mut events = client.subscribe();
    let node = client.add_node(descriptor("nearby", port)).unwrap();

    // First connection, then the server drops it
    let ws = accept_one(&listener).await;
    wait_for(Duration::from_secs(5), "first connect", || node.is_healthy()).await;
    drop(ws);

    wait_for(Duration::from_secs(5), "disconnect noticed", || {
        !node.is_healthy()
    })
    .await;

    // The same listener accepts the retry
    let _ws = accept_one(&listener).await;
    wait_for(Duration::from_secs(5), "reconnect", || node.is_healthy()).await;

    // Identity unchanged across the reconnect
    assert_eq!(node.name(), "nearby");
    assert_eq!(node.descriptor().host, "127.0.0.1");
    assert_eq!(node.descriptor().port, port);

    // The bus saw the full connect/disconnect/connect sequence
    let mut sequence = Vec::new();
    while let Ok(event) = events.try_recv() {
        sequence.push(match event {
            NodeEvent::Connected { .. } => "connected",
            NodeEvent::Disconnected { .. } => "disconnected",
            other => panic!("unexpected event: {other:?}"),
        });
    }
    assert_eq!(sequence, vec!["connected", "disconnected", "connected"]);

    client.shutdown();
}

#[tokio::test]
async fn test_failover_to_surviving_node() {
    let port_a = next_port();
    let port_b = next_port();
    let listener_a = listen(port_a).await;
    let listener_b = listen(port_b).await;

    let client = fast_client();
    let node_a = client.add_node(descriptor("a", port_a)).unwrap();
    let node_b = client.add_node(descriptor("b", port_b)).unwrap();

    let mut ws_a = accept_one(&listener_a).await;
    let mut ws_b = accept_one(&listener_b).await;
    ws_a.send(Message::Text(stats_frame(1))).await.unwrap();
    ws_b.send(Message::Text(stats_frame(10))).await.unwrap();

    wait_for(Duration::from_secs(5), "both nodes scored", || {
        node_a.stats().is_some() && node_b.stats().is_some()
    })
    .await;

    // Lightly loaded node wins and hosts the player
    assert_eq!(client.nodes().best_node().unwrap().name(), "a");
    let player = client.players().get_or_create(42).unwrap();
    assert_eq!(player.node().name(), "a");

    // Kill the winner; nothing listens on its port anymore
    drop(listener_a);
    drop(ws_a);
    wait_for(Duration::from_secs(5), "node a unhealthy", || {
        !node_a.is_healthy()
    })
    .await;

    // Selection and the existing player both move to the survivor
    assert_eq!(client.nodes().best_node().unwrap().name(), "b");
    let player = client.players().get_or_create(42).unwrap();
    assert_eq!(player.node().name(), "b");

    client.shutdown();
}

#[tokio::test]
async fn test_unknown_ops_pass_through() {
    let port = next_port();
    let listener = listen(port).await;

    let client = fast_client();
    let mut events = client.subscribe();
    let node = client.add_node(descriptor("nearby", port)).unwrap();

    let mut ws = accept_one(&listener).await;
    wait_for(Duration::from_secs(5), "connect", || node.is_healthy()).await;

    // A malformed frame first: logged and dropped, connection survives
    ws.send(Message::Text("not json at all".to_string()))
        .await
        .unwrap();
    ws.send(Message::Text(
        json!({"op": "event", "type": "TrackEndEvent", "guildId": "42"}).to_string(),
    ))
    .await
    .unwrap();

    loop {
        match tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event within deadline")
            .unwrap()
        {
            NodeEvent::Message { node, op, payload } => {
                assert_eq!(node, "nearby");
                assert_eq!(op, "event");
                assert_eq!(payload["type"], "TrackEndEvent");
                break;
            }
            NodeEvent::Connected { .. } => continue,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(node.is_healthy());

    client.shutdown();
}

#[tokio::test]
async fn test_shutdown_stops_retries() {
    // No listener: the node loops on connect failures until shutdown
    let port = next_port();

    let client = fast_client();
    let node = client.add_node(descriptor("nearby", port)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!node.is_healthy());

    client.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A listener appearing after shutdown never gets a connection
    let listener = listen(port).await;
    let accepted = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(accepted.is_err(), "shutdown node must not reconnect");
}
