//! The persistent duplex link to one audio node.
//!
//! Each node gets exactly one connection task. The task owns the WebSocket
//! and loops forever: connect with handshake headers, pump inbound frames and
//! outbound payloads, and on any failure go around again after a fixed delay.
//! Retries are unbounded by design - the only way to run without a node is to
//! not run at all - and only an explicit [`NodeSocket::shutdown`] stops them.
//!
//! Payloads sent while disconnected land in an in-memory queue and are
//! flushed once the next handshake completes. Nothing is durable across a
//! process restart.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as AnyhowContext, Result};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use croonconf::NodeDescriptor;
use croonproto::ServerMessage;

use crate::client::ClientIdentity;
use crate::events::{EventBus, NodeEvent};
use crate::node::Node;

/// Connection state for one node link.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Establishing the transport or waiting out a retry delay.
    Connecting = 0,
    /// Handshake complete, frames flowing.
    Connected = 1,
    /// Link dropped; a reconnect attempt follows immediately.
    Disconnected = 2,
    /// Terminal. Entered by `shutdown()`, never left.
    ShuttingDown = 3,
}

/// Tunables for the connection task.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Delay between failed connect attempts. Fixed interval, no growth.
    pub reconnect_delay: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Shared handle between a [`Node`] and its connection task.
///
/// The task drives the state machine; callers observe it and feed the
/// outbound path through [`send`](Self::send).
#[derive(Debug)]
pub struct NodeSocket {
    state: AtomicU8,
    /// Payloads accepted while no connection exists.
    queue: Mutex<Vec<Value>>,
    /// Live outbound channel into the connected task, if any.
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    cancel: CancellationToken,
    options: SocketOptions,
}

impl NodeSocket {
    pub(crate) fn new(options: SocketOptions) -> Self {
        Self {
            state: AtomicU8::new(SocketState::Connecting as u8),
            queue: Mutex::new(Vec::new()),
            outbound: Mutex::new(None),
            cancel: CancellationToken::new(),
            options,
        }
    }

    pub fn state(&self) -> SocketState {
        match self.state.load(Ordering::Relaxed) {
            1 => SocketState::Connected,
            2 => SocketState::Disconnected,
            3 => SocketState::ShuttingDown,
            _ => SocketState::Connecting,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SocketState::Connected
    }

    pub(crate) fn set_state(&self, state: SocketState) {
        // ShuttingDown absorbs every later transition
        if self.state() == SocketState::ShuttingDown {
            return;
        }
        self.state.store(state as u8, Ordering::Relaxed);
    }

    /// Force the terminal state and cancel the connection task, including any
    /// pending retry delay. In-flight sends are discarded.
    pub fn shutdown(&self) {
        self.state
            .store(SocketState::ShuttingDown as u8, Ordering::Relaxed);
        self.cancel.cancel();
    }

    /// Hand a payload to the node, fire-and-forget.
    ///
    /// Connected: transmitted immediately by the connection task. Otherwise:
    /// queued in memory and flushed after the next successful handshake.
    /// After shutdown there is no next handshake, so the payload is dropped.
    pub fn send(&self, payload: Value) {
        if self.state() == SocketState::ShuttingDown {
            debug!("socket shut down, payload dropped: {}", payload);
            return;
        }

        let payload = {
            let outbound = self.outbound.lock().unwrap();
            match outbound.as_ref() {
                Some(tx) if self.is_connected() => match tx.send(payload) {
                    Ok(()) => return,
                    // Task went away between the state check and the send
                    Err(rejected) => rejected.0,
                },
                _ => payload,
            }
        };

        debug!("not connected, payload queued: {}", payload);
        self.queue.lock().unwrap().push(payload);
    }

    /// Number of payloads waiting for the next connection.
    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn take_queued(&self) -> Vec<Value> {
        std::mem::take(&mut *self.queue.lock().unwrap())
    }

    /// Put unsent payloads back at the head of the queue.
    fn requeue(&self, payloads: Vec<Value>) {
        let mut queue = self.queue.lock().unwrap();
        let mut restored = payloads;
        restored.extend(queue.drain(..));
        *queue = restored;
    }

    fn install_outbound(&self, tx: mpsc::UnboundedSender<Value>) {
        *self.outbound.lock().unwrap() = Some(tx);
        self.set_state(SocketState::Connected);
    }

    /// Tear down the outbound path and move anything still in the channel
    /// back to the queue so it survives the reconnect.
    ///
    /// The queue lock is held while the sender is cleared, so a concurrent
    /// `send()` cannot slip a newer payload in ahead of the channel drain.
    fn retire_outbound(&self, rx: &mut mpsc::UnboundedReceiver<Value>) {
        let mut queue = self.queue.lock().unwrap();
        *self.outbound.lock().unwrap() = None;
        while let Ok(payload) = rx.try_recv() {
            queue.push(payload);
        }
    }
}

/// Why the connected loop returned.
enum LoopOutcome {
    Shutdown,
    Reconnect { code: Option<u16>, reason: String },
}

/// Build the upgrade request carrying the handshake identity headers.
fn handshake_request(descriptor: &NodeDescriptor, identity: &ClientIdentity) -> Result<Request> {
    let mut request = descriptor
        .ws_url()
        .into_client_request()
        .context("node address is not a valid WebSocket URL")?;

    let headers = request.headers_mut();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&descriptor.password)
            .context("node credential is not a valid header value")?,
    );
    headers.insert("Num-Shards", HeaderValue::from(identity.shard_count));
    headers.insert("User-Id", HeaderValue::from(identity.user_id));

    Ok(request)
}

/// Connection task: one per node, lives until shutdown.
pub(crate) async fn run(node: Arc<Node>, identity: ClientIdentity, events: EventBus) {
    let name = node.name().to_string();
    let socket = node.socket();
    let delay = socket.options.reconnect_delay;

    loop {
        if socket.state() == SocketState::ShuttingDown {
            return;
        }
        socket.set_state(SocketState::Connecting);

        // http::Request is not Clone, so build the upgrade request per attempt
        let request = match handshake_request(node.descriptor(), &identity) {
            Ok(request) => request,
            Err(e) => {
                // Bad credential or address cannot succeed on retry
                warn!("node `{}` has an unusable descriptor, giving up: {:#}", name, e);
                socket.shutdown();
                return;
            }
        };

        let stream = tokio::select! {
            _ = socket.cancel.cancelled() => return,
            connected = connect_async(request) => match connected {
                Ok((stream, _response)) => stream,
                Err(e) => {
                    warn!("failed to connect to node `{}`, retrying in {:?}: {}", name, delay, e);
                    tokio::select! {
                        _ = socket.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            },
        };

        info!("connected to node `{}`", name);
        events.emit(NodeEvent::Connected { node: name.clone() });

        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        socket.install_outbound(out_tx);

        let outcome = connected_loop(&node, stream, &mut out_rx, &events).await;
        socket.retire_outbound(&mut out_rx);

        match outcome {
            LoopOutcome::Shutdown => {
                socket.set_state(SocketState::ShuttingDown);
                info!("node `{}` connection shut down", name);
                return;
            }
            LoopOutcome::Reconnect { code, reason } => {
                socket.set_state(SocketState::Disconnected);
                warn!(
                    "disconnected from node `{}` ({}): {}",
                    name,
                    code.map_or_else(|| "no close code".to_string(), |c| c.to_string()),
                    reason
                );
                events.emit(NodeEvent::Disconnected {
                    node: name.clone(),
                    code,
                    reason,
                });
                // Reconnect right away; the fixed delay only follows a
                // failed connect attempt.
            }
        }
    }
}

async fn connected_loop<S>(
    node: &Arc<Node>,
    stream: tokio_tungstenite::WebSocketStream<S>,
    out_rx: &mut mpsc::UnboundedReceiver<Value>,
    events: &EventBus,
) -> LoopOutcome
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let socket = node.socket();
    let (mut ws_tx, mut ws_rx) = stream.split();

    // Flush everything queued while we were down
    let queued = socket.take_queued();
    if !queued.is_empty() {
        info!(
            "flushing {} queued payload(s) to node `{}`",
            queued.len(),
            node.name()
        );
    }
    let mut pending = queued.into_iter();
    while let Some(payload) = pending.next() {
        let Ok(text) = serde_json::to_string(&payload) else {
            continue;
        };
        if let Err(e) = ws_tx.send(Message::Text(text)).await {
            socket.requeue(std::iter::once(payload).chain(pending).collect());
            return LoopOutcome::Reconnect {
                code: None,
                reason: format!("flush failed: {e}"),
            };
        }
    }

    loop {
        tokio::select! {
            _ = socket.cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return LoopOutcome::Shutdown;
            }

            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    debug!("received frame from node `{}`: {}", node.name(), text);
                    handle_frame(node, &text, events);
                }
                Some(Ok(Message::Close(close))) => {
                    let (code, reason) = close
                        .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    return LoopOutcome::Reconnect { code, reason };
                }
                // Binary frames are not part of the protocol; tungstenite
                // answers pings itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return LoopOutcome::Reconnect {
                        code: None,
                        reason: format!("read error: {e}"),
                    };
                }
                None => {
                    return LoopOutcome::Reconnect {
                        code: None,
                        reason: "stream ended".to_string(),
                    };
                }
            },

            payload = out_rx.recv() => {
                // The sender lives in the NodeSocket for as long as this
                // loop runs, so recv() only yields Some here.
                let Some(payload) = payload else { continue };
                let Ok(text) = serde_json::to_string(&payload) else {
                    continue;
                };
                debug!("sending payload to node `{}`: {}", node.name(), text);
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    socket.requeue(vec![payload]);
                    return LoopOutcome::Reconnect {
                        code: None,
                        reason: format!("write error: {e}"),
                    };
                }
            }
        }
    }
}

/// Decode one inbound text frame and route it.
///
/// Malformed frames are logged and dropped; they never take the link down.
fn handle_frame(node: &Arc<Node>, text: &str, events: &EventBus) {
    match ServerMessage::decode(text) {
        Ok(ServerMessage::Stats(stats)) => {
            node.update_stats(stats);
            events.emit(NodeEvent::StatsUpdated {
                node: node.name().to_string(),
            });
        }
        Ok(ServerMessage::Passthrough { op, payload }) => {
            events.emit(NodeEvent::Message {
                node: node.name().to_string(),
                op,
                payload,
            });
        }
        Err(e) => {
            warn!("dropping malformed frame from node `{}`: {}", node.name(), e);
        }
    }
}
