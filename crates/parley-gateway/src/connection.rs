use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;

use crate::gateway::Gateway;
use crate::registry::ConnectionId;

/// How often the server pings an idle client.
const PING_EVERY: Duration = Duration::from_secs(15);

/// Unanswered pings tolerated before the link is considered dead.
const MAX_MISSED_PONGS: u8 = 2;

/// Drive one WebSocket until either side goes away, then evict the
/// connection from every room it joined.
///
/// Identity is taken from each event's payload; the socket itself is not
/// authenticated.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway) {
    let conn: ConnectionId = Uuid::new_v4();
    let (sink, stream) = socket.split();
    let outbox = gateway.connect(conn);
    info!("Connection {} opened", conn);

    // Set by the reader on every pong, cleared by the writer on every ping.
    let alive = Arc::new(AtomicBool::new(true));

    // Stops the reader between frames. A frame already being handled is
    // always finished, never cancelled.
    let shutdown = CancellationToken::new();

    let mut writer = tokio::spawn(write_loop(conn, sink, outbox, alive.clone()));
    let mut reader = tokio::spawn(read_loop(conn, stream, gateway.clone(), alive, shutdown.clone()));

    let writer_ended = tokio::select! {
        _ = &mut writer => true,
        _ = &mut reader => false,
    };
    if writer_ended {
        shutdown.cancel();
        if let Err(e) = reader.await {
            error!("Connection {} reader failed: {}", conn, e);
        }
    } else {
        writer.abort();
    }

    gateway.disconnect(conn).await;
}

/// Outbox -> socket, interleaved with heartbeat pings.
async fn write_loop(
    conn: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbox: UnboundedReceiver<ServerEvent>,
    alive: Arc<AtomicBool>,
) {
    let mut ping = tokio::time::interval(PING_EVERY);
    // First tick fires immediately.
    ping.tick().await;
    let mut missed: u8 = 0;

    loop {
        tokio::select! {
            event = outbox.recv() => {
                let Some(event) = event else { return };
                let frame = match serde_json::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Connection {}: cannot encode {}: {}", conn, event.name(), e);
                        continue;
                    }
                };
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            _ = ping.tick() => {
                if alive.swap(false, Ordering::Acquire) {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= MAX_MISSED_PONGS {
                        warn!("Connection {} missed {} pongs, closing", conn, missed);
                        return;
                    }
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Socket -> gateway. Frames are handled one at a time, each to completion.
async fn read_loop(
    conn: ConnectionId,
    mut stream: SplitStream<WebSocket>,
    gateway: Gateway,
    alive: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => return,
            next = stream.next() => next,
        };
        let Some(Ok(frame)) = next else { return };
        match frame {
            Message::Text(text) => gateway.handle_frame(conn, text.as_str()).await,
            Message::Pong(_) => alive.store(true, Ordering::Release),
            Message::Binary(bytes) => {
                warn!("Connection {} sent a binary frame ({} bytes), ignoring", conn, bytes.len());
            }
            Message::Close(_) => return,
            Message::Ping(_) => {}
        }
    }
}
