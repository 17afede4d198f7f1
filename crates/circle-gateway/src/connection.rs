use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use circle_types::events::{ClientCommand, Envelope, GatewayEvent};

use crate::hub::Hub;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound on a single socket write before the connection is dropped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives chat commands sent over the socket. Implemented by the API
/// layer, which persists the message and then publishes it through the hub.
pub trait CommandSink: Send + Sync + 'static {
    fn handle(&self, user_id: i64, command: ClientCommand) -> BoxFuture<'static, ()>;
}

/// Drive a WebSocket for a user that already passed the session check.
///
/// The connection is registered with the hub for its whole lifetime and
/// unregistered when either side of the socket ends.
pub async fn handle_connection(
    socket: WebSocket,
    hub: Hub,
    user_id: i64,
    username: String,
    commands: Arc<dyn CommandSink>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut outbound) = hub.register(user_id).await;

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = Envelope::new(GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    });
    let ready_sent = match serde_json::to_string(&ready) {
        Ok(text) => write(&mut sender, Message::Text(text.into())).await,
        Err(e) => {
            warn!("Failed to encode ready event: {}", e);
            false
        }
    };
    if !ready_sent {
        hub.unregister(conn_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_recv = pong_received.clone();

    // Forward hub traffic -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                next = outbound.recv() => {
                    let Some(text) = next else {
                        // Removed from the hub
                        let _ = write(&mut sender, Message::Close(None)).await;
                        break;
                    };
                    if !write(&mut sender, Message::Text(text)).await {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_received.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if !write(&mut sender, Message::Ping(Default::default())).await {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let hub_recv = hub.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
                    Ok(ClientCommand::Ping) => {
                        hub_recv
                            .send_to_connection(conn_id, &Envelope::new(GatewayEvent::Pong))
                            .await;
                    }
                    Ok(cmd) => commands.handle(user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            truncate(text.as_str(), 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn write(sender: &mut SplitSink<WebSocket, Message>, msg: Message) -> bool {
    match tokio::time::timeout(WRITE_TIMEOUT, sender.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Socket write failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Socket write timed out after {:?}", WRITE_TIMEOUT);
            false
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
