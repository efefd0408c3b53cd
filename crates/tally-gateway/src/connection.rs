use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, info, warn};

use tally_types::api::Claims;
use tally_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::{BroadcastMessage, Dispatcher};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a fresh socket has to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

type Subscriptions = Arc<RwLock<HashSet<i64>>>;

/// Handle one WebSocket connection: Identify handshake, Ready, then forward
/// vote events for the polls the client subscribed to.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let Some(member_id) = wait_for_identify(&mut receiver, &jwt_secret).await else {
        warn!("WebSocket client failed to identify, closing");
        return;
    };

    if send_event(&mut sender, &GatewayEvent::Ready { member_id }).await.is_err() {
        return;
    }

    let conn_id = dispatcher.register_connection(member_id).await;
    info!(
        "Member {} connected to gateway ({} connections, {} for this member)",
        member_id,
        dispatcher.connection_count().await,
        dispatcher.member_connection_count(member_id).await
    );

    run_connection_loop(sender, receiver, &dispatcher, member_id).await;
    dispatcher.unregister_connection(conn_id).await;

    info!(
        "Member {} disconnected from gateway ({} connections left)",
        member_id,
        dispatcher.connection_count().await
    );
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(event)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    dispatcher: &Dispatcher,
    member_id: i64,
) {
    let mut broadcast_rx = dispatcher.subscribe();

    // Per-connection poll subscriptions, shared between send and recv tasks.
    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver for member {} lagged by {} messages", member_id, n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    match should_forward(&msg, &send_subscriptions) {
                        Some(true) => {}
                        Some(false) => continue,
                        None => break,
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout for member {} (missed {} pongs), dropping connection", member_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_subscriptions = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if !apply_command(member_id, cmd, &recv_subscriptions) {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Member {} sent a bad command: {} -- raw: {}",
                            member_id,
                            e,
                            text.chars().take(200).collect::<String>()
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

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Whether a broadcast goes to this connection. `None` when the
/// subscription set is unusable and the connection should end.
fn should_forward(msg: &BroadcastMessage, subscriptions: &Subscriptions) -> Option<bool> {
    let Some(poll_id) = msg.poll_id else {
        return Some(true);
    };
    subscriptions.read().ok().map(|subs| subs.contains(&poll_id))
}

/// Apply a client command to the subscription set. Returns false when the
/// connection should be dropped.
fn apply_command(member_id: i64, cmd: GatewayCommand, subscriptions: &Subscriptions) -> bool {
    let Ok(mut subs) = subscriptions.write() else {
        return false;
    };

    match cmd {
        // Already handled during the handshake.
        GatewayCommand::Identify { .. } => {}

        GatewayCommand::Subscribe { poll_ids } => {
            debug!("Member {} subscribing to {} polls", member_id, poll_ids.len());
            subs.extend(poll_ids);
        }

        GatewayCommand::Unsubscribe { poll_ids } => {
            debug!("Member {} unsubscribing from {} polls", member_id, poll_ids.len());
            for poll_id in poll_ids {
                subs.remove(&poll_id);
            }
        }
    }
    true
}

/// Verify a bearer token and return the member id it was issued for.
pub fn verify_token(token: &str, jwt_secret: &str) -> Option<i64> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims.sub)
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<i64> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return verify_token(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}
