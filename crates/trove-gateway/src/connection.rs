use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use trove_types::events::{GatewayCommand, GatewayEvent};
use trove_types::models::{Capability, Role};

use crate::dispatcher::{Dispatcher, Room};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh connection gets to send its Identify command.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// A resolved, authenticated gateway client.
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: i64,
    pub username: String,
    pub role: Role,
}

/// Ownership of an item's chat, as the gateway needs it for room checks.
#[derive(Debug, Clone, Copy)]
pub struct ItemParties {
    pub owner_id: i64,
    pub claimed_by: Option<i64>,
}

/// Lookup seam into the persistence layer. Implemented over the database
/// in the server binary so this crate stays storage-free. Methods may
/// block; callers run them on the blocking pool.
pub trait ChatDirectory: Send + Sync {
    fn participant(&self, user_id: i64) -> anyhow::Result<Option<Participant>>;
    fn item_parties(&self, item_id: i64) -> anyhow::Result<Option<ItemParties>>;
}

/// Whether a participant may follow an item's chat room: the owner, the
/// current claimant, or the monitoring main admin.
pub fn may_join(participant: &Participant, parties: &ItemParties) -> bool {
    participant.role.can(Capability::MonitorChats)
        || parties.owner_id == participant.user_id
        || parties.claimed_by == Some(participant.user_id)
}

/// Handle a single websocket connection: Identify handshake, room
/// bookkeeping, heartbeat, and event relay until either side hangs up.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    directory: Arc<dyn ChatDirectory>,
    jwt_secret: String,
) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("websocket client failed to identify, closing");
            return;
        }
    };

    // Step 2: resolve the account fresh — role or existence may have
    // changed since the token was minted.
    let lookup = {
        let directory = directory.clone();
        tokio::task::spawn_blocking(move || directory.participant(user_id)).await
    };
    let participant = match lookup {
        Ok(Ok(Some(p))) => p,
        Ok(Ok(None)) => {
            warn!("identified user {} no longer exists, closing", user_id);
            return;
        }
        Ok(Err(e)) => {
            warn!("participant lookup failed for {}: {}", user_id, e);
            return;
        }
        Err(e) => {
            warn!("participant lookup join error: {}", e);
            return;
        }
    };

    info!(
        "{} ({}) connected to gateway",
        participant.username, participant.user_id
    );

    // Step 3: register, auto-join the personal room, confirm with Ready
    let (conn_id, mut event_rx) = dispatcher.register().await;
    dispatcher.join(conn_id, Room::User(participant.user_id)).await;

    let ready = GatewayEvent::Ready {
        user_id: participant.user_id,
        username: participant.username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        dispatcher.disconnect(conn_id).await;
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let participant_recv = participant.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &dispatcher_recv,
                            &directory,
                            conn_id,
                            &participant_recv,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command ({} bytes): {}",
                            participant_recv.username,
                            participant_recv.user_id,
                            text.len(),
                            e
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

    dispatcher.disconnect(conn_id).await;
    info!(
        "{} ({}) disconnected from gateway",
        participant.username, participant.user_id
    );
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<i64> {
    use jsonwebtoken::{DecodingKey, Validation, decode};
    use trove_types::api::Claims;

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some(token_data.claims.sub);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    dispatcher: &Dispatcher,
    directory: &Arc<dyn ChatDirectory>,
    conn_id: Uuid,
    participant: &Participant,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::Subscribe { item_id } => {
            let lookup = {
                let directory = directory.clone();
                tokio::task::spawn_blocking(move || directory.item_parties(item_id)).await
            };

            let parties = match lookup {
                Ok(Ok(Some(parties))) => parties,
                Ok(Ok(None)) => {
                    dispatcher
                        .send_to(
                            conn_id,
                            GatewayEvent::Error {
                                message: format!("item {} not found", item_id),
                            },
                        )
                        .await;
                    return;
                }
                Ok(Err(e)) => {
                    warn!("item lookup failed for {}: {}", item_id, e);
                    return;
                }
                Err(e) => {
                    warn!("item lookup join error: {}", e);
                    return;
                }
            };

            if !may_join(participant, &parties) {
                dispatcher
                    .send_to(
                        conn_id,
                        GatewayEvent::Error {
                            message: "you are not a participant in this chat".into(),
                        },
                    )
                    .await;
                return;
            }

            info!(
                "{} ({}) subscribed to item {}",
                participant.username, participant.user_id, item_id
            );
            dispatcher.join(conn_id, Room::Item(item_id)).await;
            dispatcher
                .send_to(conn_id, GatewayEvent::Subscribed { item_id })
                .await;
        }

        GatewayCommand::Unsubscribe { item_id } => {
            dispatcher.leave(conn_id, Room::Item(item_id)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(user_id: i64) -> Participant {
        Participant {
            user_id,
            username: format!("user{user_id}"),
            role: Role::Student,
        }
    }

    #[test]
    fn owner_and_claimant_may_join() {
        let parties = ItemParties {
            owner_id: 1,
            claimed_by: Some(2),
        };
        assert!(may_join(&student(1), &parties));
        assert!(may_join(&student(2), &parties));
        assert!(!may_join(&student(3), &parties));
    }

    #[test]
    fn unclaimed_item_admits_only_the_owner() {
        let parties = ItemParties {
            owner_id: 1,
            claimed_by: None,
        };
        assert!(may_join(&student(1), &parties));
        assert!(!may_join(&student(2), &parties));
    }

    #[test]
    fn main_admin_monitors_any_room() {
        let parties = ItemParties {
            owner_id: 1,
            claimed_by: Some(2),
        };
        let monitor = Participant {
            user_id: 99,
            username: "root".into(),
            role: Role::MainAdmin,
        };
        assert!(may_join(&monitor, &parties));

        // Plain admins do not get the monitor capability.
        let admin = Participant {
            user_id: 98,
            username: "mod".into(),
            role: Role::Admin,
        };
        assert!(!may_join(&admin, &parties));
    }
}
