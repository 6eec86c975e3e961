use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use globaltalk_types::events::{ClientCommand, ServerEvent};
use globaltalk_types::models::EndReason;

use crate::GatewayState;
use crate::rating::{self, RatingOffer};
use crate::rooms::{DepartKind, Departure, RoomError, RoomSpec};
use crate::settlement;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single socket for its whole lifetime. Registers the connection
/// as anonymous, pumps events both ways, and funnels the eventual close
/// through the same departure path an explicit leave uses.
pub async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let (mut sender, mut receiver) = socket.split();

    let mut broadcast_rx = state.dispatcher.subscribe();
    let (conn_id, mut conn_rx) = state.dispatcher.register().await;
    info!("client connected: {}", conn_id);

    // The fresh socket gets the totals immediately; everyone else learns the
    // new count through the broadcast.
    let snapshot = state.dispatcher.online_snapshot().await;
    if sender
        .send(Message::Text(
            serde_json::to_string(&snapshot).unwrap().into(),
        ))
        .await
        .is_err()
    {
        state.dispatcher.disconnect(conn_id).await;
        return;
    }
    state.dispatcher.broadcast(snapshot);

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = conn_rx.recv() => {
                    let Some(event) = result else { break };
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

    // Read commands from the client
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_state, conn_id, cmd).await,
                    Err(e) => {
                        warn!("{} bad command: {}", conn_id, e);
                        recv_state
                            .dispatcher
                            .send_to_conn(
                                conn_id,
                                ServerEvent::Error {
                                    message: "malformed message".into(),
                                },
                            )
                            .await;
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

    // Transport loss and explicit leave converge on the same departure path;
    // a connection that already left produces nothing here.
    if let Some(departure) = state
        .rooms
        .depart_connection(conn_id, DepartKind::Disconnect)
        .await
    {
        finish_departure(&state, conn_id, departure, false).await;
    }

    match state.dispatcher.disconnect(conn_id).await {
        Some(identity) => info!("{} ({}) disconnected", identity.nickname, identity.user_id),
        None => info!("anonymous client disconnected: {}", conn_id),
    }

    let snapshot = state.dispatcher.online_snapshot().await;
    state.dispatcher.broadcast(snapshot);
}

async fn handle_command(state: &GatewayState, conn_id: Uuid, cmd: ClientCommand) {
    match cmd {
        ClientCommand::Authenticate(identity) => {
            // Mirror the snapshot into the local user directory so nickname
            // lookups and ledger references resolve later.
            let db = state.db.clone();
            let mirrored = identity.clone();
            let persisted = tokio::task::spawn_blocking(move || db.upsert_user(&mirrored))
                .await
                .map_err(anyhow::Error::from)
                .and_then(|r| r);
            if let Err(e) = persisted {
                warn!("failed to mirror identity {}: {}", identity.user_id, e);
            }

            info!("authenticated: {} ({})", identity.nickname, identity.user_id);
            state.dispatcher.authenticate(conn_id, identity).await;

            let snapshot = state.dispatcher.online_snapshot().await;
            state.dispatcher.broadcast(snapshot);
        }

        ClientCommand::GetRooms => {
            let rooms = state.rooms.open_rooms().await;
            state
                .dispatcher
                .send_to_conn(conn_id, ServerEvent::RoomList(rooms))
                .await;
        }

        ClientCommand::GetOnlineCount => {
            let snapshot = state.dispatcher.online_snapshot().await;
            state.dispatcher.send_to_conn(conn_id, snapshot).await;
        }

        ClientCommand::CreateRoom {
            title,
            language,
            topic,
            room_type,
            is_private,
            password,
        } => {
            let Some(identity) = state.dispatcher.identity_of(conn_id).await else {
                send_error(state, conn_id, RoomError::NotAuthenticated).await;
                return;
            };

            let spec = RoomSpec {
                title,
                language,
                topic,
                call_type: room_type,
                is_private,
                password,
            };
            match state.rooms.create(&identity, conn_id, spec).await {
                Ok(room) => {
                    info!(
                        "room created: {} by {} ({})",
                        room.title,
                        identity.nickname,
                        room.call_type.as_str()
                    );
                    state
                        .dispatcher
                        .send_to_conn(conn_id, ServerEvent::RoomCreated { room_id: room.id })
                        .await;
                    state.dispatcher.broadcast(ServerEvent::RoomListUpdated(room));
                }
                Err(e) => send_error(state, conn_id, e).await,
            }
        }

        ClientCommand::JoinRoom { room_id, password } => {
            let Some(identity) = state.dispatcher.identity_of(conn_id).await else {
                send_error(state, conn_id, RoomError::NotAuthenticated).await;
                return;
            };

            // The balance read suspends; the registry re-checks capacity under
            // its own lock when the seat is actually taken.
            let db = state.db.clone();
            let user_id = identity.user_id;
            let balance = match tokio::task::spawn_blocking(move || db.balance(user_id))
                .await
                .map_err(anyhow::Error::from)
                .and_then(|r| r)
            {
                Ok(balance) => balance,
                Err(e) => {
                    error!("balance lookup for {} failed: {}", user_id, e);
                    state
                        .dispatcher
                        .send_to_conn(
                            conn_id,
                            ServerEvent::Error {
                                message: "could not verify point balance".into(),
                            },
                        )
                        .await;
                    return;
                }
            };

            match state
                .rooms
                .join(room_id, &identity, conn_id, password.as_deref(), balance)
                .await
            {
                Ok(joined) => {
                    info!(
                        "{} joined room {} ({}/{})",
                        identity.nickname,
                        joined.room.title,
                        joined.room.participants.len(),
                        joined.room.max_participants
                    );
                    if joined.session_started {
                        info!("session started in room {}", joined.room.id);
                    }

                    let is_guest = joined
                        .room
                        .participants
                        .iter()
                        .any(|p| p.connection_id == conn_id && !p.is_host);
                    state
                        .dispatcher
                        .send_to_conn(
                            conn_id,
                            ServerEvent::RoomJoined {
                                room: joined.room.clone(),
                                agora_app_id: state.agora_app_id.clone(),
                                guest_balance: is_guest.then_some(balance),
                            },
                        )
                        .await;

                    for p in &joined.room.participants {
                        state
                            .dispatcher
                            .send_to_conn(
                                p.connection_id,
                                ServerEvent::RoomUpdated(joined.room.clone()),
                            )
                            .await;
                    }
                    state
                        .dispatcher
                        .broadcast(ServerEvent::RoomListUpdated(joined.room));
                }
                Err(e) => send_error(state, conn_id, e).await,
            }
        }

        ClientCommand::LeaveRoom { room_id } => {
            match state.rooms.leave(room_id, conn_id, DepartKind::Leave).await {
                Ok(departure) => finish_departure(state, conn_id, departure, true).await,
                Err(e) => send_error(state, conn_id, e).await,
            }
        }

        ClientCommand::SendMessage {
            room_id,
            message,
            kind,
        } => {
            let Some(room) = state.rooms.get(room_id).await else {
                send_error(state, conn_id, RoomError::RoomNotFound).await;
                return;
            };
            let Some(sender) = room
                .participants
                .iter()
                .find(|p| p.connection_id == conn_id)
            else {
                send_error(state, conn_id, RoomError::NotInRoom).await;
                return;
            };

            let event = ServerEvent::NewMessage {
                id: Uuid::new_v4(),
                room_id,
                sender_id: sender.user_id,
                sender_nickname: sender.nickname.clone(),
                message,
                timestamp: Utc::now(),
                kind,
            };
            for p in &room.participants {
                state
                    .dispatcher
                    .send_to_conn(p.connection_id, event.clone())
                    .await;
            }
        }
    }
}

async fn send_error(state: &GatewayState, conn_id: Uuid, err: RoomError) {
    state
        .dispatcher
        .send_to_conn(
            conn_id,
            ServerEvent::Error {
                message: err.to_string(),
            },
        )
        .await;
}

/// Settle the ended session (if any), then deliver the closure/revert events.
/// `notify_leaver` is false on the disconnect path — that socket is gone.
async fn finish_departure(
    state: &GatewayState,
    leaver_conn: Uuid,
    departure: Departure,
    notify_leaver: bool,
) {
    match departure {
        Departure::HostLeft {
            room_id,
            reason,
            ended,
            remaining,
        } => {
            let offer = settle_session(state, ended.as_ref()).await;

            // The departing host is never offered a rating.
            if notify_leaver {
                state
                    .dispatcher
                    .send_to_conn(
                        leaver_conn,
                        ServerEvent::RoomLeft {
                            room_id,
                            show_rating_modal: None,
                            host_user_id: None,
                        },
                    )
                    .await;
            }

            for p in &remaining {
                state
                    .dispatcher
                    .send_to_conn(
                        p.connection_id,
                        ServerEvent::RoomClosed {
                            room_id,
                            reason,
                            message: closure_message(reason).into(),
                            show_rating_modal: offer.map(|_| true),
                            host_user_id: offer.map(|o| o.host_user_id),
                        },
                    )
                    .await;
            }

            state
                .dispatcher
                .broadcast(ServerEvent::RoomDeleted { room_id });
            info!("room closed: {} ({})", room_id, reason.as_str());
        }

        Departure::GuestLeft {
            room,
            reason,
            departed,
            ended,
        } => {
            let offer = settle_session(state, ended.as_ref()).await;

            if notify_leaver {
                state
                    .dispatcher
                    .send_to_conn(
                        leaver_conn,
                        ServerEvent::RoomLeft {
                            room_id: room.id,
                            show_rating_modal: offer.map(|_| true),
                            host_user_id: offer.map(|o| o.host_user_id),
                        },
                    )
                    .await;
            }

            for p in &room.participants {
                state
                    .dispatcher
                    .send_to_conn(p.connection_id, ServerEvent::RoomUpdated(room.clone()))
                    .await;
            }
            state.dispatcher.broadcast(ServerEvent::RoomListUpdated(room));
            info!("{} left room ({})", departed.nickname, reason.as_str());
        }
    }
}

/// Run settlement for an ended session and push the fresh balances to both
/// parties. Returns the rating offer, which exists only when a call record
/// was actually written.
async fn settle_session(
    state: &GatewayState,
    ended: Option<&crate::rooms::EndedSession>,
) -> Option<RatingOffer> {
    let ended = ended?;

    match settlement::persist_session(&state.db, ended).await {
        Ok(_settled) => {
            let db = state.db.clone();
            let (host_id, guest_id) = (ended.host.user_id, ended.guest.user_id);
            let balances = tokio::task::spawn_blocking(move || -> anyhow::Result<(i64, i64)> {
                Ok((db.balance(host_id)?, db.balance(guest_id)?))
            })
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);

            match balances {
                Ok((host_balance, guest_balance)) => {
                    state
                        .dispatcher
                        .send_to_user(host_id, ServerEvent::PointsUpdated { balance: host_balance })
                        .await;
                    state
                        .dispatcher
                        .send_to_user(
                            guest_id,
                            ServerEvent::PointsUpdated {
                                balance: guest_balance,
                            },
                        )
                        .await;
                }
                Err(e) => warn!("balance refresh after settlement failed: {}", e),
            }

            rating::offer_for(ended, true)
        }
        Err(e) => {
            error!(
                "settlement for room {} could not be persisted: {}",
                ended.room_id, e
            );
            rating::offer_for(ended, false)
        }
    }
}

fn closure_message(reason: EndReason) -> &'static str {
    match reason {
        EndReason::HostLeft => "The host left and the session has ended.",
        EndReason::HostDisconnected => "The host's connection was lost and the session has ended.",
        EndReason::GuestLeft | EndReason::GuestDisconnected => "The session has ended.",
    }
}
