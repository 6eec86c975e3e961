use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use globaltalk_types::models::{CallType, EndReason, Participant, RoomInfo, UserIdentity};

use crate::clock::Clock;
use crate::settlement;

pub const MAX_PARTICIPANTS: usize = 2;

/// Admission errors, surfaced verbatim to the initiating connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("login is required to create or join a room")]
    NotAuthenticated,
    #[error("already participating in another room")]
    AlreadyInRoom,
    #[error("room not found")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
    #[error("wrong password")]
    WrongPassword,
    #[error("a private room needs a password")]
    PasswordRequired,
    #[error("not enough points to join (need {needed}, have {balance})")]
    InsufficientBalance { needed: i64, balance: i64 },
    #[error("not a participant of this room")]
    NotInRoom,
}

#[derive(Debug, Clone)]
pub struct RoomSpec {
    pub title: String,
    pub language: String,
    pub topic: String,
    pub call_type: CallType,
    pub is_private: bool,
    pub password: Option<String>,
}

/// Explicit leave vs. transport loss. Both converge on the same departure
/// path; the distinction only colors the end reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartKind {
    Leave,
    Disconnect,
}

/// The facts of a finished session, produced exactly once, under the same
/// write lock that mutates the room. Settlement consumes this.
#[derive(Debug, Clone)]
pub struct EndedSession {
    pub room_id: Uuid,
    pub call_type: CallType,
    pub language: String,
    pub topic: String,
    pub host: Participant,
    pub guest: Participant,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub end_reason: EndReason,
}

/// Outcome of removing a participant.
#[derive(Debug)]
pub enum Departure {
    /// The host left: the room is destroyed and its id is never reused.
    HostLeft {
        room_id: Uuid,
        reason: EndReason,
        ended: Option<EndedSession>,
        remaining: Vec<Participant>,
    },
    /// A guest left: the room reverts to waiting for a new guest.
    GuestLeft {
        room: RoomInfo,
        reason: EndReason,
        departed: Participant,
        ended: Option<EndedSession>,
    },
}

#[derive(Debug, Clone)]
pub struct Joined {
    pub room: RoomInfo,
    pub session_started: bool,
}

struct Room {
    id: Uuid,
    title: String,
    host_id: i64,
    host_nickname: String,
    language: String,
    topic: String,
    call_type: CallType,
    is_private: bool,
    password: Option<String>,
    participants: Vec<Participant>,
    created_at: DateTime<Utc>,
    session_started_at: Option<DateTime<Utc>>,
}

impl Room {
    fn is_full(&self) -> bool {
        self.participants.len() >= MAX_PARTICIPANTS
    }

    fn member(&self, conn_id: Uuid) -> Option<usize> {
        self.participants
            .iter()
            .position(|p| p.connection_id == conn_id)
    }

    /// Membership by connection or by user id: a user holds at most one seat
    /// across all rooms, even across superseded connections.
    fn occupied_by(&self, conn_id: Uuid, user_id: i64) -> bool {
        self.participants
            .iter()
            .any(|p| p.connection_id == conn_id || p.user_id == user_id)
    }

    fn snapshot(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            title: self.title.clone(),
            host_id: self.host_id,
            host_nickname: self.host_nickname.clone(),
            language: self.language.clone(),
            topic: self.topic.clone(),
            call_type: self.call_type,
            max_participants: MAX_PARTICIPANTS,
            is_private: self.is_private,
            participants: self.participants.clone(),
            created_at: self.created_at,
            session_started_at: self.session_started_at,
        }
    }
}

/// All open rooms. Every mutation runs under the write lock, which is what
/// serializes competing joins and makes duplicate departs observable as
/// no-ops.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<Uuid, Room>>,
    clock: Arc<dyn Clock>,
}

impl RoomRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Open a room with the caller in the host seat.
    pub async fn create(
        &self,
        host: &UserIdentity,
        conn_id: Uuid,
        spec: RoomSpec,
    ) -> Result<RoomInfo, RoomError> {
        let mut rooms = self.rooms.write().await;

        if rooms.values().any(|r| r.occupied_by(conn_id, host.user_id)) {
            return Err(RoomError::AlreadyInRoom);
        }
        if spec.is_private && spec.password.as_deref().is_none_or(str::is_empty) {
            return Err(RoomError::PasswordRequired);
        }

        let room = Room {
            id: Uuid::new_v4(),
            title: spec.title,
            host_id: host.user_id,
            host_nickname: host.nickname.clone(),
            language: spec.language,
            topic: spec.topic,
            call_type: spec.call_type,
            is_private: spec.is_private,
            password: spec.password,
            participants: vec![Participant {
                user_id: host.user_id,
                nickname: host.nickname.clone(),
                connection_id: conn_id,
                is_host: true,
            }],
            created_at: self.clock.now(),
            session_started_at: None,
        };

        let info = room.snapshot();
        rooms.insert(room.id, room);
        Ok(info)
    }

    /// Public inventory: rooms with an open seat only.
    pub async fn open_rooms(&self) -> Vec<RoomInfo> {
        self.rooms
            .read()
            .await
            .values()
            .filter(|r| !r.is_full())
            .map(Room::snapshot)
            .collect()
    }

    pub async fn get(&self, room_id: Uuid) -> Option<RoomInfo> {
        self.rooms.read().await.get(&room_id).map(Room::snapshot)
    }

    /// Take a seat. The caller fetched `balance` before this call — a
    /// suspension point — so capacity and membership are re-validated here,
    /// atomically with the append. Two guests racing for the last seat
    /// resolve to one success and one `RoomFull`.
    pub async fn join(
        &self,
        room_id: Uuid,
        user: &UserIdentity,
        conn_id: Uuid,
        password: Option<&str>,
        balance: i64,
    ) -> Result<Joined, RoomError> {
        let mut rooms = self.rooms.write().await;

        if rooms.values().any(|r| r.occupied_by(conn_id, user.user_id)) {
            return Err(RoomError::AlreadyInRoom);
        }

        let now = self.clock.now();
        let room = rooms.get_mut(&room_id).ok_or(RoomError::RoomNotFound)?;

        if room.is_full() {
            return Err(RoomError::RoomFull);
        }
        if room.is_private {
            match (&room.password, password) {
                (Some(expected), Some(given)) if expected == given => {}
                _ => return Err(RoomError::WrongPassword),
            }
        }

        // The host seat is taken at create; everyone who joins afterwards is
        // a guest and must cover at least the base charge of the call type.
        let needed = settlement::base_charge(room.call_type);
        if balance < needed {
            return Err(RoomError::InsufficientBalance { needed, balance });
        }

        room.participants.push(Participant {
            user_id: user.user_id,
            nickname: user.nickname.clone(),
            connection_id: conn_id,
            is_host: false,
        });

        let mut session_started = false;
        if room.participants.len() == MAX_PARTICIPANTS && room.session_started_at.is_none() {
            room.session_started_at = Some(now);
            session_started = true;
        }

        Ok(Joined {
            room: room.snapshot(),
            session_started,
        })
    }

    /// Explicit `leaveRoom`: validates the room and the caller's membership
    /// before departing.
    pub async fn leave(
        &self,
        room_id: Uuid,
        conn_id: Uuid,
        kind: DepartKind,
    ) -> Result<Departure, RoomError> {
        let mut rooms = self.rooms.write().await;

        let room = rooms.get(&room_id).ok_or(RoomError::RoomNotFound)?;
        if room.member(conn_id).is_none() {
            return Err(RoomError::NotInRoom);
        }

        let now = self.clock.now();
        Self::remove_from(&mut rooms, room_id, conn_id, kind, now).ok_or(RoomError::NotInRoom)
    }

    /// The unified departure entry point for transport-level disconnects.
    /// A connection that already departed yields `None`: duplicate signals
    /// are no-ops and can never settle twice.
    pub async fn depart_connection(&self, conn_id: Uuid, kind: DepartKind) -> Option<Departure> {
        let mut rooms = self.rooms.write().await;

        let room_id = rooms
            .iter()
            .find(|(_, r)| r.member(conn_id).is_some())
            .map(|(id, _)| *id)?;

        let now = self.clock.now();
        Self::remove_from(&mut rooms, room_id, conn_id, kind, now)
    }

    fn remove_from(
        rooms: &mut HashMap<Uuid, Room>,
        room_id: Uuid,
        conn_id: Uuid,
        kind: DepartKind,
        now: DateTime<Utc>,
    ) -> Option<Departure> {
        let mut room = rooms.remove(&room_id)?;
        let idx = room.member(conn_id)?;
        let departed = room.participants.remove(idx);
        let started = room.session_started_at.take();

        let reason = end_reason(kind, departed.is_host);

        let ended = match (started, room.participants.first()) {
            (Some(started_at), Some(other)) => {
                let (host, guest) = if departed.is_host {
                    (departed.clone(), other.clone())
                } else {
                    (other.clone(), departed.clone())
                };
                Some(EndedSession {
                    room_id,
                    call_type: room.call_type,
                    language: room.language.clone(),
                    topic: room.topic.clone(),
                    host,
                    guest,
                    started_at,
                    ended_at: now,
                    duration_secs: (now - started_at).num_seconds().max(0),
                    end_reason: reason,
                })
            }
            _ => None,
        };

        if departed.is_host {
            // The room stays removed: Closed is terminal.
            Some(Departure::HostLeft {
                room_id,
                reason,
                ended,
                remaining: room.participants.clone(),
            })
        } else {
            let snapshot = room.snapshot();
            rooms.insert(room_id, room);
            Some(Departure::GuestLeft {
                room: snapshot,
                reason,
                departed,
                ended,
            })
        }
    }
}

fn end_reason(kind: DepartKind, is_host: bool) -> EndReason {
    match (kind, is_host) {
        (DepartKind::Leave, true) => EndReason::HostLeft,
        (DepartKind::Disconnect, true) => EndReason::HostDisconnected,
        (DepartKind::Leave, false) => EndReason::GuestLeft,
        (DepartKind::Disconnect, false) => EndReason::GuestDisconnected,
    }
}
