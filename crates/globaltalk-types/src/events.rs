use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CallType, EndReason, MessageKind, OnlineUser, RoomInfo, UserIdentity};

/// Commands sent FROM client TO server over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Bind this connection to an authenticated identity
    Authenticate(UserIdentity),

    /// Request the list of joinable rooms
    GetRooms,

    /// Request the current online totals
    GetOnlineCount,

    /// Open a new room and take the host seat
    CreateRoom {
        title: String,
        language: String,
        topic: String,
        room_type: CallType,
        #[serde(default)]
        is_private: bool,
        #[serde(default)]
        password: Option<String>,
    },

    /// Take the guest seat in an existing room
    JoinRoom {
        room_id: Uuid,
        #[serde(default)]
        password: Option<String>,
    },

    /// Give up the current seat
    LeaveRoom { room_id: Uuid },

    /// Post a text or speech-to-text message to the room
    SendMessage {
        room_id: Uuid,
        message: String,
        #[serde(default, rename = "type")]
        kind: MessageKind,
    },
}

/// Events sent FROM server TO clients over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Joinable rooms (full rooms are excluded)
    RoomList(Vec<RoomInfo>),

    /// The caller's room was opened
    RoomCreated { room_id: Uuid },

    /// The caller took a seat in a room
    RoomJoined {
        #[serde(flatten)]
        room: RoomInfo,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agora_app_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        guest_balance: Option<i64>,
    },

    /// Room membership changed; sent to the room's participants
    RoomUpdated(RoomInfo),

    /// Room inventory changed; broadcast to everyone
    RoomListUpdated(RoomInfo),

    /// A room is gone; broadcast so clients can prune their lists
    RoomDeleted { room_id: Uuid },

    /// Acknowledges the caller's own departure
    RoomLeft {
        room_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        show_rating_modal: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_user_id: Option<i64>,
    },

    /// The host is gone and the room no longer exists
    RoomClosed {
        room_id: Uuid,
        reason: EndReason,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        show_rating_modal: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host_user_id: Option<i64>,
    },

    /// Presence totals; broadcast on connect, authenticate, and disconnect
    OnlineCount {
        total: usize,
        authenticated: usize,
        anonymous: usize,
        authenticated_users: Vec<OnlineUser>,
    },

    /// In-room chat message, fanned out to the room's participants
    NewMessage {
        id: Uuid,
        room_id: Uuid,
        sender_id: i64,
        sender_nickname: String,
        message: String,
        timestamp: DateTime<Utc>,
        #[serde(rename = "type")]
        kind: MessageKind,
    },

    /// The recipient's ledger balance changed
    PointsUpdated { balance: i64 },

    /// Someone sent the recipient a gift
    GiftReceived {
        sender_nickname: String,
        amount: i64,
        new_balance: i64,
    },

    /// A user-recoverable failure for the initiating connection
    Error { message: String },
}
