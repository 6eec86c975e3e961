use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity payload carried by `authenticate`. Account creation and
/// credential checks live in the external auth service; the core only
/// mirrors this snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub user_id: i64,
    pub email: String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image_ref: Option<String>,
    #[serde(default)]
    pub age_group: Option<i64>,
    #[serde(default)]
    pub gender: Option<String>,
}

/// Audio or video call. The wire also accepts the legacy `voice` spelling
/// used by older clients when creating a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    #[serde(rename = "audio", alias = "voice")]
    Audio,
    #[serde(rename = "video")]
    Video,
}

impl CallType {
    pub fn as_str(self) -> &'static str {
        match self {
            CallType::Audio => "audio",
            CallType::Video => "video",
        }
    }
}

/// A user's seat in a room, snapshotted at join time. Later profile changes
/// do not propagate into an existing seat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: i64,
    pub nickname: String,
    pub connection_id: Uuid,
    pub is_host: bool,
}

/// Wire-visible room snapshot. The password of a private room is never
/// serialized out; clients only see the `is_private` flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: Uuid,
    pub title: String,
    pub host_id: i64,
    pub host_nickname: String,
    pub language: String,
    pub topic: String,
    pub call_type: CallType,
    pub max_participants: usize,
    pub is_private: bool,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_started_at: Option<DateTime<Utc>>,
}

/// How a session came to an end. Host reasons destroy the room, guest
/// reasons revert it to a waiting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    HostLeft,
    HostDisconnected,
    GuestLeft,
    GuestDisconnected,
}

impl EndReason {
    pub fn is_host_exit(self) -> bool {
        matches!(self, EndReason::HostLeft | EndReason::HostDisconnected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::HostLeft => "host_left",
            EndReason::HostDisconnected => "host_disconnected",
            EndReason::GuestLeft => "guest_left",
            EndReason::GuestDisconnected => "guest_disconnected",
        }
    }
}

/// Ledger entry kind. Balances are derived sums; corrections are new
/// offsetting entries, never updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointKind {
    Earn,
    Charge,
    Refund,
    AdminAdjust,
}

impl PointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PointKind::Earn => "earn",
            PointKind::Charge => "charge",
            PointKind::Refund => "refund",
            PointKind::AdminAdjust => "admin_adjust",
        }
    }
}

/// In-room chat message kind: typed text or a speech-to-text transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Stt,
}

/// Entry in the `onlineCount` roster of authenticated users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: i64,
    pub nickname: String,
    #[serde(default)]
    pub age_group: Option<i64>,
    #[serde(default)]
    pub gender: Option<String>,
}
