/// Database row types — these map directly to SQLite rows.
/// Distinct from globaltalk-types wire models to keep the DB layer
/// independent.
use globaltalk_types::models::{CallType, EndReason, PointKind};

pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub nickname: String,
    pub profile_image: Option<String>,
    pub age_group: Option<i64>,
    pub gender: Option<String>,
    pub reputation: f64,
    pub created_at: String,
}

pub struct PointRow {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub kind: String,
    pub reason: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub created_at: String,
}

pub struct CallRow {
    pub call_id: String,
    pub host_user_id: i64,
    pub guest_user_id: i64,
    pub call_type: String,
    pub duration_secs: i64,
    pub end_reason: String,
    pub created_at: String,
}

/// Call record as produced by the settlement engine, ready for insertion.
#[derive(Debug, Clone)]
pub struct NewCallRecord {
    pub call_id: String,
    pub host_user_id: i64,
    pub guest_user_id: i64,
    pub call_type: CallType,
    pub language: String,
    pub topic: String,
    pub started_at: String,
    pub ended_at: String,
    pub duration_secs: i64,
    pub host_earnings: i64,
    pub guest_charge: i64,
    pub host_exited_early: bool,
    pub penalty_points: i64,
    pub guest_grace: bool,
    pub end_reason: EndReason,
}

/// A signed ledger movement belonging to a settlement, written in the same
/// transaction as its call record.
#[derive(Debug, Clone)]
pub struct SettlementEntry {
    pub user_id: i64,
    pub amount: i64,
    pub kind: PointKind,
    pub reason: &'static str,
}
