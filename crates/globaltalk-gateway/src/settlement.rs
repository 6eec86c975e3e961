use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use globaltalk_db::Database;
use globaltalk_db::models::{NewCallRecord, SettlementEntry};
use globaltalk_types::models::{CallType, PointKind};

use crate::rooms::EndedSession;

/// A host who ends a session before this mark forfeits earnings and pays the
/// flat penalty; the guest rides free for that session.
pub const EARLY_EXIT_THRESHOLD_SECS: i64 = 600;
/// A guest who bails out within this window (an accidental join) is not billed.
pub const GUEST_GRACE_SECS: i64 = 15;
pub const HOST_PENALTY_POINTS: i64 = 5;

/// Minimum balance to take a guest seat, and the floor of the session charge.
pub fn base_charge(call_type: CallType) -> i64 {
    match call_type {
        CallType::Audio => 10,
        CallType::Video => 40,
    }
}

pub fn per_minute(call_type: CallType) -> i64 {
    match call_type {
        CallType::Audio => 1,
        CallType::Video => 4,
    }
}

/// The monetary consequences of one finished session. Pure arithmetic over
/// (call type, duration, who left); ledger writes happen elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub host_earnings: i64,
    pub penalty_points: i64,
    pub guest_charge: i64,
    pub guest_grace: bool,
    pub host_exited_early: bool,
}

impl Quote {
    pub fn compute(call_type: CallType, duration_secs: i64, host_exit: bool) -> Quote {
        let host_exited_early = host_exit && duration_secs < EARLY_EXIT_THRESHOLD_SECS;
        let guest_grace = duration_secs <= GUEST_GRACE_SECS;

        let guest_charge = if guest_grace || host_exited_early {
            0
        } else {
            let minutes = (duration_secs + 59) / 60;
            (minutes * per_minute(call_type)).max(base_charge(call_type))
        };

        let (host_earnings, penalty_points) = if host_exited_early {
            (0, HOST_PENALTY_POINTS)
        } else {
            ((duration_secs / 60) * per_minute(call_type), 0)
        };

        Quote {
            host_earnings,
            penalty_points,
            guest_charge,
            guest_grace,
            host_exited_early,
        }
    }

    pub fn for_session(session: &EndedSession) -> Quote {
        Self::compute(
            session.call_type,
            session.duration_secs,
            session.end_reason.is_host_exit(),
        )
    }

    /// Ledger movements this quote implies. Zero amounts produce no entries.
    pub fn ledger_entries(&self, session: &EndedSession) -> Vec<SettlementEntry> {
        let mut entries = Vec::new();
        if self.host_earnings > 0 {
            entries.push(SettlementEntry {
                user_id: session.host.user_id,
                amount: self.host_earnings,
                kind: PointKind::Earn,
                reason: "call_earnings",
            });
        }
        if self.penalty_points > 0 {
            entries.push(SettlementEntry {
                user_id: session.host.user_id,
                amount: -self.penalty_points,
                kind: PointKind::Charge,
                reason: "early_exit_penalty",
            });
        }
        if self.guest_charge > 0 {
            entries.push(SettlementEntry {
                user_id: session.guest.user_id,
                amount: -self.guest_charge,
                kind: PointKind::Charge,
                reason: "call_charge",
            });
        }
        entries
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SettledSession {
    pub call_id: Uuid,
    pub quote: Quote,
}

const PERSIST_ATTEMPTS: u32 = 3;

/// Write the call record and its ledger entries, all-or-nothing. The room
/// transition has already happened by the time this runs, so a write failure
/// is retried with backoff rather than surfaced to the room — dropping a
/// settlement silently is the one failure mode this layer must not have.
pub async fn persist_session(db: &Arc<Database>, session: &EndedSession) -> Result<SettledSession> {
    let quote = Quote::for_session(session);
    let call_id = Uuid::new_v4();

    let record = NewCallRecord {
        call_id: call_id.to_string(),
        host_user_id: session.host.user_id,
        guest_user_id: session.guest.user_id,
        call_type: session.call_type,
        language: session.language.clone(),
        topic: session.topic.clone(),
        started_at: session.started_at.to_rfc3339(),
        ended_at: session.ended_at.to_rfc3339(),
        duration_secs: session.duration_secs,
        host_earnings: quote.host_earnings,
        guest_charge: quote.guest_charge,
        host_exited_early: quote.host_exited_early,
        penalty_points: quote.penalty_points,
        guest_grace: quote.guest_grace,
        end_reason: session.end_reason,
    };
    let entries = quote.ledger_entries(session);

    let mut last_err = None;
    for attempt in 1..=PERSIST_ATTEMPTS {
        let db = db.clone();
        let record = record.clone();
        let entries = entries.clone();
        match tokio::task::spawn_blocking(move || db.record_settlement(&record, &entries)).await {
            Ok(Ok(())) => {
                info!(
                    "settled call {}: host {} {:+}, guest {} {:+} ({}s, {})",
                    call_id,
                    session.host.user_id,
                    quote.host_earnings - quote.penalty_points,
                    session.guest.user_id,
                    -quote.guest_charge,
                    session.duration_secs,
                    session.end_reason.as_str(),
                );
                return Ok(SettledSession { call_id, quote });
            }
            Ok(Err(e)) => {
                warn!("settlement write attempt {} failed: {}", attempt, e);
                last_err = Some(e);
            }
            Err(e) => {
                warn!("settlement task attempt {} panicked: {}", attempt, e);
                last_err = Some(e.into());
            }
        }
        tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("settlement write failed")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use globaltalk_types::models::{EndReason, Participant, UserIdentity};

    fn participant(user_id: i64, is_host: bool) -> Participant {
        Participant {
            user_id,
            nickname: format!("user{user_id}"),
            connection_id: Uuid::new_v4(),
            is_host,
        }
    }

    fn session(call_type: CallType, duration_secs: i64, end_reason: EndReason) -> EndedSession {
        let started_at = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        EndedSession {
            room_id: Uuid::new_v4(),
            call_type,
            language: "english".into(),
            topic: "travel".into(),
            host: participant(1, true),
            guest: participant(2, false),
            started_at,
            ended_at: started_at + chrono::Duration::seconds(duration_secs),
            duration_secs,
            end_reason,
        }
    }

    #[test]
    fn audio_twelve_minutes_pays_both_ways() {
        let quote = Quote::compute(CallType::Audio, 12 * 60, false);
        assert_eq!(quote.host_earnings, 12);
        assert_eq!(quote.guest_charge, 12);
        assert_eq!(quote.penalty_points, 0);
        assert!(!quote.guest_grace);
        assert!(!quote.host_exited_early);
    }

    #[test]
    fn guest_grace_window_is_free() {
        let quote = Quote::compute(CallType::Video, 8, false);
        assert_eq!(quote.guest_charge, 0);
        assert_eq!(quote.host_earnings, 0);
        assert!(quote.guest_grace);

        // One second past the window the base charge kicks in.
        assert!(Quote::compute(CallType::Video, 15, false).guest_grace);
        let past = Quote::compute(CallType::Video, 16, false);
        assert!(!past.guest_grace);
        assert_eq!(past.guest_charge, 40);
    }

    #[test]
    fn host_early_exit_forfeits_earnings_and_spares_the_guest() {
        let quote = Quote::compute(CallType::Audio, 4 * 60, true);
        assert!(quote.host_exited_early);
        assert_eq!(quote.host_earnings, 0);
        assert_eq!(quote.penalty_points, HOST_PENALTY_POINTS);
        assert_eq!(quote.guest_charge, 0);
    }

    #[test]
    fn video_eleven_minutes_charges_by_the_minute() {
        let quote = Quote::compute(CallType::Video, 11 * 60, false);
        assert_eq!(quote.guest_charge, 44);
        assert_eq!(quote.host_earnings, 44);
    }

    #[test]
    fn guest_charge_never_drops_below_base() {
        // 2 minutes of audio would be 2 points per-minute; the base wins.
        let quote = Quote::compute(CallType::Audio, 2 * 60, false);
        assert_eq!(quote.guest_charge, 10);
        assert_eq!(quote.host_earnings, 2);
    }

    #[test]
    fn partial_minutes_round_against_the_guest_and_for_the_house() {
        // 12m30s: guest pays ceil(13), host earns floor(12).
        let quote = Quote::compute(CallType::Audio, 12 * 60 + 30, false);
        assert_eq!(quote.guest_charge, 13);
        assert_eq!(quote.host_earnings, 12);
    }

    #[test]
    fn host_exit_past_threshold_settles_normally() {
        let quote = Quote::compute(CallType::Audio, 700, true);
        assert!(!quote.host_exited_early);
        assert_eq!(quote.host_earnings, 11);
        assert_eq!(quote.guest_charge, 12);
        assert_eq!(quote.penalty_points, 0);
    }

    fn test_db() -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        for id in [1, 2] {
            db.upsert_user(&UserIdentity {
                user_id: id,
                email: format!("user{id}@example.com"),
                nickname: format!("user{id}"),
                profile_image_ref: None,
                age_group: None,
                gender: None,
            })
            .unwrap();
        }
        Arc::new(db)
    }

    #[tokio::test]
    async fn persisting_a_session_moves_points_and_records_the_call() {
        let db = test_db();
        let ended = session(CallType::Video, 11 * 60, EndReason::GuestLeft);

        let settled = persist_session(&db, &ended).await.unwrap();
        assert_eq!(settled.quote.guest_charge, 44);

        assert_eq!(db.balance(1).unwrap(), 44);
        assert_eq!(db.balance(2).unwrap(), -44);

        let call = db.latest_call_between(1, 2).unwrap().unwrap();
        assert_eq!(call.call_id, settled.call_id.to_string());
        assert_eq!(call.duration_secs, 660);
    }

    #[tokio::test]
    async fn grace_exit_records_the_call_without_ledger_movements() {
        let db = test_db();
        let ended = session(CallType::Video, 8, EndReason::GuestLeft);

        persist_session(&db, &ended).await.unwrap();

        assert_eq!(db.balance(1).unwrap(), 0);
        assert_eq!(db.balance(2).unwrap(), 0);
        assert!(db.latest_call_between(1, 2).unwrap().is_some());
    }

    #[tokio::test]
    async fn early_exit_penalty_is_the_only_movement() {
        let db = test_db();
        let ended = session(CallType::Audio, 4 * 60, EndReason::HostLeft);

        persist_session(&db, &ended).await.unwrap();

        assert_eq!(db.balance(1).unwrap(), -5);
        assert_eq!(db.balance(2).unwrap(), 0);
    }
}
