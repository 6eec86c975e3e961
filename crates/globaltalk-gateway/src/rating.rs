use crate::rooms::EndedSession;
use crate::settlement::EARLY_EXIT_THRESHOLD_SECS;

/// Reviews are one-directional: the guest side rates the host, never the
/// reverse. The offer rides on the `roomLeft` / `roomClosed` event of
/// whichever guest the session end leaves behind or sends away.
#[derive(Debug, Clone, Copy)]
pub struct RatingOffer {
    pub host_user_id: i64,
}

/// Offer a rating only for sessions that ran the full early-exit threshold
/// and actually produced a call record (`settled`). Anything shorter, or any
/// session whose settlement never landed, offers nothing.
pub fn offer_for(session: &EndedSession, settled: bool) -> Option<RatingOffer> {
    if !settled || session.duration_secs < EARLY_EXIT_THRESHOLD_SECS {
        return None;
    }
    Some(RatingOffer {
        host_user_id: session.host.user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use globaltalk_types::models::{CallType, EndReason, Participant};
    use uuid::Uuid;

    fn session(duration_secs: i64) -> EndedSession {
        let started_at = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        EndedSession {
            room_id: Uuid::new_v4(),
            call_type: CallType::Audio,
            language: "english".into(),
            topic: "free".into(),
            host: Participant {
                user_id: 1,
                nickname: "mina".into(),
                connection_id: Uuid::new_v4(),
                is_host: true,
            },
            guest: Participant {
                user_id: 2,
                nickname: "james".into(),
                connection_id: Uuid::new_v4(),
                is_host: false,
            },
            started_at,
            ended_at: started_at + chrono::Duration::seconds(duration_secs),
            duration_secs,
            end_reason: EndReason::GuestLeft,
        }
    }

    #[test]
    fn long_sessions_offer_a_rating_about_the_host() {
        let offer = offer_for(&session(11 * 60), true).unwrap();
        assert_eq!(offer.host_user_id, 1);
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(offer_for(&session(600), true).is_some());
        assert!(offer_for(&session(599), true).is_none());
    }

    #[test]
    fn unsettled_sessions_offer_nothing() {
        assert!(offer_for(&session(11 * 60), false).is_none());
    }
}
