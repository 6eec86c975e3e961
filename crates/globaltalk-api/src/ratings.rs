use axum::{Json, extract::State};
use tracing::info;

use globaltalk_types::api::RatingRequest;

use crate::{ApiError, AppState};

/// `POST /ratings` — rate the counterpart of the most recent call between
/// the pair. One rating per (call, rater); resubmission is a conflict.
/// Side effects ride in the same transaction: a reputation delta for the
/// rated user, a fixed reviewer reward, and a bonus on a perfect score.
pub async fn submit_rating(
    State(state): State<AppState>,
    Json(req): Json<RatingRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !(1..=5).contains(&req.rating_score) {
        return Err(ApiError::InvalidScore);
    }

    let db = state.db.clone();
    tokio::task::spawn_blocking(move || -> Result<(), ApiError> {
        let call = db
            .latest_call_between(req.rated_user_id, req.rater_user_id)?
            .ok_or(ApiError::CallNotFound)?;

        let reputation_delta = match req.rating_score {
            5 => 0.1,
            4 => 0.05,
            s if s <= 2 => -0.1,
            _ => 0.0,
        };

        let inserted = db.record_rating(
            &call.call_id,
            req.rater_user_id,
            req.rated_user_id,
            req.rating_score,
            req.rating_comment.as_deref(),
            reputation_delta,
            req.rating_score == 5,
        )?;
        if !inserted {
            return Err(ApiError::AlreadyRated);
        }

        info!(
            "rating saved: call={} rater={} rated={} score={}",
            call.call_id, req.rater_user_id, req.rated_user_id, req.rating_score
        );
        Ok(())
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))??;

    Ok(Json(serde_json::json!({ "message": "rating submitted" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AppStateInner;
    use axum::http::StatusCode;
    use globaltalk_db::Database;
    use globaltalk_db::models::NewCallRecord;
    use globaltalk_gateway::dispatcher::Dispatcher;
    use globaltalk_types::models::{CallType, EndReason, UserIdentity};
    use std::sync::Arc;

    fn state_with_call() -> AppState {
        let db = Database::open_in_memory().unwrap();
        for (id, nickname) in [(1, "mina"), (2, "james")] {
            db.upsert_user(&UserIdentity {
                user_id: id,
                email: format!("{nickname}@example.com"),
                nickname: nickname.to_string(),
                profile_image_ref: None,
                age_group: None,
                gender: None,
            })
            .unwrap();
        }
        db.record_settlement(
            &NewCallRecord {
                call_id: "call-1".into(),
                host_user_id: 1,
                guest_user_id: 2,
                call_type: CallType::Audio,
                language: "english".into(),
                topic: "travel".into(),
                started_at: "2026-01-01T00:00:00Z".into(),
                ended_at: "2026-01-01T00:12:00Z".into(),
                duration_secs: 720,
                host_earnings: 12,
                guest_charge: 12,
                host_exited_early: false,
                penalty_points: 0,
                guest_grace: false,
                end_reason: EndReason::GuestLeft,
            },
            &[],
        )
        .unwrap();
        Arc::new(AppStateInner {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
        })
    }

    fn request(score: i64) -> RatingRequest {
        RatingRequest {
            rated_user_id: 1,
            rater_user_id: 2,
            rating_score: score,
            rating_comment: None,
        }
    }

    #[tokio::test]
    async fn first_rating_succeeds_second_conflicts() {
        let state = state_with_call();

        submit_rating(State(state.clone()), Json(request(5)))
            .await
            .unwrap();

        let err = submit_rating(State(state.clone()), Json(request(4)))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        // Rewards from the first submission stand: reviewer +1, perfect
        // score bonus +1 on top of the host's reputation bump.
        assert_eq!(state.db.balance(2).unwrap(), 1);
        assert_eq!(state.db.balance(1).unwrap(), 1);
    }

    #[tokio::test]
    async fn rating_without_a_call_is_404() {
        let state = state_with_call();
        let err = submit_rating(
            State(state),
            Json(RatingRequest {
                rated_user_id: 1,
                rater_user_id: 3,
                rating_score: 5,
                rating_comment: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn out_of_range_scores_are_rejected() {
        let state = state_with_call();
        for score in [0, 6] {
            let err = submit_rating(State(state.clone()), Json(request(score)))
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }
}
