use axum::{Extension, Json, extract::State, response::IntoResponse};

use globaltalk_db::models::PointRow;
use globaltalk_types::api::{PointEntryView, PointsHistoryData, PointsHistoryResponse};

use crate::middleware::Claims;
use crate::{ApiError, AppState};

/// `GET /points/history` — the caller's ledger, newest first, with the
/// derived total.
pub async fn points_history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = claims.sub;

    let (total_points, rows) =
        tokio::task::spawn_blocking(move || -> Result<(i64, Vec<PointRow>), ApiError> {
            Ok((db.balance(user_id)?, db.point_history(user_id)?))
        })
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;

    let history = rows
        .into_iter()
        .map(|row| PointEntryView {
            id: row.id,
            amount: row.amount,
            kind: row.kind,
            reason: row.reason,
            reference_type: row.reference_type,
            reference_id: row.reference_id,
            created_at: row.created_at,
        })
        .collect();

    Ok(Json(PointsHistoryResponse {
        message: "points history".into(),
        data: PointsHistoryData {
            total_points,
            history,
        },
    }))
}
