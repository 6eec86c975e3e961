use axum::{Extension, Json, extract::State};
use tracing::info;

use globaltalk_types::api::{GiftRequest, GiftResponse};
use globaltalk_types::events::ServerEvent;

use crate::middleware::Claims;
use crate::{ApiError, AppState};

/// The fixed menu of gift sizes. Anything else is rejected outright.
pub const GIFT_AMOUNTS: [i64; 4] = [50, 100, 200, 300];

/// `POST /gift` — move points from the caller to another user as one atomic
/// pair of ledger entries, then nudge both parties' live connections. The
/// notifications are best-effort; the transfer stands even if nobody is
/// online to see it.
pub async fn send_gift(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<GiftRequest>,
) -> Result<Json<GiftResponse>, ApiError> {
    if !GIFT_AMOUNTS.contains(&req.amount) {
        return Err(ApiError::InvalidAmount);
    }
    let sender_id = claims.sub;
    if sender_id == req.recipient_user_id {
        return Err(ApiError::SelfGift);
    }

    let db = state.db.clone();
    let recipient_id = req.recipient_user_id;
    let amount = req.amount;
    let (sender_nickname, sender_balance, recipient_balance) =
        tokio::task::spawn_blocking(move || -> Result<(String, i64, i64), ApiError> {
            if db.get_user(recipient_id)?.is_none() {
                return Err(ApiError::RecipientNotFound);
            }

            let balance = db.balance(sender_id)?;
            if balance < amount {
                return Err(ApiError::InsufficientBalance(balance));
            }

            let nickname = db.get_nickname(sender_id).unwrap_or_else(|_| "Unknown".into());
            let (sender_balance, recipient_balance) =
                db.transfer_gift(sender_id, recipient_id, amount)?;

            Ok((nickname, sender_balance, recipient_balance))
        })
        .await
        .map_err(|e| ApiError::Internal(e.into()))??;

    info!(
        "gift sent: {} -> {} ({} points)",
        sender_id, recipient_id, amount
    );

    state
        .dispatcher
        .send_to_user(
            sender_id,
            ServerEvent::PointsUpdated {
                balance: sender_balance,
            },
        )
        .await;
    state
        .dispatcher
        .send_to_user(
            recipient_id,
            ServerEvent::GiftReceived {
                sender_nickname,
                amount,
                new_balance: recipient_balance,
            },
        )
        .await;

    Ok(Json(GiftResponse {
        message: "gift sent".into(),
        new_balance: sender_balance,
    }))
}
