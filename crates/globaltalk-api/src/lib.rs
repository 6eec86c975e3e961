pub mod gift;
pub mod middleware;
pub mod points;
pub mod ratings;

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use globaltalk_db::Database;
use globaltalk_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
}

/// HTTP-surface errors. Admission failures map to 4xx and carry their
/// message verbatim; anything else collapses to an opaque 500.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid gift amount")]
    InvalidAmount,
    #[error("cannot send a gift to yourself")]
    SelfGift,
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("not enough points (balance {0})")]
    InsufficientBalance(i64),
    #[error("rating score must be between 1 and 5")]
    InvalidScore,
    #[error("no call record found")]
    CallNotFound,
    #[error("rating already submitted")]
    AlreadyRated,
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidAmount
            | ApiError::SelfGift
            | ApiError::InsufficientBalance(_)
            | ApiError::InvalidScore => StatusCode::BAD_REQUEST,
            ApiError::RecipientNotFound | ApiError::CallNotFound => StatusCode::NOT_FOUND,
            ApiError::AlreadyRated => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(e) = &self {
            error!("internal error: {:#}", e);
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}
