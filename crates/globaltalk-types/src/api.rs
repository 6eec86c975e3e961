use serde::{Deserialize, Serialize};

/// `POST /gift` body. The sender is taken from the caller's token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftRequest {
    pub recipient_user_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftResponse {
    pub message: String,
    pub new_balance: i64,
}

/// `POST /ratings` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRequest {
    pub rated_user_id: i64,
    pub rater_user_id: i64,
    pub rating_score: i64,
    #[serde(default)]
    pub rating_comment: Option<String>,
}

/// `GET /points/history` response. History rows keep the snake_case column
/// names the ledger table uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsHistoryResponse {
    pub message: String,
    pub data: PointsHistoryData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsHistoryData {
    pub total_points: i64,
    pub history: Vec<PointEntryView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointEntryView {
    pub id: i64,
    pub amount: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub reason: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub created_at: String,
}
