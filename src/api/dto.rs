use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::api::repo::UsageRecord;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub email: String,
    pub name: Option<String>,
    pub plan: String,
    pub api_key: Option<String>,
    pub created_at: OffsetDateTime,
    pub usage: UsageSummary,
}

#[derive(Debug, Serialize)]
pub struct UsageSummary {
    pub total: i64,
    pub recent: Vec<UsageRecord>,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub endpoint: Option<String>,
}
