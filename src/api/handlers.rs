use axum::{extract::State, Json};
use time::{Duration, OffsetDateTime};
use tracing::{instrument, warn};

use crate::api::dto::{DashboardResponse, TrackRequest, UsageSummary};
use crate::api::repo::UsageRecord;
use crate::auth::dto::AckResponse;
use crate::auth::extractors::CurrentUser;
use crate::auth::repo_types::User;
use crate::error::ApiError;
use crate::state::AppState;

const USAGE_WINDOW_DAYS: i64 = 30;
const RECENT_USAGE_LIMIT: i64 = 10;

#[instrument(skip(state))]
pub async fn dashboard(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<DashboardResponse>, ApiError> {
    let user_id = identity.user_id();
    let user = User::find_by_id(&state.db, user_id).await?.ok_or_else(|| {
        // A session can outlive its user row; treat it as unauthenticated.
        warn!(%user_id, "authenticated identity has no user row");
        ApiError::Unauthenticated
    })?;

    let since = OffsetDateTime::now_utc() - Duration::days(USAGE_WINDOW_DAYS);
    let total = UsageRecord::count_since(&state.db, user_id, since).await?;
    let recent = UsageRecord::recent(&state.db, user_id, RECENT_USAGE_LIMIT).await?;

    Ok(Json(DashboardResponse {
        email: user.email,
        name: user.name,
        plan: user.plan,
        api_key: user.api_key,
        created_at: user.created_at,
        usage: UsageSummary { total, recent },
    }))
}

#[instrument(skip(state, payload))]
pub async fn track(
    State(state): State<AppState>,
    CurrentUser(identity): CurrentUser,
    Json(payload): Json<TrackRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let endpoint = payload.endpoint.as_deref().unwrap_or("/api/track");
    UsageRecord::insert(&state.db, identity.user_id(), endpoint).await?;
    Ok(Json(AckResponse { success: true }))
}
