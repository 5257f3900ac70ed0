use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{Evaluation, Profile, Role},
    error::Result,
};

#[derive(Debug, Deserialize, Validate)]
pub struct SuspendRequest {
    #[validate(range(min = 1, max = 365))]
    pub days: i64,
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReasonRequest {
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RoleRequest {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub expired: Vec<Evaluation>,
    pub count: usize,
}

pub async fn suspend_scout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<SuspendRequest>,
) -> Result<Json<Profile>> {
    req.validate()?;

    let profile = state.service_context.profile_service
        .suspend_scout(user.actor(), id, req.days, req.reason)
        .await?;

    Ok(Json(profile))
}

pub async fn unsuspend_scout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Profile>> {
    let profile = state.service_context.profile_service
        .unsuspend_scout(user.actor(), id)
        .await?;

    Ok(Json(profile))
}

pub async fn revoke_scout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    req: Option<Json<ReasonRequest>>,
) -> Result<Json<Profile>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;

    let profile = state.service_context.profile_service
        .revoke_scout(user.actor(), id, req.reason)
        .await?;

    Ok(Json(profile))
}

pub async fn change_role(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<RoleRequest>,
) -> Result<Json<Profile>> {
    let profile = state.service_context.profile_service
        .change_role(user.actor(), id, req.role)
        .await?;

    // Sessions carry the old role's permissions.
    state.service_context.auth_service
        .invalidate_profile_sessions(id)
        .await?;

    Ok(Json(profile))
}

pub async fn link_parent(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path((parent_id, player_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    state.service_context.profile_service
        .link_parent(user.actor(), parent_id, player_id)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn refund_evaluation(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    req: Option<Json<ReasonRequest>>,
) -> Result<Json<Evaluation>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;

    let evaluation = state.service_context.evaluation_service
        .refund(user.actor(), id, req.reason)
        .await?;

    Ok(Json(evaluation))
}

pub async fn cancel_evaluation(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    req: Option<Json<ReasonRequest>>,
) -> Result<Json<Evaluation>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;

    let evaluation = state.service_context.evaluation_service
        .cancel(user.actor(), id, req.reason)
        .await?;

    Ok(Json(evaluation))
}

pub async fn retry_payout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Evaluation>> {
    let evaluation = state.service_context.evaluation_service
        .retry_payout(user.actor(), id)
        .await?;

    Ok(Json(evaluation))
}

pub async fn expire_unanswered(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
) -> Result<Json<ExpireResponse>> {
    let expired = state.service_context.evaluation_service
        .expire_unanswered(Utc::now())
        .await?;

    let count = expired.len();
    Ok(Json(ExpireResponse { expired, count }))
}
