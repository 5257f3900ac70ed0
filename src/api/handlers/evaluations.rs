use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{Evaluation, StatusChange},
    error::Result,
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateEvaluationRequest {
    pub scout_id: Uuid,
    /// Defaults to the caller. Parents pass their linked player's id.
    pub player_id: Option<Uuid>,
    /// Price the player agreed to; rejected if the scout's price moved.
    #[validate(range(min = 0))]
    pub price_cents: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct GiveFreeRequest {
    pub player_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DenyRequest {
    #[validate(length(min = 1, max = 2000))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CompleteRequest {
    #[validate(length(min = 1, max = 20000))]
    pub notes: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelRequest {
    #[validate(length(max = 2000))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RequestResponse {
    pub evaluation: Evaluation,
    /// False when an active evaluation for the pair already existed.
    pub created: bool,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub evaluations: Vec<Evaluation>,
    pub total: usize,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<CreateEvaluationRequest>,
) -> Result<(StatusCode, Json<RequestResponse>)> {
    req.validate()?;

    let player_id = req.player_id.unwrap_or(user.profile.id);
    let outcome = state.service_context.evaluation_service
        .request(user.actor(), player_id, req.scout_id, req.price_cents)
        .await?;

    let status = if outcome.is_new() { StatusCode::CREATED } else { StatusCode::OK };
    let created = outcome.is_new();

    Ok((status, Json(RequestResponse {
        evaluation: outcome.into_evaluation(),
        created,
    })))
}

pub async fn give_free(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<GiveFreeRequest>,
) -> Result<(StatusCode, Json<RequestResponse>)> {
    let outcome = state.service_context.evaluation_service
        .give_free(user.actor(), req.player_id)
        .await?;

    let status = if outcome.is_new() { StatusCode::CREATED } else { StatusCode::OK };
    let created = outcome.is_new();

    Ok((status, Json(RequestResponse {
        evaluation: outcome.into_evaluation(),
        created,
    })))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>> {
    let evaluations = state.service_context.evaluation_service
        .list(user.actor(), params.limit, params.offset)
        .await?;

    let total = evaluations.len();
    Ok(Json(ListResponse { evaluations, total }))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Evaluation>> {
    let evaluation = state.service_context.evaluation_service
        .get(user.actor(), id)
        .await?;

    Ok(Json(evaluation))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StatusChange>>> {
    let history = state.service_context.evaluation_service
        .history(user.actor(), id)
        .await?;

    Ok(Json(history))
}

pub async fn confirm(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Evaluation>> {
    let evaluation = state.service_context.evaluation_service
        .confirm(user.actor(), id)
        .await?;

    Ok(Json(evaluation))
}

pub async fn deny(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<DenyRequest>,
) -> Result<Json<Evaluation>> {
    req.validate()?;

    let evaluation = state.service_context.evaluation_service
        .deny(user.actor(), id, req.reason)
        .await?;

    Ok(Json(evaluation))
}

pub async fn complete(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<Evaluation>> {
    req.validate()?;

    let evaluation = state.service_context.evaluation_service
        .complete(user.actor(), id, req.notes)
        .await?;

    Ok(Json(evaluation))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    req: Option<Json<CancelRequest>>,
) -> Result<Json<Evaluation>> {
    let req = req.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;

    let evaluation = state.service_context.evaluation_service
        .cancel(user.actor(), id, req.reason)
        .await?;

    Ok(Json(evaluation))
}

pub async fn checkout(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Evaluation>> {
    let evaluation = state.service_context.evaluation_service
        .checkout(user.actor(), id)
        .await?;

    Ok(Json(evaluation))
}
