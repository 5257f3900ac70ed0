use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    api::{middleware::auth::CurrentUser, state::AppState},
    domain::{CreateOfferRequest, PlayerOffer, Profile},
    error::Result,
};

#[derive(Debug, Deserialize, Validate)]
pub struct PricingRequest {
    #[validate(range(min = 1))]
    pub price_cents: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PayoutAccountRequest {
    #[validate(length(min = 1, max = 255))]
    pub account_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OfferRequest {
    #[validate(length(min = 1, max = 200))]
    pub school: String,
    #[validate(length(max = 50))]
    pub division: Option<String>,
    pub offered_on: Option<NaiveDate>,
}

pub async fn me(Extension(user): Extension<CurrentUser>) -> Json<Profile> {
    Json(user.profile)
}

pub async fn set_pricing(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<PricingRequest>,
) -> Result<Json<Profile>> {
    req.validate()?;

    let profile = state.service_context.profile_service
        .set_pricing(user.actor(), req.price_cents)
        .await?;

    Ok(Json(profile))
}

pub async fn set_payout_account(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<PayoutAccountRequest>,
) -> Result<Json<Profile>> {
    req.validate()?;

    let profile = state.service_context.profile_service
        .set_payout_account(user.actor(), req.account_id)
        .await?;

    Ok(Json(profile))
}

pub async fn list_offers(
    State(state): State<AppState>,
    Extension(_user): Extension<CurrentUser>,
    Path(player_id): Path<Uuid>,
) -> Result<Json<Vec<PlayerOffer>>> {
    let offers = state.service_context.profile_service
        .list_offers(player_id)
        .await?;

    Ok(Json(offers))
}

pub async fn add_offer(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(player_id): Path<Uuid>,
    Json(req): Json<OfferRequest>,
) -> Result<(StatusCode, Json<PlayerOffer>)> {
    req.validate()?;

    let offer = state.service_context.profile_service
        .add_offer(
            user.actor(),
            player_id,
            CreateOfferRequest {
                school: req.school,
                division: req.division,
                offered_on: req.offered_on,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(offer)))
}
