use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::{
    api::state::AppState,
    error::{AppError, Result},
};

/// Signed processor deliveries. Errors answer non-2xx so the processor
/// retries; replays of processed events answer 200.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Missing Stripe-Signature header".to_string()))?;

    let outcome = state.service_context.evaluation_service
        .handle_webhook(&body, signature)
        .await?;

    Ok(Json(json!({
        "received": true,
        "outcome": outcome,
    })))
}
