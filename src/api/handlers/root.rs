use axum::{http::StatusCode, Json, response::IntoResponse};
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Got1 API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Game film evaluations from verified scouts",
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "auth": "/auth/login",
            "evaluations": "/api/evaluations",
            "notifications": "/api/notifications",
            "webhooks": "/api/payments/webhook/stripe",
            "admin": "/admin"
        }
    }))
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
