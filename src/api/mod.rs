pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        // Auth routes
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/logout", post(handlers::auth::logout))

        // API routes
        .nest("/api", api_routes(app_state.clone()))

        // Admin routes
        .nest("/admin", admin_routes(app_state.clone()))

        .with_state(app_state)

        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/evaluations", evaluation_routes(state.clone()))
        .nest("/notifications", notification_routes(state.clone()))
        .nest("/me", me_routes(state.clone()))
        .nest("/players", player_routes(state.clone()))
        .nest("/payments", payment_routes())
}

fn evaluation_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::evaluations::list).post(handlers::evaluations::create))
        .route("/free", post(handlers::evaluations::give_free))
        .route("/:id", get(handlers::evaluations::get))
        .route("/:id/history", get(handlers::evaluations::history))
        .route("/:id/confirm", post(handlers::evaluations::confirm))
        .route("/:id/deny", post(handlers::evaluations::deny))
        .route("/:id/complete", post(handlers::evaluations::complete))
        .route("/:id/cancel", post(handlers::evaluations::cancel))
        .route("/:id/checkout", post(handlers::evaluations::checkout))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

fn notification_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::notifications::list))
        .route("/:id/read", post(handlers::notifications::mark_read))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

fn me_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::profiles::me))
        .route("/pricing", put(handlers::profiles::set_pricing))
        .route("/payout-account", put(handlers::profiles::set_payout_account))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

fn player_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/:id/offers",
            get(handlers::profiles::list_offers).post(handlers::profiles::add_offer),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

fn payment_routes() -> Router<AppState> {
    // Authenticated by the processor's signature, not a session.
    Router::new()
        .route("/webhook/stripe", post(handlers::payments::stripe_webhook))
}

fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/scouts/:id/suspend", post(handlers::admin::suspend_scout))
        .route("/scouts/:id/unsuspend", post(handlers::admin::unsuspend_scout))
        .route("/scouts/:id/revoke", post(handlers::admin::revoke_scout))
        .route("/profiles/:id/role", put(handlers::admin::change_role))
        .route("/parents/:parent_id/players/:player_id", post(handlers::admin::link_parent))
        .route("/evaluations/expire", post(handlers::admin::expire_unanswered))
        .route("/evaluations/:id/refund", post(handlers::admin::refund_evaluation))
        .route("/evaluations/:id/cancel", post(handlers::admin::cancel_evaluation))
        .route("/evaluations/:id/retry-payout", post(handlers::admin::retry_payout))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_admin,
        ))
        .with_state(state)
}
