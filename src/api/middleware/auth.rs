use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use crate::{
    api::state::AppState,
    auth::SESSION_COOKIE,
    domain::{Actor, Profile, Role},
    error::AppError,
};

#[derive(Clone)]
pub struct CurrentUser {
    pub profile: Profile,
}

impl CurrentUser {
    pub fn actor(&self) -> Actor {
        Actor::from_profile(&self.profile)
    }
}

/// Session token from the cookie, or from `Authorization: Bearer` for
/// non-browser clients.
fn session_token(jar: &CookieJar, request: &Request) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

async fn authenticate(state: &AppState, token: Option<String>) -> Result<Profile, AppError> {
    let token = token.ok_or(AppError::Unauthorized)?;

    let session = state
        .service_context
        .auth_service
        .validate_session(&token)
        .await?
        .ok_or(AppError::Unauthorized)?;

    state
        .service_context
        .profile_repo
        .find_by_id(session.profile_id)
        .await?
        .ok_or(AppError::Unauthorized)
}

pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Read the token up front: the request must not be borrowed across an await.
    let token = session_token(&jar, &request);
    let profile = authenticate(&state, token).await?;

    request.extensions_mut().insert(CurrentUser { profile });

    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Read the token up front: the request must not be borrowed across an await.
    let token = session_token(&jar, &request);
    let profile = authenticate(&state, token).await?;

    if profile.role != Role::Admin {
        return Err(AppError::Forbidden);
    }

    request.extensions_mut().insert(CurrentUser { profile });

    Ok(next.run(request).await)
}
