use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::session::Session,
    state::AppState,
};

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "session_id";

/// Extracts the session token from the request cookies.
pub fn extract_session_token(cookies: &Cookies) -> Option<Uuid> {
    cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

/// Resolves the caller's session, if any. Missing, malformed, unknown and
/// expired ids all read as signed out.
pub async fn current_session(
    state: &AppState,
    cookies: &Cookies,
) -> Result<Option<(Uuid, Session)>> {
    let Some(session_id) = extract_session_token(cookies) else {
        return Ok(None);
    };

    let session = state.sessions.current_session(session_id).await?;
    Ok(session.map(|session| (session_id, session)))
}

/// A middleware that requires a valid session to be present.
///
/// On success the `Session` is inserted as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response> {
    tracing::debug!("🔐 Checking authentication...");

    let Some((session_id, session)) = current_session(&state, &cookies).await? else {
        tracing::warn!("❌ No valid session for {}", request.uri().path());
        return Err(AppError::Authentication("Sign in required".to_string()));
    };

    tracing::debug!("✅ User authenticated: {} (session {})", session.user_id, session_id);

    request.extensions_mut().insert(session);

    Ok(next.run(request).await)
}
