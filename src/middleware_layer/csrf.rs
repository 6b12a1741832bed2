use axum::{
    Extension,
    body::Body,
    extract::Request,
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{crypto::csrf::tokens_match, error::AppError, models::session::Session};

/// Header a client echoes the session's CSRF token in.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// A middleware that verifies the CSRF token.
///
/// Runs after `require_auth`; the expected token comes from the session.
pub async fn verify_csrf(
    Extension(session): Extension<Session>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if req.method() == Method::GET
        || req.method() == Method::HEAD
        || req.method() == Method::OPTIONS
    {
        tracing::debug!("✅ CSRF exemption: {} request", req.method());
        return next.run(req).await;
    }

    let presented = match req.headers().get(CSRF_HEADER) {
        Some(token) => match token.to_str() {
            Ok(t) => t.to_string(),
            Err(_) => {
                tracing::warn!("❌ CSRF: malformed header");
                return AppError::Unauthorized.into_response();
            }
        },
        None => {
            tracing::warn!("❌ CSRF: x-csrf-token header missing");
            return AppError::Unauthorized.into_response();
        }
    };

    if !tokens_match(&session.csrf_token, &presented) {
        tracing::warn!("❌ CSRF: token mismatch for user {}", session.user_id);
        return AppError::Unauthorized.into_response();
    }

    tracing::debug!("✅ CSRF token valid");
    next.run(req).await
}
