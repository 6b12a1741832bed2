use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, sleep_until};
use tower_cookies::cookie::time::Duration;
use tower_cookies::{Cookie, Cookies};

use crate::{
    error::{AppError, Result},
    middleware_layer::auth::{SESSION_COOKIE, current_session, extract_session_token},
    models::session::{IssuedSession, Session, SessionChange},
    state::AppState,
    validation::auth::Credentials,
};

/// Name of the cookie mirroring the session's CSRF token for the front end.
pub const CSRF_COOKIE: &str = "csrf_token";

/// The response payload for authentication-related requests.
#[derive(Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

/// Creates a cookie scoped to the whole site.
///
/// Every cookie but the CSRF token is HTTP-only; the front end must read that one.
pub fn create_secure_cookie(
    name: &'static str,
    value: String,
    max_age_secs: i64,
    secure: bool,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(name, value);

    if name != CSRF_COOKIE {
        cookie.set_http_only(true);
    }

    if secure {
        cookie.set_secure(true);
    }

    cookie.set_same_site(tower_cookies::cookie::SameSite::Lax);
    cookie.set_max_age(Duration::seconds(max_age_secs));
    cookie.set_path("/");

    cookie
}

fn remove_cookie(cookies: &Cookies, name: &'static str) {
    let mut cookie = Cookie::new(name, "");
    cookie.set_max_age(Duration::seconds(0));
    cookie.set_path("/");
    cookies.remove(cookie);
}

fn set_session_cookies(state: &AppState, cookies: &Cookies, issued: &IssuedSession) {
    let max_age = state.config.session_ttl_secs() as i64;
    let secure = state.config.secure_cookies;

    cookies.add(create_secure_cookie(
        SESSION_COOKIE,
        issued.id.to_string(),
        max_age,
        secure,
    ));
    cookies.add(create_secure_cookie(
        CSRF_COOKIE,
        issued.session.csrf_token.clone(),
        max_age,
        secure,
    ));
}

/// Handles user registration.
pub async fn register(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<Credentials>,
) -> Result<Response> {
    let credentials = payload.validated()?;
    tracing::info!("📝 Register attempt: {}", credentials.email);

    let issued = state
        .sessions
        .sign_up(&credentials.email, &credentials.password)
        .await?;
    set_session_cookies(&state, &cookies, &issued);

    tracing::info!("✅ User registered: {}", issued.session.user_id);

    let response = AuthResponse {
        success: true,
        message: "Registration successful. Welcome!".to_string(),
        csrf_token: Some(issued.session.csrf_token),
    };

    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Handles user login.
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    Json(payload): Json<Credentials>,
) -> Result<Response> {
    let credentials = payload.validated()?;
    tracing::info!("🔐 Login attempt: {}", credentials.email);

    let issued = state
        .sessions
        .sign_in(&credentials.email, &credentials.password)
        .await?;
    set_session_cookies(&state, &cookies, &issued);

    tracing::info!("✅ User logged in: {}", issued.session.user_id);

    let response = AuthResponse {
        success: true,
        message: "Login successful".to_string(),
        csrf_token: Some(issued.session.csrf_token),
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

/// Handles user logout.
pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    cookies: Cookies,
) -> Result<Response> {
    tracing::info!("👋 Logout for user: {}", session.user_id);

    let session_id = extract_session_token(&cookies).ok_or(AppError::Unauthorized)?;
    state.sessions.sign_out(session_id).await?;

    remove_cookie(&cookies, SESSION_COOKIE);
    remove_cookie(&cookies, CSRF_COOKIE);

    tracing::info!("✅ User logged out: {}", session.user_id);

    let response = AuthResponse {
        success: true,
        message: "Logout successful".to_string(),
        csrf_token: None,
    };

    Ok((StatusCode::OK, Json(response)).into_response())
}

fn session_event(change: SessionChange) -> Event {
    let payload = sonic_rs::json!({ "state": change.as_str(), "signed_in": change.is_active() });
    Event::default()
        .event("session")
        .data(sonic_rs::to_string(&payload).unwrap_or_default())
}

/// `Session::is_expired` is strict, so the expiry lookup runs just past `expires_at`.
const EXPIRY_SLACK: std::time::Duration = std::time::Duration::from_millis(50);

/// Streams the caller's session state: the current state first, then every
/// change to the same session.
///
/// A signed-in session is looked up again once it reaches `expires_at`; the
/// provider announces the expiry and it is forwarded like any other change.
pub async fn session_events(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    // Subscribe first so a change racing the lookup below is still delivered.
    let receiver = state.sessions.subscribe();
    let current = current_session(&state, &cookies).await?;
    let watched = extract_session_token(&cookies);

    let initial = if current.is_some() {
        SessionChange::SignedIn
    } else {
        SessionChange::SignedOut
    };

    let expiry = current.as_ref().map(|(_, session)| {
        let remaining = (session.expires_at - Utc::now()).to_std().unwrap_or_default();
        Instant::now() + remaining + EXPIRY_SLACK
    });
    let sessions = state.sessions.clone();

    let updates = stream::unfold((receiver, expiry), move |(mut receiver, mut expiry)| {
        let sessions = sessions.clone();
        async move {
            loop {
                let received = match expiry {
                    Some(deadline) => tokio::select! {
                        received = receiver.recv() => received,
                        _ = sleep_until(deadline) => {
                            expiry = None;
                            if let Some(session_id) = watched {
                                if let Err(e) = sessions.current_session(session_id).await {
                                    tracing::warn!("❌ Expiry lookup failed: {}", e);
                                }
                            }
                            continue;
                        }
                    },
                    None => receiver.recv().await,
                };

                match received {
                    Ok(event) if Some(event.session_id) == watched => {
                        if !event.change.is_active() {
                            expiry = None;
                        }
                        return Some((
                            Ok::<_, Infallible>(session_event(event.change)),
                            (receiver, expiry),
                        ));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Session stream lagged by {} events", missed);
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        }
    });

    let events = stream::once(async move { Ok::<_, Infallible>(session_event(initial)) }).chain(updates);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
