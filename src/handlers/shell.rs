use axum::{extract::State, http::StatusCode, response::Response};
use tower_cookies::Cookies;

use crate::{
    error::Result,
    handlers::{auth::create_secure_cookie, files::json_response},
    middleware_layer::auth::current_session,
    models::theme::{THEME_COOKIE, Theme},
    services::shell::Shell,
    state::AppState,
};

/// A year; the theme outlives any session.
const THEME_COOKIE_MAX_AGE_SECS: i64 = 365 * 86400;

async fn load_shell(state: &AppState, cookies: &Cookies) -> Result<Shell> {
    let session = current_session(state, cookies)
        .await?
        .map(|(_, session)| session);
    let theme = Theme::from_cookie(cookies.get(THEME_COOKIE).as_ref().map(|c| c.value()));
    Ok(Shell::new(session, theme))
}

/// Which view to show (`sign_in` or `workspace`) and the current theme.
pub async fn get_shell(State(state): State<AppState>, cookies: Cookies) -> Result<Response> {
    let shell = load_shell(&state, &cookies).await?;
    json_response(StatusCode::OK, &shell.state())
}

/// Flips between light and dark and remembers the choice in a cookie.
pub async fn toggle_theme(State(state): State<AppState>, cookies: Cookies) -> Result<Response> {
    let mut shell = load_shell(&state, &cookies).await?;
    let theme = shell.toggle_theme();

    cookies.add(create_secure_cookie(
        THEME_COOKIE,
        theme.as_str().to_string(),
        THEME_COOKIE_MAX_AGE_SECS,
        state.config.secure_cookies,
    ));
    tracing::debug!("🎨 Theme switched to {}", theme.as_str());

    json_response(StatusCode::OK, &shell.state())
}
