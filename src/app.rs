use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use http::{HeaderValue, Method, header};
use tower_cookies::CookieManagerLayer;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::{
    config::MEGABYTE,
    handlers,
    middleware_layer::{auth::require_auth, csrf::{CSRF_HEADER, verify_csrf}},
    state::AppState,
};

/// Builds the full HTTP application around `state`.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let config = state.config.clone();

    let cors = CorsLayer::new()
        .allow_origin(
            config
                .cors_origin
                .parse::<HeaderValue>()
                .context("Invalid CORS_ORIGIN")?,
        )
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::COOKIE,
            header::HeaderName::from_static(CSRF_HEADER),
        ])
        .allow_credentials(true)
        .expose_headers([header::HeaderName::from_static(CSRF_HEADER)])
        .max_age(Duration::from_secs(86400));

    // One token every two seconds per client IP, bursts of ten.
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(10)
            .use_headers()
            .finish()
            .context("Invalid rate limit configuration")?,
    );

    let auth_routes = Router::new()
        .route("/api/auth/register", post(handlers::auth::register))
        .route("/api/auth/login", post(handlers::auth::login))
        .layer(GovernorLayer::new(auth_governor_conf));

    let open_routes = Router::new()
        .route("/api/session/events", get(handlers::auth::session_events))
        .route("/api/shell", get(handlers::shell::get_shell))
        .route("/public/files/{key}", get(handlers::files::public_object));

    let protected_routes = Router::new()
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/shell/theme", post(handlers::shell::toggle_theme))
        .route(
            "/api/files",
            get(handlers::files::list_files).post(handlers::files::upload_file),
        )
        .route("/api/files/events", get(handlers::files::file_events))
        .route("/api/files/download", get(handlers::files::download_file))
        .route("/api/files/preview", get(handlers::files::preview_file))
        .route("/preview", get(handlers::files::preview_page))
        .route_layer(from_fn(verify_csrf))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    // Multipart framing on top of the largest accepted file.
    let body_limit = (config.max_upload_bytes + MEGABYTE) as usize;

    let app = Router::new()
        .merge(auth_routes)
        .merge(open_routes)
        .merge(protected_routes)
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false))
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(CookieManagerLayer::new())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state);

    Ok(app)
}
