use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A Redis error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Input rejected before any remote write.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The object store failed to upload, download or resolve a binary.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The record store failed to insert or query metadata.
    #[error("Record error: {0}")]
    Record(String),

    /// The session provider could not be reached.
    #[error("Session provider error: {0}")]
    Auth(String),

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A download action failed.
    #[error("Failed to download file: {0}")]
    Download(String),

    /// A preview action failed.
    #[error("Failed to view PDF: {0}")]
    Preview(String),

    /// A multipart error.
    #[error("Multipart error: {0}")]
    Multipart(String),

    /// A template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// A short machine-readable tag the front end uses to pick a notification style.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Storage(_) => "storage",
            AppError::Record(_) => "record",
            AppError::Auth(_) => "auth",
            AppError::Authentication(_) => "authentication",
            AppError::Unauthorized => "forbidden",
            AppError::NotFound => "not_found",
            AppError::Download(_) => "download",
            AppError::Preview(_) => "preview",
            AppError::Multipart(_) => "validation",
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Redis(_)
            | AppError::Io(_)
            | AppError::Template(_)
            | AppError::Internal(_) => "internal",
        }
    }

    /// Reclassifies low-level database failures as record store failures.
    pub fn into_record(self) -> AppError {
        match self {
            AppError::Database(_) | AppError::Pool(_) => AppError::Record(self.to_string()),
            other => other,
        }
    }

    /// Reclassifies low-level failures raised while talking to the session backends.
    pub fn into_auth(self) -> AppError {
        match self {
            AppError::Database(_) | AppError::Pool(_) | AppError::Redis(_) => {
                AppError::Auth(self.to_string())
            }
            other => other,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Database pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Redis(ref e) => {
                tracing::error!("Redis error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Cache error".to_string())
            }

            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "File system error".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Storage(ref msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg.clone())
            }

            AppError::Record(ref msg) => {
                tracing::error!("Record error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone())
            }

            AppError::Auth(ref msg) => {
                tracing::error!("Session provider error: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Session service unavailable".to_string(),
                )
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::Download(_) | AppError::Preview(_) => {
                tracing::warn!("{}", self);
                (StatusCode::BAD_GATEWAY, self.to_string())
            }

            AppError::Multipart(ref msg) => {
                tracing::warn!("Multipart error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Template(ref e) => {
                tracing::error!("Template error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message,
            "kind": kind
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error","kind":"internal"}"#.to_string());

        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
