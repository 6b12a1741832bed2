use std::convert::Infallible;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State, multipart::Field},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        Html, IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    Extension,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Duration, timeout};
use tower_cookies::Cookies;

use crate::{
    error::{AppError, Result},
    models::{
        file::FileListItem,
        session::Session,
        theme::{THEME_COOKIE, Theme},
    },
    services::{preview::PreviewSurface, upload::FileInput},
    state::AppState,
    validation::upload::size_limit_message,
};

/// How long one multipart field may take to arrive.
const UPLOAD_TIMEOUT: u64 = 300;

#[derive(Deserialize)]
pub struct DownloadQuery {
    pub path: String,
    /// The name to save the file under; defaults to the storage key.
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    pub path: String,
    /// Set by the front end after the embedded viewer failed to load.
    #[serde(default)]
    pub failed: bool,
}

#[derive(Serialize)]
struct ListFilesResponse {
    files: Vec<FileListItem>,
    count: usize,
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Result<Response> {
    let body = sonic_rs::to_string(body)
        .map_err(|e| AppError::Internal(format!("Response serialization failed: {}", e)))?;
    Ok((status, [(header::CONTENT_TYPE, "application/json")], body).into_response())
}

/// Lists every shared file, newest first. Calling it again after an error is the retry.
pub async fn list_files(State(state): State<AppState>) -> Result<Response> {
    let records = state.workspace.listing().current_or_refresh().await?;
    tracing::debug!("📂 Listing {} files", records.len());

    let files: Vec<FileListItem> = records.into_iter().map(FileListItem::from).collect();
    let count = files.len();
    json_response(StatusCode::OK, &ListFilesResponse { files, count })
}

/// Reads the file field chunk by chunk, refusing to buffer past the limit.
async fn read_file_field(field: &mut Field<'_>, max_bytes: u64) -> Result<Bytes> {
    let mut buffer = Vec::new();
    loop {
        let chunk = match timeout(Duration::from_secs(UPLOAD_TIMEOUT), field.chunk()).await {
            Ok(Ok(Some(chunk))) => chunk,
            Ok(Ok(None)) => break,
            Ok(Err(e)) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(AppError::Validation(size_limit_message(max_bytes)));
            }
            Ok(Err(e)) => return Err(AppError::Multipart(format!("file: {}", e))),
            Err(_) => return Err(AppError::Multipart("Upload timeout exceeded".into())),
        };

        if (buffer.len() + chunk.len()) as u64 > max_bytes {
            return Err(AppError::Validation(size_limit_message(max_bytes)));
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(buffer))
}

/// Accepts a multipart form with a `title` text field and a `file` field.
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    mut multipart: Multipart,
) -> Result<Response> {
    tracing::info!("📤 Upload from user: {}", session.user_id);

    let _permit = state.upload_slots.acquire().await?;
    tracing::debug!(
        "📊 Upload slots in use: {} (available: {})",
        state.upload_slots.in_use(),
        state.upload_slots.available_permits()
    );

    let max_bytes = state.workspace.upload_panel().max_upload_bytes();
    let timeout_duration = Duration::from_secs(UPLOAD_TIMEOUT);

    let mut title: Option<String> = None;
    let mut file: Option<FileInput> = None;

    loop {
        match timeout(timeout_duration, multipart.next_field()).await {
            Ok(Ok(Some(mut field))) => {
                let field_name = field.name().unwrap_or("").to_string();
                match field_name.as_str() {
                    "title" => {
                        title = Some(
                            field
                                .text()
                                .await
                                .map_err(|e| AppError::Multipart(format!("title: {}", e)))?,
                        );
                    }
                    "file" => {
                        let file_name = field.file_name().map(str::to_string);
                        let declared_type = field.content_type().map(str::to_string);
                        let bytes = read_file_field(&mut field, max_bytes).await?;
                        file = Some(FileInput {
                            file_name,
                            declared_type,
                            bytes,
                        });
                    }
                    _ => {}
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(e)) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(AppError::Validation(size_limit_message(max_bytes)));
            }
            Ok(Err(e)) => {
                return Err(AppError::Multipart(format!("Parse error: {}", e)));
            }
            Err(_) => return Err(AppError::Multipart("Upload timeout exceeded".into())),
        }
    }

    let title = title.unwrap_or_default();
    let file = file.ok_or(AppError::Validation("Please select a file".into()))?;

    let record = state.workspace.upload(&title, file).await?;
    json_response(StatusCode::CREATED, &FileListItem::from(record))
}

fn change_event(kind: &str) -> Event {
    let payload = sonic_rs::json!({ "kind": kind });
    Event::default()
        .event("files")
        .data(sonic_rs::to_string(&payload).unwrap_or_default())
}

/// Forwards the record store's change feed. Clients re-fetch the listing on every event.
pub async fn file_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let receiver = state.records.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        let event = match receiver.recv().await {
            Ok(change) => change_event(change.kind.as_str()),
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!("File event stream lagged by {} events", missed);
                change_event("resync")
            }
            Err(RecvError::Closed) => return None,
        };
        Some((Ok::<_, Infallible>(event), receiver))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            '\n' | '\r' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

fn attachment_disposition(filename: &str) -> HeaderValue {
    let safe_filename = sanitize_filename(filename);
    let ascii: String = safe_filename
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        r#"attachment; filename="{}"; filename*=UTF-8''{}"#,
        ascii,
        urlencoding::encode(&safe_filename)
    )
    .parse()
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Delivers a stored binary as an attachment named after its record.
pub async fn download_file(
    State(state): State<AppState>,
    Query(params): Query<DownloadQuery>,
) -> Result<Response> {
    let name = params.name.unwrap_or_else(|| params.path.clone());
    let file = state
        .workspace
        .listing()
        .download(&params.path, &name)
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_DISPOSITION, attachment_disposition(&file.name));

    Ok((headers, Body::from(file.bytes)).into_response())
}

/// Describes what the preview surface should open.
pub async fn preview_file(
    State(state): State<AppState>,
    Query(params): Query<PreviewQuery>,
) -> Result<Response> {
    let target = state.workspace.listing().preview(&params.path).await?;
    json_response(StatusCode::OK, &target)
}

/// Renders the preview surface as a standalone page.
pub async fn preview_page(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(params): Query<PreviewQuery>,
) -> Result<Html<String>> {
    let target = state.workspace.listing().preview(&params.path).await?;
    let theme = Theme::from_cookie(cookies.get(THEME_COOKIE).as_ref().map(|c| c.value()));

    let mut surface = PreviewSurface::new();
    surface.open(target);
    if params.failed {
        surface.report_load_failure();
    }

    Ok(Html(surface.render(theme)?))
}

/// Serves an object at its public URL.
///
/// Keys are never overwritten, so the content hash is a stable ETag.
pub async fn public_object(
    State(state): State<AppState>,
    Path(key): Path<String>,
    request_headers: HeaderMap,
) -> Result<Response> {
    let record = state
        .records
        .find_by_path(&key)
        .await?
        .ok_or(AppError::NotFound)?;

    let bytes = state.objects.download(&record.path).await?;
    let etag = format!("\"{}\"", blake3::hash(&bytes).to_hex());

    let not_modified = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
    if let Ok(value) = etag.parse() {
        headers.insert(header::ETAG, value);
    }

    if not_modified {
        return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
    }

    let content_type = HeaderValue::from_str(&record.media_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);

    tracing::debug!("🌐 Public object {} ({} bytes)", record.path, bytes.len());
    Ok((headers, Body::from(bytes)).into_response())
}
