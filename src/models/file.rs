use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use tokio_postgres::Row;

/// The only non-image media type accepted for upload.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Metadata for one shared upload. Immutable once inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Assigned by the record store.
    pub id: Uuid,
    /// The title the uploader typed.
    pub name: String,
    /// Storage key in the `files` bucket, `{timestamp}-{title}`.
    pub path: String,
    /// MIME type, `image/*` or `application/pdf`.
    #[serde(rename = "type")]
    pub media_type: String,
    /// Size in bytes.
    pub size: i64,
    /// Assigned by the record store at insert.
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Only PDFs get an inline preview.
    pub fn is_previewable(&self) -> bool {
        self.media_type == PDF_MEDIA_TYPE
    }

    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }
}

impl From<&Row> for FileRecord {
    fn from(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            name: row.get("name"),
            path: row.get("path"),
            media_type: row.get("type"),
            size: row.get("size"),
            created_at: row.get("created_at"),
        }
    }
}

/// The fields a client supplies; `id` and `created_at` come from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    pub name: String,
    pub path: String,
    pub media_type: String,
    pub size: i64,
}

/// What a listing row offers the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Download,
    Preview,
}

/// A listing row as sent to the front end.
#[derive(Debug, Serialize)]
pub struct FileListItem {
    #[serde(flatten)]
    pub record: FileRecord,
    /// `image` or `document`, used to pick an icon.
    pub kind: &'static str,
    pub actions: Vec<FileAction>,
}

impl From<FileRecord> for FileListItem {
    fn from(record: FileRecord) -> Self {
        let mut actions = Vec::with_capacity(2);
        if record.is_previewable() {
            actions.push(FileAction::Preview);
        }
        actions.push(FileAction::Download);

        let kind = if record.is_image() { "image" } else { "document" };

        Self {
            record,
            kind,
            actions,
        }
    }
}

/// Binary content handed back by a download.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    /// The name the file is delivered under.
    pub name: String,
    pub bytes: axum::body::Bytes,
}
