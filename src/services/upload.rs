use std::sync::Arc;

use axum::body::Bytes;
use chrono::Utc;

use crate::{
    error::{AppError, Result},
    models::file::{FileRecord, NewFileRecord},
    stores::{ObjectStore, RecordStore},
    validation::upload as rules,
};

/// A file picked for upload.
#[derive(Debug, Clone)]
pub struct FileInput {
    /// The client-side file name, for logging only.
    pub file_name: Option<String>,
    /// The type the client declared, if any.
    pub declared_type: Option<String>,
    pub bytes: Bytes,
}

/// Validates a title and file, stores the binary, then records its metadata.
pub struct UploadPanel {
    objects: Arc<dyn ObjectStore>,
    records: Arc<dyn RecordStore>,
    max_upload_bytes: u64,
}

impl UploadPanel {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            objects,
            records,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Uploads one file.
    ///
    /// Validation failures happen before any store is touched. The binary is
    /// written strictly before the record; if the record insert fails the
    /// binary is removed again.
    pub async fn submit(&self, title: &str, file: FileInput) -> Result<FileRecord> {
        let title = rules::validate_title(title)?;
        let media_type = rules::resolve_media_type(file.declared_type.as_deref(), &file.bytes);
        rules::validate_media_type(&media_type)?;
        let size = file.bytes.len() as u64;
        rules::validate_size(size, self.max_upload_bytes)?;

        let path = rules::derive_path(Utc::now().timestamp_millis(), title);

        tracing::info!(
            "📤 Uploading {:?} as {} ({} bytes, {}, client name {:?})",
            title,
            path,
            size,
            media_type,
            file.file_name
        );

        self.objects
            .upload(&path, file.bytes)
            .await
            .map_err(|e| match e {
                AppError::Storage(_) => e,
                other => AppError::Storage(other.to_string()),
            })?;

        let new_record = NewFileRecord {
            name: title.to_string(),
            path: path.clone(),
            media_type,
            size: size as i64,
        };

        match self.records.insert(new_record).await {
            Ok(record) => {
                tracing::info!("✅ File uploaded: {} ({})", record.path, record.id);
                Ok(record)
            }
            Err(e) => {
                tracing::error!("❌ Record insert failed for {}: {}", path, e);
                if let Err(cleanup) = self.objects.remove(&path).await {
                    tracing::error!(
                        "❌ Failed to remove orphaned object {}: {}",
                        path,
                        cleanup
                    );
                }
                Err(match e {
                    AppError::Record(_) => e,
                    other => AppError::Record(other.to_string()),
                })
            }
        }
    }
}
