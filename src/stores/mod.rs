//! Seams to the three collaborators the workspace is built on: the session
//! provider, the object store holding binaries and the record store holding
//! file metadata. Production implementations live in [`fs`], [`postgres`] and
//! [`redis_session`]; [`memory`] keeps everything in-process.

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::models::file::{FileRecord, NewFileRecord};
use crate::models::session::{IssuedSession, Session, SessionEvent};

pub mod fs;
pub mod memory;
pub mod postgres;
pub mod redis_session;

/// Capacity of the broadcast channels carrying change and session events.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Longest object key, in bytes. Keys become file names, so this is `NAME_MAX`.
pub const MAX_KEY_BYTES: usize = 255;

/// What happened to the `files` table. Notifications carry no row data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// Notifications may have been missed; anything could have changed.
    Resync,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
            ChangeKind::Resync => "resync",
        }
    }

    /// Parses a trigger's `TG_OP`.
    pub fn from_operation(op: &str) -> Option<Self> {
        match op {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
}

/// Durable binary storage keyed by path (the `files` bucket).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores a binary under a new key. An existing key is an error, never an overwrite.
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<()>;

    async fn download(&self, key: &str) -> Result<Bytes>;

    /// Removes a binary. Only used to undo an upload whose record never landed.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Resolves the public URL of an existing object.
    async fn resolve_public_url(&self, key: &str) -> Result<String>;
}

/// The `files` metadata table.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord>;

    /// All records, `created_at` descending.
    async fn list_newest_first(&self) -> Result<Vec<FileRecord>>;

    async fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>>;

    /// Subscribes to insert/update/delete notifications on the table.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Issues, resolves and ends sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<IssuedSession>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<IssuedSession>;

    async fn sign_out(&self, session_id: Uuid) -> Result<()>;

    /// `None` when the id is unknown or the session has expired.
    async fn current_session(&self, session_id: Uuid) -> Result<Option<Session>>;

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;
}

/// Keys are single path segments: no separators, no parent references, no control characters.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_BYTES
        && !key.starts_with('.')
        && !key.contains(['/', '\\'])
        && !key.chars().any(char::is_control);

    if valid {
        Ok(())
    } else {
        Err(crate::error::AppError::Storage(format!("Invalid object key: {:?}", key)))
    }
}

/// Builds the public URL for a key under the given origin.
pub(crate) fn public_url(base_url: &str, key: &str) -> String {
    format!("{}/public/files/{}", base_url.trim_end_matches('/'), urlencoding::encode(key))
}
