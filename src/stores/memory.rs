//! In-process stores. They back the test suite and local demos, and can be told
//! to fail so error paths are reachable without a broken network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{Duration, Utc};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{
    ChangeEvent, ChangeKind, EVENT_CHANNEL_CAPACITY, ObjectStore, RecordStore, SessionProvider,
    public_url, validate_key,
};
use crate::crypto::{csrf, password};
use crate::error::{AppError, Result};
use crate::models::file::{FileRecord, NewFileRecord};
use crate::models::session::{IssuedSession, Session, SessionChange, SessionEvent};

/// Binaries kept in a map.
#[derive(Debug)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Bytes>>,
    public_base_url: String,
    fail_uploads: AtomicBool,
    fail_downloads: AtomicBool,
    uploads: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            public_base_url: public_base_url.into(),
            fail_uploads: AtomicBool::new(false),
            fail_downloads: AtomicBool::new(false),
            uploads: AtomicUsize::new(0),
        }
    }

    /// Makes every following upload fail with a storage error.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Makes every following download fail with a storage error.
    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    /// Number of upload attempts that reached the store.
    pub fn upload_attempts(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        validate_key(key)?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AppError::Storage("Object store unavailable".to_string()));
        }

        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Err(AppError::Storage(format!("An object named {:?} already exists", key)));
        }
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(AppError::Storage("Object store unavailable".to_string()));
        }
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::Storage("Object not found".to_string()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn resolve_public_url(&self, key: &str) -> Result<String> {
        if self.objects.read().await.contains_key(key) {
            Ok(public_url(&self.public_base_url, key))
        } else {
            Err(AppError::Storage("Object not found".to_string()))
        }
    }
}

/// Records kept in insertion order; the natural order breaks `created_at` ties.
#[derive(Debug)]
pub struct MemoryRecordStore {
    records: RwLock<Vec<FileRecord>>,
    events: broadcast::Sender<ChangeEvent>,
    fail_inserts: AtomicBool,
    fail_queries: AtomicBool,
    inserts: AtomicUsize,
    queries: AtomicUsize,
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(Vec::new()),
            events,
            fail_inserts: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            inserts: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Number of insert attempts that reached the store.
    pub fn insert_attempts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Number of list queries issued against the store.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Stores a fully formed record as-is, bypassing id and timestamp assignment.
    pub async fn seed(&self, record: FileRecord) {
        self.records.write().await.push(record);
        self.publish(ChangeKind::Insert);
    }

    /// Emits a change notification without touching the data.
    pub fn publish(&self, kind: ChangeKind) {
        // No receivers is fine.
        let _ = self.events.send(ChangeEvent { kind });
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::Record("Record store unavailable".to_string()));
        }

        let mut records = self.records.write().await;
        if records.iter().any(|r| r.path == record.path) {
            return Err(AppError::Record(format!("Duplicate path {:?}", record.path)));
        }

        let stored = FileRecord {
            id: Uuid::new_v4(),
            name: record.name,
            path: record.path,
            media_type: record.media_type,
            size: record.size,
            created_at: Utc::now(),
        };
        records.push(stored.clone());
        drop(records);

        self.publish(ChangeKind::Insert);
        Ok(stored)
    }

    async fn list_newest_first(&self) -> Result<Vec<FileRecord>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(AppError::Record("Failed to fetch files".to_string()));
        }

        let mut records = self.records.read().await.clone();
        // Stable sort keeps insertion order among equal timestamps.
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(AppError::Record("Failed to fetch files".to_string()));
        }
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|r| r.path == path)
            .cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug)]
struct Account {
    id: Uuid,
    password_hash: String,
}

/// Accounts and sessions kept in maps.
#[derive(Debug)]
pub struct MemorySessionProvider {
    accounts: RwLock<HashMap<String, Account>>,
    sessions: RwLock<HashMap<Uuid, Session>>,
    session_ttl: Duration,
    events: broadcast::Sender<SessionEvent>,
}

impl MemorySessionProvider {
    pub fn new(session_ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            accounts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            session_ttl,
            events,
        }
    }

    async fn issue(&self, user_id: Uuid) -> IssuedSession {
        let now = Utc::now();
        let issued = IssuedSession {
            id: Uuid::new_v4(),
            session: Session {
                user_id,
                csrf_token: csrf::generate_csrf_token(),
                created_at: now,
                expires_at: now + self.session_ttl,
            },
        };
        self.sessions
            .write()
            .await
            .insert(issued.id, issued.session.clone());
        self.publish(issued.id, SessionChange::SignedIn);
        issued
    }

    fn publish(&self, session_id: Uuid, change: SessionChange) {
        let _ = self.events.send(SessionEvent { session_id, change });
    }
}

#[async_trait]
impl SessionProvider for MemorySessionProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<IssuedSession> {
        let password_hash = password::hash_password_blocking(password.to_string()).await?;
        let id = Uuid::new_v4();
        {
            let mut accounts = self.accounts.write().await;
            if accounts.contains_key(email) {
                return Err(AppError::Validation(
                    "An account with this email already exists".to_string(),
                ));
            }
            accounts.insert(email.to_string(), Account { id, password_hash });
        }
        Ok(self.issue(id).await)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<IssuedSession> {
        let (id, hash) = {
            let accounts = self.accounts.read().await;
            let account = accounts.get(email).ok_or_else(|| {
                AppError::Authentication("Invalid email or password".to_string())
            })?;
            (account.id, account.password_hash.clone())
        };

        if !password::verify_password_blocking(password.to_string(), hash).await? {
            return Err(AppError::Authentication("Invalid email or password".to_string()));
        }
        Ok(self.issue(id).await)
    }

    async fn sign_out(&self, session_id: Uuid) -> Result<()> {
        if self.sessions.write().await.remove(&session_id).is_some() {
            self.publish(session_id, SessionChange::SignedOut);
        }
        Ok(())
    }

    async fn current_session(&self, session_id: Uuid) -> Result<Option<Session>> {
        let session = self.sessions.read().await.get(&session_id).cloned();
        match session {
            Some(session) if session.is_expired() => {
                if self.sessions.write().await.remove(&session_id).is_some() {
                    self.publish(session_id, SessionChange::Expired);
                }
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}
