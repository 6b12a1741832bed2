use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::services::shell::Workspace;
use crate::stores::{
    ObjectStore, RecordStore, SessionProvider, fs::LocalObjectStore, postgres::PgRecordStore,
    redis_session::RedisSessionProvider,
};

/// Bounds how many uploads are buffered in memory at once.
#[derive(Clone)]
pub struct UploadSlots {
    semaphore: Arc<Semaphore>,
    total: usize,
}

impl UploadSlots {
    pub fn new(slots: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(slots)),
            total: slots,
        }
    }

    /// Waits for a free slot.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| AppError::Internal("Upload slots closed".to_string()))
    }

    /// Returns the number of available permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Uploads currently holding a slot.
    pub fn in_use(&self) -> usize {
        self.total.saturating_sub(self.available_permits())
    }
}

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// Issues and resolves sessions.
    pub sessions: Arc<dyn SessionProvider>,
    /// The `files` bucket.
    pub objects: Arc<dyn ObjectStore>,
    /// The `files` table.
    pub records: Arc<dyn RecordStore>,
    /// Upload panel and file listing.
    pub workspace: Arc<Workspace>,
    /// The upload limiter.
    pub upload_slots: UploadSlots,
}

impl AppState {
    /// Connects to PostgreSQL, Redis and the storage directory.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        crate::db::run_migrations(&db).await?;

        let redis_client = redis::Client::open(config.redis_url.as_str())?;
        let redis = ConnectionManager::new(redis_client).await?;
        tracing::info!("✅ Redis Connection Manager initialized (pooled)");

        let objects = LocalObjectStore::open(&config.storage_dir, &config.public_base_url).await?;

        let records = PgRecordStore::connect(db.clone(), &config.database_url).await?;

        let sessions = RedisSessionProvider::new(db, redis, config.session_ttl_secs());

        Ok(Self::from_parts(
            config.clone(),
            Arc::new(sessions),
            Arc::new(objects),
            Arc::new(records),
        ))
    }

    /// Wires the state around already-built stores and starts the listing subscription.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_parts(
        config: Config,
        sessions: Arc<dyn SessionProvider>,
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        let workspace = Arc::new(Workspace::new(
            objects.clone(),
            records.clone(),
            config.max_upload_bytes,
        ));
        workspace.listing().watch();

        let upload_slots = UploadSlots::new(config.upload_slots);
        tracing::info!(
            "✅ Upload slots initialized ({} × {} bytes max)",
            config.upload_slots,
            config.max_upload_bytes
        );

        Self {
            config,
            sessions,
            objects,
            records,
            workspace,
            upload_slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slots_are_returned_when_the_permit_drops() {
        let slots = UploadSlots::new(2);
        {
            let _first = slots.acquire().await.unwrap();
            assert_eq!(slots.in_use(), 1);
            assert_eq!(slots.available_permits(), 1);
        }
        assert_eq!(slots.in_use(), 0);
    }
}
