use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use futures::future::poll_fn;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, NoTls};
use tokio_util::sync::CancellationToken;

use super::{ChangeEvent, ChangeKind, EVENT_CHANNEL_CAPACITY, RecordStore};
use crate::error::Result;
use crate::models::file::{FileRecord, NewFileRecord};
use crate::repositories::file as file_repo;

/// Channel the `files_changed` trigger notifies on.
const CHANGE_CHANNEL: &str = "files_changed";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Doubles the reconnect delay, capped at [`MAX_BACKOFF`].
fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// The `files` table in PostgreSQL. Change notifications arrive through a
/// dedicated `LISTEN` connection and are fanned out to subscribers.
///
/// A lost listener connection is re-established with backoff. Notifications
/// sent while it was down are gone, so a `Resync` change follows every reconnect.
pub struct PgRecordStore {
    pool: Pool,
    events: broadcast::Sender<ChangeEvent>,
    shutdown: CancellationToken,
}

/// One live `LISTEN` connection.
struct Listener {
    // Dropping the client closes the connection.
    _client: tokio_postgres::Client,
    /// Ends when the connection does.
    forwarding: JoinHandle<()>,
}

impl Listener {
    async fn connect(
        database_url: &str,
        events: &broadcast::Sender<ChangeEvent>,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        let (client, mut connection) = tokio_postgres::connect(database_url, NoTls).await?;

        let forward = events.clone();
        let token = shutdown.clone();
        let forwarding = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = token.cancelled() => break,
                    message = poll_fn(|cx| connection.poll_message(cx)) => message,
                };

                match message {
                    Some(Ok(AsyncMessage::Notification(note))) if note.channel() == CHANGE_CHANNEL => {
                        match ChangeKind::from_operation(note.payload()) {
                            Some(kind) => {
                                tracing::debug!("🔔 files changed: {}", kind.as_str());
                                let _ = forward.send(ChangeEvent { kind });
                            }
                            None => {
                                tracing::warn!("Ignoring unknown change payload: {}", note.payload());
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("❌ Change listener connection failed: {}", e);
                        break;
                    }
                    None => {
                        tracing::warn!("Change listener connection closed");
                        break;
                    }
                }
            }
        });

        client
            .batch_execute(&format!("LISTEN {}", CHANGE_CHANNEL))
            .await?;
        tracing::info!("✅ Listening for changes on {}", CHANGE_CHANNEL);

        Ok(Self {
            _client: client,
            forwarding,
        })
    }
}

/// Keeps a listener alive until `shutdown`, reconnecting whenever it drops.
async fn supervise(
    database_url: String,
    mut listener: Listener,
    events: broadcast::Sender<ChangeEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = &mut listener.forwarding => {}
        }

        let mut backoff = INITIAL_BACKOFF;
        listener = loop {
            tracing::warn!("🔄 Reconnecting change listener in {:?}", backoff);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Change listener stopped");
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }

            match Listener::connect(&database_url, &events, &shutdown).await {
                Ok(listener) => break listener,
                Err(e) => {
                    tracing::error!("❌ Change listener reconnect failed: {}", e);
                    backoff = next_backoff(backoff);
                }
            }
        };

        let _ = events.send(ChangeEvent {
            kind: ChangeKind::Resync,
        });
    }
    tracing::info!("Change listener stopped");
}

impl PgRecordStore {
    /// Connects the listener and starts forwarding notifications.
    ///
    /// The first connection must succeed; later ones are retried in the background.
    pub async fn connect(pool: Pool, database_url: &str) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let listener = Listener::connect(database_url, &events, &shutdown).await?;
        tokio::spawn(supervise(
            database_url.to_string(),
            listener,
            events.clone(),
            shutdown.clone(),
        ));

        Ok(Self {
            pool,
            events,
            shutdown,
        })
    }
}

impl Drop for PgRecordStore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord> {
        file_repo::insert_file(&self.pool, &record)
            .await
            .map_err(|e| e.into_record())
    }

    async fn list_newest_first(&self) -> Result<Vec<FileRecord>> {
        file_repo::list_newest_first(&self.pool)
            .await
            .map_err(|e| e.into_record())
    }

    async fn find_by_path(&self, path: &str) -> Result<Option<FileRecord>> {
        file_repo::find_by_path(&self.pool, path)
            .await
            .map_err(|e| e.into_record())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_doubles_up_to_a_cap() {
        assert_eq!(next_backoff(INITIAL_BACKOFF), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(16)), MAX_BACKOFF);
        assert_eq!(next_backoff(MAX_BACKOFF), MAX_BACKOFF);
    }
}
