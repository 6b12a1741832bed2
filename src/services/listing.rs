use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, broadcast::error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{AppError, Result},
    models::file::{DownloadedFile, FileRecord},
    services::preview::PreviewTarget,
    stores::{ObjectStore, RecordStore},
};

/// What the listing currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingState {
    /// No fetch has resolved yet.
    Loading,
    /// Newest first; possibly empty.
    Ready(Vec<FileRecord>),
    /// The last applied fetch failed. Retrying means calling `refresh` again.
    Error(String),
}

#[derive(Debug)]
struct Applied {
    ticket: u64,
    state: ListingState,
}

/// All shared files, kept fresh by the record store's change feed.
///
/// Stale data stays visible while a refresh is in flight. Concurrent refreshes
/// are ordered by the moment they were issued, not the moment they resolved.
pub struct FileListing {
    records: Arc<dyn RecordStore>,
    objects: Arc<dyn ObjectStore>,
    applied: RwLock<Applied>,
    issued: AtomicU64,
    shutdown: CancellationToken,
}

impl FileListing {
    pub fn new(records: Arc<dyn RecordStore>, objects: Arc<dyn ObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            records,
            objects,
            applied: RwLock::new(Applied {
                ticket: 0,
                state: ListingState::Loading,
            }),
            issued: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        })
    }

    /// Re-queries the record store and applies the result.
    pub async fn refresh(&self) -> Result<Vec<FileRecord>> {
        let ticket = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.records.list_newest_first().await;

        if self.shutdown.is_cancelled() {
            tracing::debug!("Discarding refresh #{} of a closed listing", ticket);
            return outcome;
        }

        let mut applied = self.applied.write().await;
        if ticket > applied.ticket {
            applied.ticket = ticket;
            applied.state = match &outcome {
                Ok(records) => ListingState::Ready(records.clone()),
                Err(e) => ListingState::Error(e.to_string()),
            };
        } else {
            tracing::debug!(
                "Refresh #{} resolved after #{}; keeping the newer result",
                ticket,
                applied.ticket
            );
        }
        drop(applied);

        if let Err(ref e) = outcome {
            tracing::warn!("❌ Failed to fetch files: {}", e);
        }
        outcome
    }

    pub async fn state(&self) -> ListingState {
        self.applied.read().await.state.clone()
    }

    /// Serves ready data as-is; otherwise fetches (this is also the retry).
    pub async fn current_or_refresh(&self) -> Result<Vec<FileRecord>> {
        if let ListingState::Ready(records) = self.state().await {
            return Ok(records);
        }
        self.refresh().await
    }

    /// How many refreshes have been issued so far.
    pub fn refresh_count(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    /// Subscribes to the change feed. Every notification triggers exactly one
    /// refresh, a lagged receiver triggers one catch-up refresh.
    ///
    /// The subscription is taken before this returns, so no change made
    /// afterwards is missed. The task ends when the listing is closed or dropped.
    pub fn watch(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.records.subscribe();
        let listing = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = changes.recv() => received,
                };

                match received {
                    Ok(change) => {
                        tracing::debug!("🔔 files {} → refreshing listing", change.kind.as_str());
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Listing missed {} change notifications; resyncing", missed);
                    }
                    Err(RecvError::Closed) => break,
                }

                let Some(listing) = listing.upgrade() else { break };
                // Failures are recorded in the listing state.
                let _ = listing.refresh().await;
            }
            tracing::debug!("Listing subscription ended");
        })
    }

    /// Stops the subscription; later refresh results are not applied.
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Fetches a binary for delivery under `name`.
    pub async fn download(&self, path: &str, name: &str) -> Result<DownloadedFile> {
        let bytes = self
            .objects
            .download(path)
            .await
            .map_err(|e| AppError::Download(user_facing(e)))?;

        tracing::info!("📥 Download {} ({} bytes)", path, bytes.len());
        Ok(DownloadedFile {
            name: name.to_string(),
            bytes,
        })
    }

    /// Resolves what the preview surface should show for a record.
    ///
    /// Only PDFs can be previewed.
    pub async fn preview(&self, path: &str) -> Result<PreviewTarget> {
        let record = self
            .records
            .find_by_path(path)
            .await
            .map_err(|e| AppError::Preview(user_facing(e)))?
            .ok_or(AppError::NotFound)?;

        if !record.is_previewable() {
            return Err(AppError::Validation(
                "Preview is only available for PDF files".to_string(),
            ));
        }

        let url = self
            .objects
            .resolve_public_url(&record.path)
            .await
            .map_err(|e| AppError::Preview(user_facing(e)))?;

        Ok(PreviewTarget {
            url,
            name: record.name,
            path: record.path,
        })
    }
}

impl Drop for FileListing {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The message part of a store error, without its classification prefix.
fn user_facing(e: AppError) -> String {
    match e {
        AppError::Storage(msg) | AppError::Record(msg) => msg,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::file::NewFileRecord;
    use crate::stores::memory::{MemoryObjectStore, MemoryRecordStore};
    use crate::stores::{ChangeEvent, ChangeKind, EVENT_CHANNEL_CAPACITY};
    use async_trait::async_trait;
    use axum::body::Bytes;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;
    use tokio::sync::{broadcast, oneshot};
    use uuid::Uuid;

    /// Holds every list query open until the test feeds its gate.
    struct GatedRecordStore {
        gates: Mutex<VecDeque<oneshot::Receiver<Vec<FileRecord>>>>,
        events: broadcast::Sender<ChangeEvent>,
    }

    impl GatedRecordStore {
        /// Returns the store and one sender per query, in query order.
        fn new(queries: usize) -> (Arc<Self>, Vec<oneshot::Sender<Vec<FileRecord>>>) {
            let (senders, receivers): (Vec<_>, VecDeque<_>) =
                (0..queries).map(|_| oneshot::channel()).unzip();
            let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
            let store = Arc::new(Self {
                gates: Mutex::new(receivers),
                events,
            });
            (store, senders)
        }
    }

    #[async_trait]
    impl RecordStore for GatedRecordStore {
        async fn insert(&self, _record: NewFileRecord) -> Result<FileRecord> {
            Err(AppError::Record("read only".to_string()))
        }

        async fn list_newest_first(&self) -> Result<Vec<FileRecord>> {
            let gate = self.gates.lock().unwrap().pop_front();
            match gate {
                Some(gate) => gate
                    .await
                    .map_err(|_| AppError::Record("gate dropped".to_string())),
                None => Ok(Vec::new()),
            }
        }

        async fn find_by_path(&self, _path: &str) -> Result<Option<FileRecord>> {
            Ok(None)
        }

        fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
            self.events.subscribe()
        }
    }

    struct Fixture {
        objects: Arc<MemoryObjectStore>,
        records: Arc<MemoryRecordStore>,
        listing: Arc<FileListing>,
    }

    fn fixture() -> Fixture {
        let objects = Arc::new(MemoryObjectStore::new("http://localhost:3000"));
        let records = Arc::new(MemoryRecordStore::new());
        let listing = FileListing::new(records.clone(), objects.clone());
        Fixture {
            objects,
            records,
            listing,
        }
    }

    fn record_at(minute: i64, media_type: &str) -> FileRecord {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        FileRecord {
            id: Uuid::new_v4(),
            name: format!("paper {}", minute),
            path: format!("{}-paper {}", minute, minute),
            media_type: media_type.to_string(),
            size: 100,
            created_at: base + Duration::minutes(minute),
        }
    }

    async fn wait_for_refreshes(listing: &FileListing, expected: u64) {
        tokio::time::timeout(StdDuration::from_secs(2), async {
            while listing.refresh_count() < expected {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .expect("refresh was not triggered");
    }

    #[tokio::test]
    async fn starts_loading_then_becomes_ready() {
        let f = fixture();
        assert_eq!(f.listing.state().await, ListingState::Loading);

        f.listing.refresh().await.unwrap();
        assert_eq!(f.listing.state().await, ListingState::Ready(vec![]));
    }

    #[tokio::test]
    async fn refresh_is_sorted_newest_first_for_any_insert_order() {
        for order in [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]] {
            let f = fixture();
            for minute in order {
                f.records.seed(record_at(minute, "application/pdf")).await;
            }

            let listed = f.listing.refresh().await.unwrap();
            let minutes: Vec<String> = listed.iter().map(|r| r.name.clone()).collect();
            assert_eq!(minutes, vec!["paper 3", "paper 2", "paper 1", "paper 0"]);
        }
    }

    #[tokio::test]
    async fn refresh_is_idempotent_without_writes() {
        let f = fixture();
        f.records.seed(record_at(1, "image/png")).await;
        f.records.seed(record_at(2, "application/pdf")).await;

        let first = f.listing.refresh().await.unwrap();
        let second = f.listing.refresh().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn each_change_notification_triggers_exactly_one_refresh() {
        let f = fixture();
        let _task = f.listing.watch();

        for (i, kind) in [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
            .into_iter()
            .enumerate()
        {
            f.records.publish(kind);
            wait_for_refreshes(&f.listing, i as u64 + 1).await;
            tokio::time::sleep(StdDuration::from_millis(30)).await;
            assert_eq!(f.listing.refresh_count(), i as u64 + 1);
        }
    }

    #[tokio::test]
    async fn inserts_show_up_through_the_change_feed() {
        let f = fixture();
        f.listing.refresh().await.unwrap();
        let _task = f.listing.watch();

        f.records
            .insert(NewFileRecord {
                name: "Midterm".to_string(),
                path: "1-Midterm".to_string(),
                media_type: "application/pdf".to_string(),
                size: 2_097_152,
            })
            .await
            .unwrap();

        wait_for_refreshes(&f.listing, 2).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        match f.listing.state().await {
            ListingState::Ready(records) => assert_eq!(records[0].name, "Midterm"),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn resync_picks_up_changes_that_were_never_notified() {
        let f = fixture();
        f.listing.refresh().await.unwrap();
        // Written before the subscription exists, so its notification is lost.
        f.records.seed(record_at(1, "application/pdf")).await;

        let _task = f.listing.watch();
        f.records.publish(ChangeKind::Resync);

        wait_for_refreshes(&f.listing, 2).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        match f.listing.state().await {
            ListingState::Ready(records) => assert_eq!(records[0].name, "paper 1"),
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[tokio::test]
    async fn later_issued_refresh_wins_even_when_it_resolves_first() {
        let (records, mut gates) = GatedRecordStore::new(2);
        let objects = Arc::new(MemoryObjectStore::new("http://localhost:3000"));
        let listing = FileListing::new(records, objects);

        let first = tokio::spawn({
            let listing = listing.clone();
            async move { listing.refresh().await }
        });
        wait_for_refreshes(&listing, 1).await;
        let second = tokio::spawn({
            let listing = listing.clone();
            async move { listing.refresh().await }
        });
        wait_for_refreshes(&listing, 2).await;

        let second_gate = gates.pop().unwrap();
        let first_gate = gates.pop().unwrap();
        let older = vec![record_at(1, "application/pdf")];
        let newer = vec![record_at(2, "image/png"), record_at(1, "application/pdf")];

        second_gate.send(newer.clone()).unwrap();
        assert_eq!(second.await.unwrap().unwrap(), newer);
        assert_eq!(listing.state().await, ListingState::Ready(newer.clone()));

        // The first refresh resolves last; its result is returned but not shown.
        first_gate.send(older.clone()).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), older);
        assert_eq!(listing.state().await, ListingState::Ready(newer));
    }

    #[tokio::test]
    async fn failed_query_shows_error_and_retry_reissues_it() {
        let f = fixture();
        f.records.fail_queries(true);

        assert!(matches!(f.listing.current_or_refresh().await, Err(AppError::Record(_))));
        assert!(matches!(f.listing.state().await, ListingState::Error(_)));
        assert_eq!(f.records.query_count(), 1);

        f.records.fail_queries(false);
        f.listing.current_or_refresh().await.unwrap();
        assert_eq!(f.records.query_count(), 2);
        assert_eq!(f.listing.state().await, ListingState::Ready(vec![]));
    }

    #[tokio::test]
    async fn closed_listing_ignores_late_results() {
        let f = fixture();
        f.listing.refresh().await.unwrap();
        f.records.seed(record_at(1, "image/png")).await;

        f.listing.close();
        let fetched = f.listing.refresh().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(f.listing.state().await, ListingState::Ready(vec![]));
    }

    #[tokio::test]
    async fn closing_ends_the_subscription() {
        let f = fixture();
        let task = f.listing.watch();
        f.listing.close();
        tokio::time::timeout(StdDuration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn download_returns_the_binary_under_the_given_name() {
        let f = fixture();
        f.objects
            .upload("1-Midterm", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        let file = f.listing.download("1-Midterm", "Midterm").await.unwrap();
        assert_eq!(file.name, "Midterm");
        assert_eq!(&file.bytes[..], b"%PDF");
    }

    #[tokio::test]
    async fn failed_download_is_reported_without_state_change() {
        let f = fixture();
        f.listing.refresh().await.unwrap();
        let before = f.listing.state().await;

        let err = f.listing.download("1-missing", "Missing").await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to download file: Object not found");
        assert_eq!(f.listing.state().await, before);
    }

    #[tokio::test]
    async fn preview_is_only_offered_for_pdfs() {
        let f = fixture();
        let image = record_at(1, "image/png");
        f.records.seed(image.clone()).await;
        f.objects.upload(&image.path, Bytes::from_static(b"png")).await.unwrap();

        assert!(matches!(
            f.listing.preview(&image.path).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn preview_resolves_the_public_url() {
        let f = fixture();
        let pdf = record_at(1, "application/pdf");
        f.records.seed(pdf.clone()).await;
        f.objects.upload(&pdf.path, Bytes::from_static(b"%PDF")).await.unwrap();

        let target = f.listing.preview(&pdf.path).await.unwrap();
        assert_eq!(target.name, "paper 1");
        assert_eq!(target.url, "http://localhost:3000/public/files/1-paper%201");
    }

    #[tokio::test]
    async fn preview_of_a_missing_binary_is_a_preview_error() {
        let f = fixture();
        let pdf = record_at(1, "application/pdf");
        f.records.seed(pdf.clone()).await;

        let err = f.listing.preview(&pdf.path).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to view PDF: Object not found");
    }
}
