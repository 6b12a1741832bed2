use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::Result,
    models::{file::FileRecord, session::Session, theme::Theme},
    services::{
        listing::FileListing,
        upload::{FileInput, UploadPanel},
    },
    stores::{ObjectStore, RecordStore},
};

/// Which top-level view a client should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellView {
    SignIn,
    Workspace,
}

#[derive(Debug, Serialize)]
pub struct ShellState {
    pub view: ShellView,
    pub theme: Theme,
}

/// The outer frame: signed-in gate plus theme.
#[derive(Debug, Clone, Default)]
pub struct Shell {
    session: Option<Session>,
    theme: Theme,
}

impl Shell {
    pub fn new(session: Option<Session>, theme: Theme) -> Self {
        Self { session, theme }
    }

    pub fn view(&self) -> ShellView {
        match self.session {
            Some(_) => ShellView::Workspace,
            None => ShellView::SignIn,
        }
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.theme
    }

    pub fn state(&self) -> ShellState {
        ShellState {
            view: self.view(),
            theme: self.theme,
        }
    }
}

/// The signed-in view: the upload panel next to the listing it feeds.
pub struct Workspace {
    upload: UploadPanel,
    listing: Arc<FileListing>,
}

impl Workspace {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        records: Arc<dyn RecordStore>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            upload: UploadPanel::new(objects.clone(), records.clone(), max_upload_bytes),
            listing: FileListing::new(records, objects),
        }
    }

    pub fn upload_panel(&self) -> &UploadPanel {
        &self.upload
    }

    pub fn listing(&self) -> &Arc<FileListing> {
        &self.listing
    }

    /// Submits an upload, then refreshes the listing before returning.
    ///
    /// The upload has already succeeded when the refresh runs, so a failing
    /// refresh only shows up in the listing state.
    pub async fn upload(&self, title: &str, file: FileInput) -> Result<FileRecord> {
        let record = self.upload.submit(title, file).await?;
        let _ = self.listing.refresh().await;
        Ok(record)
    }
}
