use minijinja::{Environment, context};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::theme::Theme;

const PREVIEW_TEMPLATE: &str = "preview.html";

/// What an open preview shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewTarget {
    /// Public URL of the PDF.
    pub url: String,
    /// The record's title, shown as the heading.
    pub name: String,
    /// Storage key, used for the download link.
    pub path: String,
}

/// Displays one PDF inline, or a fallback when it cannot be loaded.
#[derive(Debug, Default)]
pub struct PreviewSurface {
    target: Option<PreviewTarget>,
    load_failed: bool,
}

impl PreviewSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever was open. A fresh target always starts unfailed.
    pub fn open(&mut self, target: PreviewTarget) {
        self.target = Some(target);
        self.load_failed = false;
    }

    /// Marks the open target as failed to load. No-op when closed.
    pub fn report_load_failure(&mut self) {
        if self.target.is_some() {
            self.load_failed = true;
        }
    }

    pub fn close(&mut self) {
        self.target = None;
        self.load_failed = false;
    }

    pub fn target(&self) -> Option<&PreviewTarget> {
        self.target.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.target.is_some()
    }

    pub fn load_failed(&self) -> bool {
        self.load_failed
    }

    /// Renders the open preview as a standalone HTML page.
    pub fn render(&self, theme: Theme) -> Result<String> {
        let target = self.target.as_ref().ok_or(AppError::NotFound)?;

        let mut env = Environment::new();
        env.add_template(PREVIEW_TEMPLATE, include_str!("../../templates/preview.html"))?;
        let template = env.get_template(PREVIEW_TEMPLATE)?;

        let download_href = format!(
            "/api/files/download?path={}&name={}",
            urlencoding::encode(&target.path),
            urlencoding::encode(&target.name)
        );

        let html = template.render(context! {
            url => &target.url,
            name => &target.name,
            download_href => download_href,
            load_failed => self.load_failed,
            theme => theme.as_str(),
        })?;
        Ok(html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn midterm() -> PreviewTarget {
        PreviewTarget {
            url: "http://localhost:3000/public/files/1-Midterm".to_string(),
            name: "Midterm".to_string(),
            path: "1-Midterm".to_string(),
        }
    }

    #[test]
    fn open_always_resets_the_failure_flag() {
        let mut surface = PreviewSurface::new();
        surface.open(midterm());
        surface.report_load_failure();
        assert!(surface.load_failed());

        surface.open(midterm());
        assert!(!surface.load_failed());
        assert_eq!(surface.target(), Some(&midterm()));
    }

    #[test]
    fn close_is_idempotent() {
        let mut surface = PreviewSurface::new();
        surface.open(midterm());
        surface.close();
        surface.close();
        assert!(!surface.is_open());
        assert!(!surface.load_failed());
    }

    #[test]
    fn failure_without_a_target_is_ignored() {
        let mut surface = PreviewSurface::new();
        surface.report_load_failure();
        assert!(!surface.load_failed());
    }

    #[test]
    fn renders_the_embedded_pdf_with_a_fallback() {
        let mut surface = PreviewSurface::new();
        surface.open(midterm());

        let html = surface.render(Theme::Dark).unwrap();
        assert!(html.contains("1-Midterm#toolbar=1"));
        assert!(html.contains("<h1>Midterm</h1>"));
        assert!(html.contains("Please try downloading the file instead"));
        assert!(html.contains(r#"data-theme="dark""#));
        assert!(html.contains("path=1-Midterm&amp;name=Midterm"));
    }

    #[test]
    fn failed_load_renders_only_the_fallback() {
        let mut surface = PreviewSurface::new();
        surface.open(midterm());
        surface.report_load_failure();

        let html = surface.render(Theme::Light).unwrap();
        assert!(html.contains("Failed to load PDF"));
        assert!(!html.contains("<object"));
    }

    #[test]
    fn titles_are_escaped() {
        let mut surface = PreviewSurface::new();
        let mut target = midterm();
        target.name = "<script>alert(1)</script>".to_string();
        surface.open(target);

        let html = surface.render(Theme::Light).unwrap();
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn closed_surface_has_nothing_to_render() {
        assert!(matches!(
            PreviewSurface::new().render(Theme::Light),
            Err(AppError::NotFound)
        ));
    }
}
