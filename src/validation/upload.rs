use crate::config::MEGABYTE;
use crate::error::{AppError, Result};
use crate::models::file::PDF_MEDIA_TYPE;
use crate::stores::MAX_KEY_BYTES;

/// Bytes `derive_path` puts in front of the title: 13 timestamp digits and a dash.
const PATH_PREFIX_BYTES: usize = 14;

/// The longest accepted title, in bytes, so every derived key fits in a file name.
pub const MAX_TITLE_BYTES: usize = MAX_KEY_BYTES - PATH_PREFIX_BYTES;

/// Types a client sends when it does not know better; these get sniffed instead.
const GENERIC_MEDIA_TYPES: [&str; 2] = ["application/octet-stream", "binary/octet-stream"];

/// Returns the trimmed title, rejecting empty and over-long ones.
pub fn validate_title(title: &str) -> Result<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if title.len() > MAX_TITLE_BYTES {
        return Err(AppError::Validation(format!(
            "Title is too long (at most {} bytes)",
            MAX_TITLE_BYTES
        )));
    }
    Ok(title)
}

/// Only images and PDFs are shared.
pub fn is_accepted_media_type(media_type: &str) -> bool {
    media_type.starts_with("image/") || media_type == PDF_MEDIA_TYPE
}

pub fn validate_media_type(media_type: &str) -> Result<()> {
    if is_accepted_media_type(media_type) {
        Ok(())
    } else {
        Err(AppError::Validation("Only images and PDFs are allowed".to_string()))
    }
}

/// Settles the media type of an upload: the declared one unless it is missing
/// or generic, in which case the bytes decide.
pub fn resolve_media_type(declared: Option<&str>, bytes: &[u8]) -> String {
    let declared = declared
        .map(|t| t.split(';').next().unwrap_or(t).trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty() && !GENERIC_MEDIA_TYPES.contains(&t.as_str()));

    match declared {
        Some(media_type) => media_type,
        None => infer::get(bytes)
            .map(|kind| kind.mime_type().to_string())
            .unwrap_or_else(|| GENERIC_MEDIA_TYPES[0].to_string()),
    }
}

/// The user-facing oversize message, derived from the same limit the check uses.
pub fn size_limit_message(max_bytes: u64) -> String {
    if max_bytes % MEGABYTE == 0 {
        format!("File size must not exceed {}MB", max_bytes / MEGABYTE)
    } else {
        format!("File size must not exceed {} bytes", max_bytes)
    }
}

/// A file of exactly `max_bytes` is accepted.
pub fn validate_size(size: u64, max_bytes: u64) -> Result<()> {
    if size > max_bytes {
        Err(AppError::Validation(size_limit_message(max_bytes)))
    } else {
        Ok(())
    }
}

/// Derives the storage key `{timestamp}-{title}`.
///
/// The title is made safe for a single path segment: separators and control
/// characters become `_`, which never makes it longer. The timestamp prefix
/// keeps the key from starting with a dot.
pub fn derive_path(timestamp_millis: i64, title: &str) -> String {
    let segment: String = title
        .chars()
        .map(|c| if c == '/' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("{}-{}", timestamp_millis, segment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images_and_pdfs_are_accepted() {
        assert!(validate_media_type("image/png").is_ok());
        assert!(validate_media_type("image/jpeg").is_ok());
        assert!(validate_media_type("application/pdf").is_ok());
    }

    #[test]
    fn other_types_are_rejected_with_a_message() {
        for media_type in ["text/plain", "application/zip", "application/pdfx", "video/mp4", ""] {
            let err = validate_media_type(media_type).unwrap_err();
            assert_eq!(err.to_string(), "Validation error: Only images and PDFs are allowed");
        }
    }

    #[test]
    fn size_check_and_message_share_one_limit() {
        let max = 10 * MEGABYTE;
        assert!(validate_size(max, max).is_ok());
        assert!(validate_size(2 * MEGABYTE, max).is_ok());

        let err = validate_size(max + 1, max).unwrap_err();
        assert!(err.to_string().ends_with("File size must not exceed 10MB"));
        assert!(validate_size(60 * MEGABYTE, max).is_err());
    }

    #[test]
    fn titles_are_trimmed_and_required() {
        assert_eq!(validate_title("  Midterm  ").unwrap(), "Midterm");
        assert!(validate_title("   ").is_err());
    }

    #[test]
    fn title_length_is_bounded_in_bytes() {
        assert!(validate_title(&"x".repeat(MAX_TITLE_BYTES)).is_ok());
        assert!(validate_title(&"x".repeat(MAX_TITLE_BYTES + 1)).is_err());

        // Three bytes per character: 80 fit, 81 do not.
        assert!(validate_title(&"試".repeat(80)).is_ok());
        let err = validate_title(&"試".repeat(81)).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Title is too long (at most 241 bytes)");
    }

    #[test]
    fn longest_title_still_makes_a_valid_key() {
        let title = "\u{80}".repeat(MAX_TITLE_BYTES / 2);
        let path = derive_path(1_700_000_000_000, validate_title(&title).unwrap());
        assert!(path.len() <= MAX_KEY_BYTES);
        assert!(crate::stores::validate_key(&path).is_ok());

        let path = derive_path(1_700_000_000_000, &"x".repeat(MAX_TITLE_BYTES));
        assert_eq!(path.len(), MAX_KEY_BYTES);
    }

    #[test]
    fn declared_type_wins_unless_generic() {
        assert_eq!(resolve_media_type(Some("application/pdf"), b"anything"), "application/pdf");
        assert_eq!(resolve_media_type(Some("Image/PNG; charset=x"), b""), "image/png");

        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert_eq!(resolve_media_type(Some("application/octet-stream"), &png), "image/png");
        assert_eq!(resolve_media_type(None, b"%PDF-1.7\n"), "application/pdf");
        assert_eq!(resolve_media_type(None, b"plain"), "application/octet-stream");
    }

    #[test]
    fn derived_paths_are_single_segments() {
        assert_eq!(derive_path(1700000000000, "Midterm"), "1700000000000-Midterm");
        assert_eq!(derive_path(1, "a/b\\c"), "1-a_b_c");
        assert_eq!(derive_path(1, "..secret"), "1-..secret");
        assert!(crate::stores::validate_key(&derive_path(1, "../../etc")).is_ok());
    }
}
