//! Validation, naming and routing helpers for candidate uploads.
//!
//! Everything here is pure apart from the clock and RNG used by
//! [`generate_unique_filename`].

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

use crate::backend::{StorageType, UploadFile};

/// Files at or above this size go to the remote backend.
pub const LOCAL_SIZE_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Hard ceiling for any upload.
pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024 * 1024;

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const RANDOM_SUFFIX_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File is empty")]
    Empty,
    #[error("File size {} exceeds the maximum of {}", display_size(.size), display_size(.max))]
    TooLarge { size: u64, max: u64 },
    #[error("File name is required")]
    MissingName,
}

fn display_size(bytes: &u64) -> String {
    format_file_size(*bytes)
}

/// Size bounds shared by every backend: non-empty and at most
/// [`MAX_FILE_SIZE`].
pub fn validate_size(size: u64) -> Result<(), ValidationError> {
    if size == 0 {
        return Err(ValidationError::Empty);
    }
    if size > MAX_FILE_SIZE {
        return Err(ValidationError::TooLarge { size, max: MAX_FILE_SIZE });
    }
    Ok(())
}

/// Reject files that no backend should ever receive.
pub fn validate_file(file: &UploadFile) -> Result<(), ValidationError> {
    validate_size(file.size())?;
    if file.name.trim().is_empty() {
        return Err(ValidationError::MissingName);
    }
    Ok(())
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Split a file name into base and extension at the last `.`.
///
/// A dot in first or last position does not start an extension, so
/// `.env` and `archive.` have none.
fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Build a collision-resistant storage name:
/// `{sanitized_base}_{unix_millis}_{6 random chars}.{ext}`.
pub fn generate_unique_filename(original_name: &str) -> String {
    let (base, ext) = split_extension(original_name.trim());
    let base = sanitize_filename(base);
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();

    match ext {
        Some(ext) => format!(
            "{}_{}_{}.{}",
            base,
            millis,
            suffix,
            sanitize_filename(&ext.to_lowercase())
        ),
        None => format!("{}_{}_{}", base, millis, suffix),
    }
}

/// Human-readable size in binary units, e.g. `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, SIZE_UNITS[unit])
}

/// Pick the backend for a file of `size` bytes.
pub fn determine_storage_type(size: u64) -> StorageType {
    if size < LOCAL_SIZE_THRESHOLD {
        StorageType::Local
    } else {
        StorageType::Remote
    }
}

/// Join a destination prefix and an object name with `/`.
///
/// Empty and `.` segments of the prefix are dropped and `..` becomes `_`,
/// so the key never addresses anything outside the prefix it names.
pub fn object_key(prefix: &str, name: &str) -> String {
    let mut segments: Vec<&str> = prefix
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .map(|s| if s == ".." { "_" } else { s })
        .collect();
    segments.push(name);
    segments.join("/")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Other,
}

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt", "ods", "txt", "csv", "rtf",
];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "rar", "7z", "tar", "gz", "tgz", "bz2", "xz"];

/// Classify a file by declared content type, else by extension.
pub fn file_category(name: &str, content_type: Option<&str>) -> FileCategory {
    let ext = split_extension(name).1.map(|e| e.to_lowercase());
    if let Some(ext) = ext.as_deref() {
        if ARCHIVE_EXTENSIONS.contains(&ext) {
            return FileCategory::Archive;
        }
        if DOCUMENT_EXTENSIONS.contains(&ext) {
            return FileCategory::Document;
        }
    }

    let mime = match content_type {
        Some(ct) if !ct.trim().is_empty() => ct.to_lowercase(),
        _ => mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    };

    match mime.split('/').next().unwrap_or("") {
        "image" => FileCategory::Image,
        "video" => FileCategory::Video,
        "audio" => FileCategory::Audio,
        "text" => FileCategory::Document,
        _ if mime == "application/pdf" => FileCategory::Document,
        _ => FileCategory::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: usize) -> UploadFile {
        UploadFile::new(name, vec![0u8; size])
    }

    #[test]
    fn test_validate_rejects_empty_file() {
        assert_eq!(validate_file(&file("a.txt", 0)), Err(ValidationError::Empty));
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        assert_eq!(validate_file(&file("", 10)), Err(ValidationError::MissingName));
        assert_eq!(validate_file(&file("   ", 10)), Err(ValidationError::MissingName));
    }

    #[test]
    fn test_validate_accepts_regular_file() {
        assert!(validate_file(&file("report.pdf", 1024)).is_ok());
    }

    #[test]
    fn test_validate_size_ceiling() {
        assert_eq!(validate_size(MAX_FILE_SIZE), Ok(()));
        assert_eq!(
            validate_size(MAX_FILE_SIZE + 1),
            Err(ValidationError::TooLarge { size: MAX_FILE_SIZE + 1, max: MAX_FILE_SIZE })
        );
        assert_eq!(validate_size(0), Err(ValidationError::Empty));
        assert_eq!(validate_size(1), Ok(()));
    }

    #[test]
    fn test_too_large_message() {
        let err = ValidationError::TooLarge { size: MAX_FILE_SIZE + 1024, max: MAX_FILE_SIZE };
        assert_eq!(err.to_string(), "File size 5 GB exceeds the maximum of 5 GB");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a b#c.txt"), "a_b_c.txt");
        assert_eq!(sanitize_filename("ok-name_1.PDF"), "ok-name_1.PDF");
        assert_eq!(sanitize_filename("café.png"), "caf_.png");
        assert_eq!(sanitize_filename(""), "");
    }

    fn assert_unique_shape(name: &str, base: &str, ext: Option<&str>) {
        let rest = name.strip_prefix(&format!("{}_", base)).unwrap();
        let (stem, got_ext) = match rest.split_once('.') {
            Some((s, e)) => (s, Some(e)),
            None => (rest, None),
        };
        assert_eq!(got_ext, ext);
        let (millis, suffix) = stem.split_once('_').unwrap();
        assert!(!millis.is_empty() && millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_unique_filename_shape() {
        assert_unique_shape(&generate_unique_filename("My Sofa.JPG"), "My_Sofa", Some("jpg"));
        assert_unique_shape(&generate_unique_filename("archive.tar.gz"), "archive.tar", Some("gz"));
        assert_unique_shape(&generate_unique_filename("README"), "README", None);
        assert_unique_shape(&generate_unique_filename(".env"), ".env", None);
    }

    #[test]
    fn test_unique_filename_does_not_collide() {
        let a = generate_unique_filename("catalog.pdf");
        let b = generate_unique_filename("catalog.pdf");
        assert_ne!(a, b);
    }

    #[test]
    fn test_format_file_size() {
        assert_eq!(format_file_size(0), "0 B");
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(10 * 1024 * 1024), "10 MB");
        assert_eq!(format_file_size(1_288_490_189), "1.2 GB");
        assert_eq!(format_file_size(3 * 1024u64.pow(5)), "3072 TB");
    }

    #[test]
    fn test_storage_type_threshold() {
        assert_eq!(determine_storage_type(0), StorageType::Local);
        assert_eq!(determine_storage_type(LOCAL_SIZE_THRESHOLD - 1), StorageType::Local);
        assert_eq!(determine_storage_type(52_428_800), StorageType::Remote);
        assert_eq!(determine_storage_type(MAX_FILE_SIZE), StorageType::Remote);
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("", "a.txt"), "a.txt");
        assert_eq!(object_key("orders/42/", "a.txt"), "orders/42/a.txt");
        assert_eq!(object_key("/qc", "a.txt"), "qc/a.txt");
    }

    #[test]
    fn test_object_key_stays_under_prefix() {
        assert_eq!(object_key("../other", "a.txt"), "_/other/a.txt");
        assert_eq!(object_key("orders/./42//", "a.txt"), "orders/42/a.txt");
        assert_eq!(object_key("orders/../../x", "a.txt"), "orders/_/_/x/a.txt");
        assert_eq!(object_key("/./", "a.txt"), "a.txt");
    }

    #[test]
    fn test_file_category() {
        assert_eq!(file_category("sofa.png", None), FileCategory::Image);
        assert_eq!(file_category("walkthrough.mp4", None), FileCategory::Video);
        assert_eq!(file_category("invoice.pdf", None), FileCategory::Document);
        assert_eq!(file_category("specs.xlsx", None), FileCategory::Document);
        assert_eq!(file_category("photos.zip", None), FileCategory::Archive);
        assert_eq!(file_category("blob", Some("audio/mpeg")), FileCategory::Audio);
        assert_eq!(file_category("blob", None), FileCategory::Other);
    }
}
