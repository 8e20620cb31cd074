//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Both container backends map their failures onto the
//! same [`ErrorKind`] so callers never need to know which backend was used.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};
use zip::result::ZipError;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Archive or archive entry does not exist
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Entry was already written during this session (write-once containers)
    #[display("entry already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    /// Entry name contains invalid characters or escapes the archive root
    #[display("invalid entry name: {_0:?}")]
    InvalidEntryName(#[error(not(source))] String),
    /// The container structure could not be read
    #[display("invalid archive: {}", _0.display())]
    InvalidArchive(#[error(not(source))] PathBuf),
    /// Operation is not available for this backend
    #[display("unsupported operation: {_0}")]
    Unsupported(#[error(not(source))] &'static str),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    pub(crate) fn from_io(e: IoError, path: &Path) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(e),
        }
    }

    pub(crate) fn from_zip(e: ZipError, path: &Path, entry: Option<&str>) -> Self {
        match e {
            ZipError::Io(e) => Self::from_io(e, path),
            ZipError::FileNotFound => Self::NotFound(entry.unwrap_or_default().to_string()),
            ZipError::InvalidArchive(_) | ZipError::UnsupportedArchive(_) => Self::InvalidArchive(path.to_path_buf()),
            // Remaining variants (passwords, duplicate names, ...) never apply
            // to the archives written by this crate.
            other => Self::Io(IoError::other(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_retryable() {
        assert!(ErrorKind::Io(IoError::other("disk on fire")).is_retryable());
        assert!(!ErrorKind::NotFound("index.json".to_string()).is_retryable());
        assert!(!ErrorKind::InvalidEntryName("../etc".to_string()).is_retryable());
    }

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = IoError::new(std::io::ErrorKind::NotFound, "gone");
        let kind = ErrorKind::from_io(err, Path::new("/library/manga.cbz"));
        assert!(matches!(kind, ErrorKind::NotFound(p) if p == "/library/manga.cbz"));
    }

    #[test]
    fn zip_file_not_found_keeps_entry_name() {
        let kind = ErrorKind::from_zip(ZipError::FileNotFound, Path::new("a.cbz"), Some("001001.png"));
        assert!(matches!(kind, ErrorKind::NotFound(e) if e == "001001.png"));
    }
}
