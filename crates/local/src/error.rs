//! Local Library Error Types
//!
//! Archive-level failures are wrapped as [`ErrorKind::Archive`] so the
//! underlying [`kura_archive::error::ErrorKind`] stays available in the error
//! tree.

use derive_more::{Display, Error};
use std::io::Error as IoError;

/// A local library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for local library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Saved manga, chapter or page does not exist
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Reading or writing the archive container failed
    #[display("archive operation failed")]
    Archive,
    /// The manga index could not be serialized
    #[display("manga index could not be written")]
    Manifest,
    /// Entry name is already used by the cover or another chapter
    #[display("entry {_0} is already used by another chapter or the cover")]
    EntryConflict(#[error(not(source))] String),
    /// Operation called out of order
    #[display("invalid state: {_0}")]
    InvalidState(#[error(not(source))] &'static str),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// A blocking task panicked or was cancelled before finishing
    #[display("background task was interrupted")]
    Interrupted,
    /// Per-manga lock was used incorrectly
    #[display("manga lock misuse")]
    Lock,
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Interrupted)
    }
}
