//! Reader Error Types
//!
//! Both kinds are caller bugs: the window never recovers from them, it just
//! refuses the operation and stays unchanged.

use derive_more::{Display, Error};

/// A reader error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for reader operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Chapter is already in the window
    #[display("chapter {_0} is already loaded")]
    DuplicateChapter(#[error(not(source))] i64),
    /// Nothing to remove
    #[display("page window is empty")]
    EmptyWindow,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DuplicateChapter(_) | Self::EmptyWindow => false,
        }
    }
}
