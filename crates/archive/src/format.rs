use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;

/// Extensions recognised as zip-based comic containers.
pub const ZIP_EXTENSIONS: &[&str] = &["cbz", "zip"];

/// Physical layout of an archive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// A plain directory; every entry is a file.
    Directory,
    /// A single zip container (`.cbz`).
    #[default]
    Zip,
}

impl ArchiveFormat {
    /// Detects the format of `path`.
    ///
    /// Existing paths are detected by file type; anything else falls back to
    /// the extension, so that a not-yet-created `manga.cbz` is a zip archive.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_dir() => Self::Directory,
            Ok(_) => Self::Zip,
            Err(_) if has_zip_extension(path) => Self::Zip,
            Err(_) => Self::Directory,
        }
    }

    /// File extension (without dot) used when naming a new archive.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Self::Directory => None,
            Self::Zip => Some("cbz"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Zip => "zip",
        }
    }
}

impl Display for ArchiveFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// How entries are stored inside zip containers. Page images are already
/// compressed, so storing them is usually the better trade.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryCompression {
    #[default]
    Stored,
    Deflated,
}

impl From<EntryCompression> for zip::CompressionMethod {
    fn from(value: EntryCompression) -> Self {
        match value {
            EntryCompression::Stored => zip::CompressionMethod::Stored,
            EntryCompression::Deflated => zip::CompressionMethod::Deflated,
        }
    }
}

/// Returns `true` for `.cbz`/`.zip` paths (case-insensitive).
pub fn has_zip_extension(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ZIP_EXTENSIONS.iter().any(|z| ext.eq_ignore_ascii_case(z)))
}
