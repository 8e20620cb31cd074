//! Value types shared with the rest of the application.
//!
//! Manga and chapter records come from the source parsers and are treated as
//! immutable inputs. The `serde` layout doubles as the manifest format, so
//! optional fields default when missing to keep older indexes readable.

use kura_archive::{ArchiveFormat, ENTRY_URL_SEPARATOR};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Source name used for manga that only exist in the local library.
pub const LOCAL_SOURCE: &str = "local";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MangaState {
    Ongoing,
    Finished,
    Abandoned,
    Paused,
    Upcoming,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MangaTag {
    pub key: String,
    pub title: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MangaRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub alt_title: Option<String>,
    pub url: String,
    #[serde(default)]
    pub public_url: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<MangaTag>,
    #[serde(default)]
    pub state: Option<MangaState>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
    pub source: String,
    /// Empty inside the manifest snapshot; the index stores chapters itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chapters: Vec<ChapterRecord>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub id: i64,
    pub name: String,
    /// Sequence number; the first half of every page entry name.
    pub number: u32,
    #[serde(default)]
    pub volume: u32,
    pub url: String,
    #[serde(default)]
    pub scanlator: Option<String>,
    /// Unix timestamp in milliseconds.
    #[serde(default)]
    pub upload_date: i64,
    #[serde(default)]
    pub branch: Option<String>,
    pub source: String,
}

/// A single page inside a saved archive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRecord {
    /// Stable hash of [`url`](Self::url).
    pub id: u64,
    /// `<archive path>#<entry name>`.
    pub url: String,
    pub preview: Option<String>,
    pub source: String,
}

impl PageRecord {
    pub fn for_entry(archive: &Path, entry: &str, source: impl Into<String>) -> Self {
        let url = entry_url(archive, entry);
        Self { id: stable_id(&url), url, preview: None, source: source.into() }
    }

    /// Entry name part of the page url.
    pub fn entry_name(&self) -> Option<&str> {
        self.url.rsplit_once(ENTRY_URL_SEPARATOR).map(|(_, entry)| entry)
    }
}

/// A manga found in the local library.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalManga {
    pub manga: MangaRecord,
    pub path: PathBuf,
    pub format: ArchiveFormat,
    pub modified: OffsetDateTime,
}

pub(crate) fn entry_url(archive: &Path, entry: &str) -> String {
    format!("{}{ENTRY_URL_SEPARATOR}{entry}", archive.display())
}

/// First eight bytes of the BLAKE3 hash of `input`.
///
/// Used for page ids and for the ids of manga that have no manifest, so the
/// same archive always produces the same ids.
pub fn stable_id(input: &str) -> u64 {
    let hash = blake3::hash(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

pub(crate) fn stable_signed_id(input: &str) -> i64 {
    i64::from_le_bytes(stable_id(input).to_le_bytes())
}
