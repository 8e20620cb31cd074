//! The manga index (`index.json`).
//!
//! The manifest stored at the root of every archive. It records the manga
//! metadata, which entry is the cover, and the ordered page entries of every
//! saved chapter. Unreadable manifests are treated as empty rather than as
//! errors: the archive contents are still there, only their description is
//! lost.

use crate::error::{ErrorKind, Result};
use crate::models::{ChapterRecord, MangaRecord};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct IndexDocument {
    #[serde(default)]
    manga: Option<MangaRecord>,
    #[serde(default)]
    cover_entry: Option<String>,
    #[serde(default)]
    chapters: Vec<IndexedChapter>,
}

/// A saved chapter and its page entries in reading order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexedChapter {
    pub chapter: ChapterRecord,
    pub entries: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MangaIndex {
    doc: IndexDocument,
}

impl MangaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses manifest text. Missing, blank or malformed input yields an
    /// empty index.
    pub fn parse(text: Option<&str>) -> Self {
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str(text) {
            Ok(doc) => Self { doc },
            Err(err) => {
                tracing::warn!(error = %err, "Discarding unreadable manga index");
                Self::default()
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.doc == IndexDocument::default()
    }

    /// Stores a snapshot of `manga` without its chapter list.
    ///
    /// With `append` the chapters already in the index are kept; otherwise
    /// they are discarded.
    pub fn set_manga_info(&mut self, manga: &MangaRecord, append: bool) {
        let mut snapshot = manga.clone();
        snapshot.chapters.clear();
        self.doc.manga = Some(snapshot);
        if !append {
            self.doc.chapters.clear();
        }
    }

    /// Metadata with the chapters in manifest order, if the index has any.
    pub fn manga_info(&self) -> Option<MangaRecord> {
        let mut manga = self.doc.manga.clone()?;
        manga.chapters = self.chapters().cloned().collect();
        Some(manga)
    }

    pub fn set_cover_entry(&mut self, name: impl Into<String>) {
        self.doc.cover_entry = Some(name.into());
    }

    pub fn cover_entry(&self) -> Option<&str> {
        self.doc.cover_entry.as_deref()
    }

    /// Appends `chapter`, or replaces it in place (entries included) if a
    /// chapter with the same id is already indexed.
    pub fn add_chapter(&mut self, chapter: &ChapterRecord, entries: Vec<String>) {
        let indexed = IndexedChapter { chapter: chapter.clone(), entries };
        match self.doc.chapters.iter_mut().find(|c| c.chapter.id == chapter.id) {
            Some(existing) => *existing = indexed,
            None => self.doc.chapters.push(indexed),
        }
    }

    /// Removes a chapter, returning the entries it referenced.
    pub fn remove_chapter(&mut self, id: i64) -> Option<Vec<String>> {
        let position = self.doc.chapters.iter().position(|c| c.chapter.id == id)?;
        Some(self.doc.chapters.remove(position).entries)
    }

    pub fn has_chapter(&self, id: i64) -> bool {
        self.doc.chapters.iter().any(|c| c.chapter.id == id)
    }

    pub fn chapter_entries(&self, id: i64) -> Option<&[String]> {
        self.doc.chapters.iter().find(|c| c.chapter.id == id).map(|c| c.entries.as_slice())
    }

    pub fn chapters(&self) -> impl Iterator<Item = &ChapterRecord> {
        self.doc.chapters.iter().map(|c| &c.chapter)
    }

    pub fn indexed_chapters(&self) -> &[IndexedChapter] {
        &self.doc.chapters
    }

    /// Id of the chapter whose pages include `name`.
    pub fn entry_owner(&self, name: &str) -> Option<i64> {
        self.doc.chapters.iter().find(|c| c.entries.iter().any(|e| e == name)).map(|c| c.chapter.id)
    }

    /// Every entry the index points at: the cover and all chapter pages.
    pub fn referenced_entries(&self) -> HashSet<&str> {
        self.doc
            .chapters
            .iter()
            .flat_map(|c| c.entries.iter().map(String::as_str))
            .chain(self.doc.cover_entry.as_deref())
            .collect()
    }

    /// Pretty JSON with a fixed field order: `manga`, `cover_entry`, then
    /// `chapters`. Unchanged state always serializes to the same bytes.
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.doc).or_raise(|| ErrorKind::Manifest)
    }
}
