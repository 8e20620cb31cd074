//! Read path for saved manga.
//!
//! Every call opens the archive afresh on the blocking pool; nothing is kept
//! open between calls and the archive is never modified.

use crate::blocking::blocking;
use crate::error::{Error, ErrorKind, Result};
use crate::index::MangaIndex;
use crate::models::{ChapterRecord, LOCAL_SOURCE, LocalManga, MangaRecord, PageRecord, entry_url, stable_signed_id};
use crate::naming::INDEX_ENTRY;
use exn::{OptionExt, ResultExt};
use kura_archive::{ArchiveFormat, ArchiveReader};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Extensions treated as page images when an archive has no index.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "bmp"];

#[derive(Clone, Debug)]
pub struct LocalMangaInput {
    path: PathBuf,
}

impl LocalMangaInput {
    pub fn of(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the saved manga with its chapters.
    ///
    /// Archives without a readable index are still listed: the title is
    /// derived from the file name and there is one chapter per directory
    /// containing images.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %self.path.display()))]
    pub async fn get_manga(&self) -> Result<LocalManga> {
        let path = self.path.clone();
        blocking(move || {
            let (reader, index) = open(&path)?;
            let modified = modified(&path)?;
            let format = reader.format();
            let manga = match index.manga_info() {
                Some(mut manga) => {
                    if let Some(cover) = index.cover_entry() {
                        manga.cover_url = Some(entry_url(&path, cover));
                    }
                    manga
                },
                None => {
                    tracing::debug!("No manga index; deriving chapters from archive layout");
                    fallback_manga(&path, &reader)?
                },
            };
            Ok(LocalManga { manga, path, format, modified })
        })
        .await
    }

    /// Manifest metadata, or `None` if the archive has no readable index.
    pub async fn get_manga_info(&self) -> Result<Option<MangaRecord>> {
        let path = self.path.clone();
        blocking(move || Ok(open(&path)?.1.manga_info())).await
    }

    /// Pages of `chapter` in reading order.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %self.path.display(), chapter = chapter.id))]
    pub async fn get_pages(&self, chapter: &ChapterRecord) -> Result<Vec<PageRecord>> {
        let path = self.path.clone();
        let chapter_id = chapter.id;
        blocking(move || {
            let (reader, index) = open(&path)?;
            let entries = match index.chapter_entries(chapter_id) {
                Some(entries) => entries.to_vec(),
                None if index.manga_info().is_none() => {
                    let fallback = fallback_manga(&path, &reader)?;
                    let chapter = fallback
                        .chapters
                        .iter()
                        .find(|c| c.id == chapter_id)
                        .ok_or_raise(|| ErrorKind::NotFound(format!("chapter {chapter_id}")))?;
                    image_groups(&reader)?.remove(&chapter.url).unwrap_or_default()
                },
                None => exn::bail!(ErrorKind::NotFound(format!("chapter {chapter_id}"))),
            };
            Ok(entries.iter().map(|entry| PageRecord::for_entry(&path, entry, LOCAL_SOURCE)).collect())
        })
        .await
    }

    /// Reads the image bytes of `page`.
    pub async fn read_page(&self, page: &PageRecord) -> Result<Vec<u8>> {
        let entry = page.entry_name().ok_or_raise(|| ErrorKind::NotFound(page.url.clone()))?.to_string();
        let path = self.path.clone();
        blocking(move || {
            let mut reader = ArchiveReader::open(&path).map_err(archive_error)?;
            reader.read_entry(&entry).map_err(archive_error)
        })
        .await
    }
}

fn open(path: &Path) -> Result<(ArchiveReader, MangaIndex)> {
    let mut reader = ArchiveReader::open(path).map_err(archive_error)?;
    let text = match reader.contains(INDEX_ENTRY) {
        true => match reader.read_entry_to_string(INDEX_ENTRY) {
            Ok(text) => Some(text),
            Err(err) if matches!(&*err, kura_archive::error::ErrorKind::InvalidArchive(_)) => {
                tracing::warn!(path = %path.display(), "Manga index is not valid UTF-8");
                None
            },
            Err(err) => return Err(err.raise(ErrorKind::Archive)),
        },
        false => None,
    };
    Ok((reader, MangaIndex::parse(text.as_deref())))
}

/// Missing archives and entries stay [`NotFound`](ErrorKind::NotFound);
/// anything else is an [`Archive`](ErrorKind::Archive) failure.
fn archive_error(err: kura_archive::error::Error) -> Error {
    let kind = match &*err {
        kura_archive::error::ErrorKind::NotFound(what) => ErrorKind::NotFound(what.clone()),
        _ => ErrorKind::Archive,
    };
    err.raise(kind)
}

fn modified(path: &Path) -> Result<OffsetDateTime> {
    let metadata = std::fs::metadata(path).map_err(ErrorKind::Io)?;
    Ok(metadata.modified().map_err(ErrorKind::Io)?.into())
}

fn is_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|i| ext.eq_ignore_ascii_case(i)))
}

/// Image entries grouped by parent directory (`""` for the root), sorted.
fn image_groups(reader: &ArchiveReader) -> Result<BTreeMap<String, Vec<String>>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in reader.entries() {
        let name = name.or_raise(|| ErrorKind::Archive)?;
        if !is_image(&name) {
            continue;
        }
        let parent = name.rsplit_once('/').map(|(parent, _)| parent.to_string()).unwrap_or_default();
        groups.entry(parent).or_default().push(name);
    }
    for entries in groups.values_mut() {
        entries.sort();
    }
    Ok(groups)
}

fn fallback_manga(path: &Path, reader: &ArchiveReader) -> Result<MangaRecord> {
    let title = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_else(|| "Untitled".to_string());
    let url = path.display().to_string();
    let groups = image_groups(reader)?;
    let cover_url = groups.values().flatten().next().map(|entry| entry_url(path, entry));
    let chapters = groups
        .keys()
        .zip(1u32..)
        .map(|(group, number)| ChapterRecord {
            id: stable_signed_id(&entry_url(path, group)),
            name: match group.is_empty() {
                true => title.clone(),
                false => group.rsplit('/').next().unwrap_or(group).to_string(),
            },
            number,
            volume: 0,
            url: group.clone(),
            scanlator: None,
            upload_date: 0,
            branch: None,
            source: LOCAL_SOURCE.to_string(),
        })
        .collect();
    Ok(MangaRecord {
        id: stable_signed_id(&url),
        title,
        alt_title: None,
        public_url: url.clone(),
        url,
        cover_url,
        tags: vec![],
        state: None,
        authors: vec![],
        description: None,
        rating: None,
        source: LOCAL_SOURCE.to_string(),
        chapters,
    })
}

/// Format of an existing archive, or `None` if nothing is saved at `path`.
pub(crate) fn existing_format(path: &Path) -> Option<ArchiveFormat> {
    path.try_exists().unwrap_or(false).then(|| ArchiveFormat::from_path(path))
}
