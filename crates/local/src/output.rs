//! Write path: transactional merges into a saved archive.
//!
//! A session stages everything in a scratch directory created next to the
//! target (so that the final rename stays on one filesystem). Nothing touches
//! the target until [`LocalMangaOutput::finish`]; dropping the session at any
//! earlier point, including on error or cancellation, discards the scratch
//! directory and leaves the target exactly as it was.

use crate::blocking::blocking;
use crate::error::{ErrorKind, Result};
use crate::index::MangaIndex;
use crate::input::existing_format;
use crate::models::{ChapterRecord, MangaRecord};
use crate::naming::{INDEX_ENTRY, TEMP_PREFIX, backup_name, cover_entry_name, entry_name};
use exn::{OptionExt, ResultExt};
use kura_archive::{ArchiveFormat, ArchiveReader, ArchiveWriter, EntryCompression};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Pages added for a chapter that hasn't been flushed yet.
#[derive(Debug)]
struct PendingChapter {
    chapter: ChapterRecord,
    pages: BTreeMap<u32, String>,
    // Every name written for this chapter, including replaced ones.
    written: BTreeSet<String>,
}

#[derive(Debug)]
pub struct LocalMangaOutput {
    target: PathBuf,
    format: ArchiveFormat,
    compression: EntryCompression,
    manga: MangaRecord,
    index: MangaIndex,
    scratch: Option<TempDir>,
    pending: Vec<PendingChapter>,
    merged: bool,
    touched: bool,
}

impl LocalMangaOutput {
    /// Starts a session for the archive at `target`, which may not exist yet.
    ///
    /// Returns [`InvalidState`](ErrorKind::InvalidState) if `target` already
    /// exists in a different format.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %target.as_ref().display(), format = %format))]
    pub async fn new(
        target: impl AsRef<Path>,
        manga: &MangaRecord,
        format: ArchiveFormat,
        compression: EntryCompression,
    ) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        let restore = target.clone();
        blocking(move || restore_backup(&restore)).await?;
        if let Some(existing) = existing_format(&target)
            && existing != format
        {
            exn::bail!(ErrorKind::InvalidState("existing archive has a different format"));
        }
        let parent = parent_of(&target);
        let scratch = blocking(move || {
            fs::create_dir_all(&parent).map_err(ErrorKind::Io)?;
            Ok(tempfile::Builder::new().prefix(TEMP_PREFIX).tempdir_in(&parent).map_err(ErrorKind::Io)?)
        })
        .await?;
        let mut index = MangaIndex::new();
        index.set_manga_info(manga, false);
        Ok(Self {
            target,
            format,
            compression,
            manga: manga.clone(),
            index,
            scratch: Some(scratch),
            pending: Vec::new(),
            merged: false,
            touched: false,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// The index as it would be committed (pending chapters excluded).
    pub fn index(&self) -> &MangaIndex {
        &self.index
    }

    fn scratch_path(&self) -> Result<PathBuf> {
        Ok(self
            .scratch
            .as_ref()
            .ok_or_raise(|| ErrorKind::InvalidState("session already closed"))?
            .path()
            .to_path_buf())
    }

    /// Copies the current archive (if any) into the session and adopts its
    /// index, keeping already-saved chapters.
    ///
    /// Must be called before anything is added.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %self.target.display()))]
    pub async fn merge_with_existing(&mut self) -> Result<()> {
        if self.touched {
            exn::bail!(ErrorKind::InvalidState("merge must happen before anything is added"));
        }
        if self.merged {
            return Ok(());
        }
        let scratch = self.scratch_path()?;
        let target = self.target.clone();
        let text = blocking(move || extract_into(&target, &scratch)).await?;
        if let Some(text) = text {
            let mut index = MangaIndex::parse(Some(&text));
            index.set_manga_info(&self.manga, true);
            self.index = index;
        }
        self.merged = true;
        Ok(())
    }

    /// Stores `file` as the cover, replacing any previous cover.
    pub async fn add_cover(&mut self, file: impl AsRef<Path>, ext: Option<&str>) -> Result<()> {
        let name = cover_entry_name(ext);
        if self.owner_of(&name).is_some() {
            exn::bail!(ErrorKind::EntryConflict(name));
        }
        let scratch = self.scratch_path()?;
        let previous = self.index.cover_entry().filter(|p| *p != name).map(str::to_string);
        let source = file.as_ref().to_path_buf();
        let dest = scratch.join(&name);
        blocking(move || {
            fs::copy(&source, &dest).map_err(ErrorKind::Io)?;
            if let Some(previous) = previous {
                remove_if_exists(&scratch.join(previous))?;
            }
            Ok(())
        })
        .await?;
        self.touched = true;
        self.index.set_cover_entry(name);
        Ok(())
    }

    /// Stores `file` as page `page_number` of `chapter`.
    ///
    /// The page only becomes part of the index once the chapter is flushed.
    pub async fn add_page(
        &mut self,
        chapter: &ChapterRecord,
        file: impl AsRef<Path>,
        page_number: u32,
        ext: Option<&str>,
    ) -> Result<()> {
        let name = entry_name(chapter.number, page_number, ext);
        if self.index.cover_entry() == Some(name.as_str()) {
            exn::bail!(ErrorKind::EntryConflict(name));
        }
        if let Some(owner) = self.owner_of(&name)
            && owner != chapter.id
        {
            exn::bail!(ErrorKind::EntryConflict(name));
        }
        let scratch = self.scratch_path()?;
        let source = file.as_ref().to_path_buf();
        let dest = scratch.join(&name);
        blocking(move || {
            fs::copy(&source, &dest).map_err(ErrorKind::Io)?;
            Ok(())
        })
        .await?;
        self.touched = true;
        let pending = match self.pending.iter().position(|p| p.chapter.id == chapter.id) {
            Some(position) => &mut self.pending[position],
            None => {
                self.pending.push(PendingChapter {
                    chapter: chapter.clone(),
                    pages: BTreeMap::new(),
                    written: BTreeSet::new(),
                });
                let last = self.pending.len() - 1;
                &mut self.pending[last]
            },
        };
        pending.chapter = chapter.clone();
        pending.written.insert(name.clone());
        pending.pages.insert(page_number, name);
        Ok(())
    }

    /// Chapter currently using entry `name`, whether indexed or pending.
    fn owner_of(&self, name: &str) -> Option<i64> {
        self.index.entry_owner(name).or_else(|| {
            self.pending.iter().find(|p| p.written.contains(name)).map(|p| p.chapter.id)
        })
    }

    /// Registers the pages added for `chapter` in the index, replacing any
    /// previously saved version of it.
    ///
    /// Returns `false` if no pages were added for the chapter.
    #[tracing::instrument(level = "debug", skip_all, fields(chapter = chapter.id))]
    pub async fn flush_chapter(&mut self, chapter: &ChapterRecord) -> Result<bool> {
        let Some(position) = self.pending.iter().position(|p| p.chapter.id == chapter.id) else {
            return Ok(false);
        };
        let pending = self.pending.remove(position);
        let previous = self.index.chapter_entries(chapter.id).map(<[String]>::to_vec).unwrap_or_default();
        let entries: Vec<String> = pending.pages.into_values().collect();
        tracing::debug!(pages = entries.len(), "Flushing chapter");
        self.index.add_chapter(&pending.chapter, entries);
        let referenced = self.index.referenced_entries();
        let orphans: Vec<String> = previous
            .into_iter()
            .chain(pending.written)
            .filter(|name| !referenced.contains(name.as_str()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.remove_scratch_entries(orphans).await?;
        Ok(true)
    }

    /// Drops chapter `id` from the archive, returning `false` if it was
    /// neither saved nor pending.
    pub async fn remove_chapter(&mut self, id: i64) -> Result<bool> {
        let mut victims = BTreeSet::new();
        if let Some(position) = self.pending.iter().position(|p| p.chapter.id == id) {
            victims.extend(self.pending.remove(position).written);
        }
        let indexed = self.index.remove_chapter(id);
        let found = indexed.is_some() || !victims.is_empty();
        victims.extend(indexed.into_iter().flatten());
        let referenced = self.index.referenced_entries();
        let victims: Vec<String> = victims.into_iter().filter(|name| !referenced.contains(name.as_str())).collect();
        self.touched = true;
        self.remove_scratch_entries(victims).await?;
        Ok(found)
    }

    async fn remove_scratch_entries(&self, names: Vec<String>) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        let scratch = self.scratch_path()?;
        blocking(move || {
            let mut writer = ArchiveWriter::directory(&scratch).or_raise(|| ErrorKind::Archive)?;
            for name in names {
                writer.remove_entry(&name).or_raise(|| ErrorKind::Archive)?;
            }
            Ok(())
        })
        .await
    }

    /// Flushes pending chapters, writes the index and swaps the new archive
    /// into place.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %self.target.display(), format = %self.format))]
    pub async fn finish(mut self) -> Result<()> {
        let pending: Vec<ChapterRecord> = self.pending.iter().map(|p| p.chapter.clone()).collect();
        for chapter in &pending {
            self.flush_chapter(chapter).await?;
        }
        let index = self.index.serialize()?;
        let scratch = self.scratch.take().ok_or_raise(|| ErrorKind::InvalidState("session already closed"))?;
        let (target, format, compression) = (self.target.clone(), self.format, self.compression);
        let chapters = self.index.indexed_chapters().len();
        blocking(move || {
            fs::write(scratch.path().join(INDEX_ENTRY), index).map_err(ErrorKind::Io)?;
            match format {
                ArchiveFormat::Zip => commit_zip(scratch, &target, compression),
                ArchiveFormat::Directory => commit_directory(scratch, &target),
            }
        })
        .await?;
        tracing::info!(path = %self.target.display(), chapters, "Committed manga archive");
        Ok(())
    }

    /// Discards the session without touching the target.
    pub async fn cleanup(mut self) -> Result<()> {
        if let Some(scratch) = self.scratch.take() {
            blocking(move || Ok(scratch.close().map_err(ErrorKind::Io)?)).await?;
        }
        Ok(())
    }
}

fn parent_of(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(ErrorKind::Io(e).into()),
        _ => Ok(()),
    }
}

/// Copies every entry of the archive at `target` except the index into
/// `scratch`, returning the index text.
fn extract_into(target: &Path, scratch: &Path) -> Result<Option<String>> {
    if existing_format(target).is_none() {
        return Ok(None);
    }
    let mut reader = ArchiveReader::open(target).or_raise(|| ErrorKind::Archive)?;
    let mut writer = ArchiveWriter::directory(scratch).or_raise(|| ErrorKind::Archive)?;
    let names: Vec<String> = reader.entries().collect::<kura_archive::error::Result<_>>().or_raise(|| ErrorKind::Archive)?;
    let mut copied = 0usize;
    for name in names.iter().filter(|n| *n != INDEX_ENTRY) {
        if writer.copy_entry_from(&mut reader, name).or_raise(|| ErrorKind::Archive)? {
            copied += 1;
        }
    }
    tracing::debug!(copied, "Extracted existing archive");
    if !reader.contains(INDEX_ENTRY) {
        return Ok(None);
    }
    match reader.read_entry_to_string(INDEX_ENTRY) {
        Ok(text) => Ok(Some(text)),
        Err(err) if matches!(&*err, kura_archive::error::ErrorKind::InvalidArchive(_)) => {
            tracing::warn!(path = %target.display(), "Manga index is not valid UTF-8");
            Ok(None)
        },
        Err(err) => Err(err.raise(ErrorKind::Archive)),
    }
}

/// Packs `scratch` into a new container next to `target` and renames it over
/// the target.
fn commit_zip(scratch: TempDir, target: &Path, compression: EntryCompression) -> Result<()> {
    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".tmp")
        .tempfile_in(parent_of(target))
        .map_err(ErrorKind::Io)?;
    let file = temp.as_file().try_clone().map_err(ErrorKind::Io)?;
    let mut writer = ArchiveWriter::zip(file, temp.path(), compression);
    let mut reader = ArchiveReader::open(scratch.path()).or_raise(|| ErrorKind::Archive)?;
    let mut names: Vec<String> =
        reader.entries().collect::<kura_archive::error::Result<_>>().or_raise(|| ErrorKind::Archive)?;
    names.retain(|name| name != INDEX_ENTRY);
    names.sort();
    names.push(INDEX_ENTRY.to_string());
    for name in &names {
        writer.copy_entry_from(&mut reader, name).or_raise(|| ErrorKind::Archive)?;
    }
    writer.finish().or_raise(|| ErrorKind::Archive)?;
    temp.as_file().sync_all().map_err(ErrorKind::Io)?;
    temp.persist(target).map_err(|e| ErrorKind::Io(e.error))?;
    close_scratch(scratch);
    Ok(())
}

/// Removes a scratch directory whose contents are already committed.
fn close_scratch(scratch: TempDir) {
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        tracing::warn!(error = %e, scratch = %path.display(), "Failed to remove scratch directory");
    }
}

/// Turns `scratch` into the archive at `target`.
fn commit_directory(scratch: TempDir, target: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(scratch.path(), fs::Permissions::from_mode(0o755)).map_err(ErrorKind::Io)?;
    }
    let staged = scratch.keep();
    let swapped = swap_directory(&staged, target);
    if swapped.is_err() {
        let _ = fs::remove_dir_all(&staged);
    }
    swapped
}

/// Renames `staged` over `target`.
///
/// An existing target is first moved to its backup name, then `staged` is
/// renamed into place and the backup removed. If the second rename fails the
/// backup is moved back. A crash in between leaves only the backup, which
/// [`restore_backup`] puts back.
fn swap_directory(staged: &Path, target: &Path) -> Result<()> {
    restore_backup(target)?;
    if existing_format(target).is_none() {
        fs::rename(staged, target).map_err(ErrorKind::Io)?;
        return Ok(());
    }
    let backup = backup_path(target);
    if backup.exists() {
        // Left over from an earlier crash; the target itself is intact.
        fs::remove_dir_all(&backup).map_err(ErrorKind::Io)?;
    }
    fs::rename(target, &backup).map_err(ErrorKind::Io)?;
    if let Err(e) = fs::rename(staged, target) {
        if let Err(restore) = fs::rename(&backup, target) {
            tracing::error!(error = %restore, backup = %backup.display(), "Failed to restore archive backup");
        }
        exn::bail!(ErrorKind::Io(e));
    }
    if let Err(e) = fs::remove_dir_all(&backup) {
        tracing::warn!(error = %e, backup = %backup.display(), "Failed to remove archive backup");
    }
    Ok(())
}

/// Where a directory archive is kept while its replacement is renamed in.
pub(crate) fn backup_path(target: &Path) -> PathBuf {
    let file_name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    parent_of(target).join(backup_name(&file_name))
}

/// Moves the backup of `target` back into place if `target` itself is
/// missing, which only happens when a commit was interrupted between its two
/// renames. Returns whether anything was restored.
pub(crate) fn restore_backup(target: &Path) -> Result<bool> {
    let backup = backup_path(target);
    if target.try_exists().map_err(ErrorKind::Io)? || !backup.is_dir() {
        return Ok(false);
    }
    fs::rename(&backup, target).map_err(ErrorKind::Io)?;
    tracing::warn!(path = %target.display(), "Restored archive left behind by an interrupted commit");
    Ok(true)
}
