//! The local library: every saved manga below a set of root directories.

use crate::blocking::blocking;
use crate::error::{ErrorKind, Result};
use crate::filter::ListFilter;
use crate::input::LocalMangaInput;
use crate::models::{LocalManga, MangaRecord};
use crate::naming::{TEMP_PREFIX, archive_file_name, backup_target, is_hidden};
use crate::output::{LocalMangaOutput, restore_backup};
use async_stream::stream;
use exn::{OptionExt, ResultExt};
use futures::{Stream, StreamExt};
use kura_archive::{ArchiveFormat, EntryCompression, has_zip_extension};
use kura_config::Config;
use kura_sync::{KeyGuard, MultiMutex};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub struct LocalLibrary {
    roots: Vec<PathBuf>,
    format: ArchiveFormat,
    compression: EntryCompression,
    locks: MultiMutex<i64>,
    // Where each manga was last seen, to skip a full scan in `find_saved`.
    paths: Mutex<HashMap<i64, PathBuf>>,
}

impl LocalLibrary {
    pub fn new(roots: Vec<PathBuf>, format: ArchiveFormat, compression: EntryCompression) -> Self {
        Self {
            roots,
            format,
            compression,
            locks: MultiMutex::new(),
            paths: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.library.dirs.clone(), config.library.format, config.archive.compression)
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Streams every saved manga in every root.
    ///
    /// Hidden entries (including leftover scratch files) are skipped, and
    /// archives left behind by an interrupted commit are restored first.
    /// Archives that can't be read are yielded as errors without ending the
    /// stream.
    pub fn list(&self) -> impl Stream<Item = Result<LocalManga>> + '_ {
        stream!({
            for root in &self.roots {
                let root = root.clone();
                let candidates = blocking(move || {
                    restore_backups(&root)?;
                    list_candidates(&root)
                });
                let candidates = match candidates.await {
                    Ok(candidates) => candidates,
                    Err(err) => {
                        yield Err(err);
                        continue;
                    },
                };
                for path in candidates {
                    let local = LocalMangaInput::of(path).get_manga().await;
                    if let Ok(local) = &local {
                        self.remember(local);
                    }
                    yield local;
                }
            }
        })
    }

    /// Every readable saved manga that passes `filter`, in its sort order.
    pub async fn get_list(&self, filter: &ListFilter) -> Result<Vec<LocalManga>> {
        let mut list = Box::pin(self.list());
        let mut all = Vec::new();
        while let Some(item) = list.next().await {
            match item {
                Ok(local) => all.push(local),
                Err(err) => tracing::warn!(error = %err, "Skipping unreadable archive"),
            }
        }
        Ok(filter.apply(all))
    }

    /// Finds the saved copy of manga `id`, if any.
    ///
    /// The path the manga was last seen at is tried first; the library is
    /// only scanned if that no longer holds it.
    pub async fn find_saved(&self, id: i64) -> Result<Option<LocalManga>> {
        if let Some(path) = self.cached_path(id) {
            match LocalMangaInput::of(&path).get_manga().await {
                Ok(local) if local.manga.id == id => return Ok(Some(local)),
                _ => {
                    tracing::debug!(id, path = %path.display(), "Cached archive path is stale");
                    self.forget(id);
                },
            }
        }
        let mut list = Box::pin(self.list());
        while let Some(item) = list.next().await {
            match item {
                Ok(local) if local.manga.id == id => return Ok(Some(local)),
                Ok(_) => {},
                Err(err) => tracing::warn!(error = %err, "Skipping unreadable archive"),
            }
        }
        Ok(None)
    }

    /// Starts a merge session for `manga`: into its existing archive if it is
    /// already saved, otherwise into a new archive in the first root.
    ///
    /// The caller should hold the manga's lock for the whole session.
    pub async fn output_for(&self, manga: &MangaRecord) -> Result<LocalMangaOutput> {
        if let Some(saved) = self.find_saved(manga.id).await? {
            return LocalMangaOutput::new(&saved.path, manga, saved.format, self.compression).await;
        }
        let root = self.roots.first().ok_or_raise(|| ErrorKind::NotFound("library root".to_string()))?;
        let target = available_path(root, &archive_file_name(&manga.title, self.format));
        tracing::debug!(id = manga.id, path = %target.display(), "Creating new archive");
        LocalMangaOutput::new(&target, manga, self.format, self.compression).await
    }

    fn cached_path(&self, id: i64) -> Option<PathBuf> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }

    fn remember(&self, local: &LocalManga) {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner).insert(local.manga.id, local.path.clone());
    }

    fn forget(&self, id: i64) {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }

    pub async fn lock_manga(&self, id: i64) {
        self.locks.lock(id).await;
    }

    pub fn unlock_manga(&self, id: i64) -> Result<()> {
        self.locks.unlock(&id).or_raise(|| ErrorKind::Lock)
    }

    /// Holds the lock for manga `id` until the guard is dropped.
    pub async fn lock_guard(&self, id: i64) -> KeyGuard<'_, i64> {
        self.locks.lock_guard(id).await
    }

    /// Removes a saved manga from disk.
    #[tracing::instrument(level = "debug", skip_all, fields(id = local.manga.id, path = %local.path.display()))]
    pub async fn delete(&self, local: &LocalManga) -> Result<()> {
        let _guard = self.lock_guard(local.manga.id).await;
        let path = local.path.clone();
        let format = local.format;
        blocking(move || {
            let removed = match format {
                ArchiveFormat::Directory => fs::remove_dir_all(&path),
                ArchiveFormat::Zip => fs::remove_file(&path),
            };
            Ok(removed.map_err(ErrorKind::Io)?)
        })
        .await?;
        self.forget(local.manga.id);
        tracing::info!("Deleted saved manga");
        Ok(())
    }

    /// Removes chapters `ids` from the saved copy of manga `manga_id`.
    ///
    /// Every id must be saved; otherwise nothing is changed and
    /// [`NotFound`](ErrorKind::NotFound) is returned.
    #[tracing::instrument(level = "debug", skip_all, fields(id = manga_id))]
    pub async fn delete_chapters(&self, manga_id: i64, ids: &[i64]) -> Result<()> {
        let _guard = self.lock_guard(manga_id).await;
        let saved = self
            .find_saved(manga_id)
            .await?
            .ok_or_raise(|| ErrorKind::NotFound(format!("manga {manga_id}")))?;
        let manga = LocalMangaInput::of(&saved.path).get_manga_info().await?.unwrap_or(saved.manga);
        let mut output = LocalMangaOutput::new(&saved.path, &manga, saved.format, self.compression).await?;
        output.merge_with_existing().await?;
        let missing: Vec<String> =
            ids.iter().filter(|id| !output.index().has_chapter(**id)).map(ToString::to_string).collect();
        if !missing.is_empty() {
            output.cleanup().await?;
            exn::bail!(ErrorKind::NotFound(format!("chapters {}", missing.join(", "))));
        }
        for id in ids {
            output.remove_chapter(*id).await?;
        }
        output.finish().await?;
        tracing::info!(removed = ids.len(), "Deleted chapters");
        Ok(())
    }

    /// Removes scratch and temp files left behind by interrupted sessions.
    ///
    /// Archives caught mid-commit are restored rather than removed. Does
    /// nothing and returns `false` while any manga is locked, since its
    /// session may still be using them.
    pub async fn cleanup(&self) -> Result<bool> {
        if !self.locks.is_empty() {
            tracing::debug!(locked = self.locks.size(), "Skipping cleanup while sessions are active");
            return Ok(false);
        }
        let roots = self.roots.clone();
        let removed = blocking(move || {
            let mut removed = 0usize;
            for root in &roots {
                restore_backups(root)?;
                removed += remove_leftovers(root)?;
            }
            Ok(removed)
        })
        .await?;
        if removed > 0 {
            tracing::info!(removed, "Removed leftover temporary files");
        }
        Ok(true)
    }
}

/// Archives directly below `root`, sorted by name.
fn list_candidates(root: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(root = %root.display(), "Library root does not exist");
            return Ok(vec![]);
        },
        Err(e) => exn::bail!(ErrorKind::Io(e)),
    };
    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(ErrorKind::Io)?;
        if is_hidden(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().map_err(ErrorKind::Io)?;
        if file_type.is_dir() || (file_type.is_file() && has_zip_extension(&path)) {
            candidates.push(path);
        }
    }
    candidates.sort();
    Ok(candidates)
}

/// Restores every archive in `root` whose commit was interrupted.
fn restore_backups(root: &Path) -> Result<usize> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => exn::bail!(ErrorKind::Io(e)),
    };
    let mut restored = 0;
    for entry in entries {
        let name = entry.map_err(ErrorKind::Io)?.file_name().to_string_lossy().into_owned();
        if let Some(target) = backup_target(&name)
            && restore_backup(&root.join(target))?
        {
            restored += 1;
        }
    }
    Ok(restored)
}

fn remove_leftovers(root: &Path) -> Result<usize> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => exn::bail!(ErrorKind::Io(e)),
    };
    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(ErrorKind::Io)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(TEMP_PREFIX) {
            continue;
        }
        // A backup is the only copy of its archive while the archive is missing.
        if let Some(target) = backup_target(&name)
            && !root.join(target).try_exists().map_err(ErrorKind::Io)?
        {
            tracing::warn!(backup = %name, "Keeping archive backup without an archive");
            continue;
        }
        let path = entry.path();
        let result = match entry.file_type().map_err(ErrorKind::Io)?.is_dir() {
            true => fs::remove_dir_all(&path),
            false => fs::remove_file(&path),
        };
        result.map_err(ErrorKind::Io)?;
        removed += 1;
    }
    Ok(removed)
}

/// `root/name`, or `root/name_N` (before the extension) if that is taken.
fn available_path(root: &Path, name: &str) -> PathBuf {
    let candidate = root.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    (1..)
        .map(|n| match ext {
            Some(ext) => root.join(format!("{stem}_{n}.{ext}")),
            None => root.join(format!("{stem}_{n}")),
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}
