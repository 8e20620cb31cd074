//! Archive backends.
//!
//! An archive is either a plain directory or a zip container. Both expose the
//! same logical operations through [`ArchiveReader`] and [`ArchiveWriter`], so
//! the rest of the workspace never has to care which one it is talking to.
//!
//! # Examples
//!
//! Carry every entry of one archive over into a new one, whatever their
//! formats:
//!
//! ```no_run
//! use kura_archive::{ArchiveReader, ArchiveWriter, error::Result};
//!
//! fn repack(mut source: ArchiveReader, mut target: ArchiveWriter) -> Result<()> {
//!     let names: Vec<String> = source.entries().collect::<Result<_>>()?;
//!     for name in names {
//!         target.copy_entry_from(&mut source, &name)?;
//!     }
//!     target.finish()
//! }
//! ```

mod directory;
mod zipped;

pub use self::directory::{DirectoryEntries, DirectoryReader, DirectoryWriter};
pub use self::zipped::{ZipContainerReader, ZipContainerWriter};
use crate::error::{ErrorKind, Result};
use crate::format::{ArchiveFormat, EntryCompression};
use crate::path::validate as validate_entry_name;
use exn::ResultExt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Lazily-evaluated listing of archive entry names.
pub struct Entries<'a> {
    inner: Box<dyn Iterator<Item = Result<String>> + 'a>,
}
impl Iterator for Entries<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Read access to an existing archive.
pub enum ArchiveReader {
    Directory(DirectoryReader),
    Zip(ZipContainerReader),
}

impl ArchiveReader {
    /// Open the archive at `path`, picking the backend from the file type.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if nothing exists at `path`.
    #[tracing::instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = fs::metadata(path).map_err(|e| ErrorKind::from_io(e, path))?;
        Ok(match metadata.is_dir() {
            true => Self::Directory(DirectoryReader::open(path)?),
            false => Self::Zip(ZipContainerReader::open(path)?),
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(dir) => dir.root(),
            Self::Zip(zip) => zip.path(),
        }
    }

    pub fn format(&self) -> ArchiveFormat {
        match self {
            Self::Directory(_) => ArchiveFormat::Directory,
            Self::Zip(_) => ArchiveFormat::Zip,
        }
    }

    /// Stream the names of all content entries (directory markers excluded).
    ///
    /// Every call starts a fresh listing.
    pub fn entries(&self) -> Entries<'_> {
        let inner: Box<dyn Iterator<Item = Result<String>> + '_> = match self {
            Self::Directory(dir) => Box::new(dir.entries()),
            Self::Zip(zip) => Box::new(zip.entries()),
        };
        Entries { inner }
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            Self::Directory(dir) => dir.contains(name),
            Self::Zip(zip) => zip.contains(name),
        }
    }

    /// Open a streaming reader for one entry.
    ///
    /// Returns [`NotFound`](ErrorKind::NotFound) if the entry is absent.
    pub fn open_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        match self {
            Self::Directory(dir) => Ok(Box::new(dir.open_entry(name)?)),
            Self::Zip(zip) => zip.open_entry(name),
        }
    }

    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        let path = self.path().to_path_buf();
        let mut reader = self.open_entry(name)?;
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).map_err(|e| ErrorKind::from_io(e, &path))?;
        Ok(buffer)
    }

    pub fn read_entry_to_string(&mut self, name: &str) -> Result<String> {
        let path = self.path().to_path_buf();
        let bytes = self.read_entry(name)?;
        String::from_utf8(bytes).or_raise(|| ErrorKind::InvalidArchive(path))
    }
}

/// Write access to a new (zip) or existing (directory) archive.
///
/// Tracks the names written during this session: [`copy_entry_from`](Self::copy_entry_from)
/// never replaces an entry that was already written, so the first writer wins.
pub enum ArchiveWriter {
    Directory(DirectoryWriter),
    Zip(ZipContainerWriter),
}

impl ArchiveWriter {
    /// Write into the directory at `root`, creating it if needed.
    pub fn directory(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::Directory(DirectoryWriter::create(root)?))
    }

    /// Start a brand-new zip container in `file`.
    pub fn zip(file: File, path: impl Into<PathBuf>, compression: EntryCompression) -> Self {
        Self::Zip(ZipContainerWriter::new(file, path, compression))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Directory(dir) => dir.root(),
            Self::Zip(zip) => zip.path(),
        }
    }

    pub fn format(&self) -> ArchiveFormat {
        match self {
            Self::Directory(_) => ArchiveFormat::Directory,
            Self::Zip(_) => ArchiveFormat::Zip,
        }
    }

    /// Has `name` been written during this session?
    pub fn is_written(&self, name: &str) -> bool {
        let Ok(name) = validate_entry_name(name) else {
            return false;
        };
        match self {
            Self::Directory(dir) => dir.written().contains(&name),
            Self::Zip(zip) => zip.written().contains(&name),
        }
    }

    /// Stream `source` into a new entry called `name`, returning the number
    /// of bytes written.
    ///
    /// Directory archives overwrite an existing file. Zip containers are
    /// write-once and return [`AlreadyExists`](ErrorKind::AlreadyExists).
    pub fn write_entry(&mut self, name: &str, source: &mut dyn Read) -> Result<u64> {
        match self {
            Self::Directory(dir) => dir.write_entry(name, source),
            Self::Zip(zip) => zip.write_entry(name, source),
        }
    }

    pub fn write_bytes(&mut self, name: &str, data: &[u8]) -> Result<u64> {
        let mut data = data;
        self.write_entry(name, &mut data)
    }

    pub fn add_directory_marker(&mut self, name: &str) -> Result<()> {
        match self {
            Self::Directory(dir) => dir.add_directory_marker(name),
            Self::Zip(zip) => zip.add_directory_marker(name),
        }
    }

    /// Copy entry `name` from another archive into this one.
    ///
    /// Returns `false` without touching anything if `name` was already
    /// written during this session.
    pub fn copy_entry_from(&mut self, source: &mut ArchiveReader, name: &str) -> Result<bool> {
        let name = validate_entry_name(name)?;
        if self.is_written(&name) {
            tracing::debug!(entry = %name, archive = %self.path().display(), "Entry already written; skipping copy");
            return Ok(false);
        }
        let mut reader = source.open_entry(&name)?;
        let size = self.write_entry(&name, &mut reader)?;
        tracing::trace!(entry = %name, size, "Copied entry");
        Ok(true)
    }

    /// Delete an entry that was written earlier. Only directory archives can
    /// do this; entries can't be taken back out of a zip stream.
    pub fn remove_entry(&mut self, name: &str) -> Result<bool> {
        match self {
            Self::Directory(dir) => dir.remove_entry(name),
            Self::Zip(_) => exn::bail!(ErrorKind::Unsupported("removing entries from a zip container")),
        }
    }

    /// Finalize the archive structure. Required for zip containers before the
    /// file is used; a no-op for directories.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %self.path().display(), format = %self.format()))]
    pub fn finish(self) -> Result<()> {
        match self {
            Self::Directory(_) => Ok(()),
            Self::Zip(zip) => zip.finish(),
        }
    }
}
