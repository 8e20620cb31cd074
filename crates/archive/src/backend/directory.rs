//! Directory archive backend.
//!
//! Every entry is a regular file below the archive root. Sub-directories are
//! allowed (and walked when listing) but are never reported as entries.

use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_entry_name;
use exn::ResultExt;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Read side of a directory archive.
#[derive(Debug, Clone)]
pub struct DirectoryReader {
    root: PathBuf,
}
impl DirectoryReader {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let metadata = fs::metadata(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        if !metadata.is_dir() {
            exn::bail!(ErrorKind::InvalidArchive(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entries(&self) -> DirectoryEntries {
        DirectoryEntries {
            walk: WalkDir::new(&self.root).min_depth(1).sort_by_file_name().into_iter(),
            root: self.root.clone(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        validate_entry_name(name).is_ok_and(|name| self.root.join(name).is_file())
    }

    pub fn open_entry(&self, name: &str) -> Result<File> {
        let name = validate_entry_name(name)?;
        let path = self.root.join(&name);
        File::open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ErrorKind::NotFound(name),
            _ => ErrorKind::from_io(e, &path),
        })
        .map_err(exn::Exn::from)
    }
}

/// Lazy, sorted walk over the files of a directory archive.
pub struct DirectoryEntries {
    root: PathBuf,
    walk: walkdir::IntoIter,
}
impl Iterator for DirectoryEntries {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(io::Error::from(e)).or_raise(|| ErrorKind::InvalidArchive(self.root.clone()))),
            };
            // Directory markers and (most likely broken) symlinks are skipped.
            if !entry.file_type().is_file() {
                continue;
            }
            return Some(relative_name(&self.root, entry.path()));
        }
    }
}

fn relative_name(root: &Path, path: &Path) -> Result<String> {
    let lossy = || ErrorKind::InvalidEntryName(path.to_string_lossy().into_owned());
    let relative = path.strip_prefix(root).or_raise(lossy)?;
    let mut parts = Vec::new();
    for component in relative.components() {
        parts.push(component.as_os_str().to_str().ok_or_else(lossy)?);
    }
    Ok(parts.join("/"))
}

/// Prefix of the temp file an entry is written to before it is renamed into
/// place.
const PART_PREFIX: &str = ".part-";

/// Write side of a directory archive. Writing an existing entry overwrites it.
#[derive(Debug)]
pub struct DirectoryWriter {
    root: PathBuf,
    written: HashSet<String>,
}
impl DirectoryWriter {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        Ok(Self { root, written: HashSet::new() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn written(&self) -> &HashSet<String> {
        &self.written
    }

    pub fn write_entry(&mut self, name: &str, source: &mut dyn Read) -> Result<u64> {
        let name = validate_entry_name(name)?;
        let path = self.root.join(&name);
        let parent = path.parent().unwrap_or(self.root.as_path());
        fs::create_dir_all(parent).map_err(|e| ErrorKind::from_io(e, parent))?;
        // Readers never see a partially written entry.
        let mut temp = tempfile::Builder::new()
            .prefix(PART_PREFIX)
            .tempfile_in(parent)
            .map_err(|e| ErrorKind::from_io(e, parent))?;
        let size = io::copy(source, temp.as_file_mut()).map_err(|e| ErrorKind::from_io(e, &path))?;
        temp.as_file_mut().flush().map_err(|e| ErrorKind::from_io(e, &path))?;
        temp.persist(&path).map_err(|e| ErrorKind::from_io(e.error, &path))?;
        self.written.insert(name);
        Ok(size)
    }

    pub fn add_directory_marker(&mut self, name: &str) -> Result<()> {
        let name = validate_entry_name(name)?;
        let path = self.root.join(&name);
        fs::create_dir_all(&path).map_err(|e| ErrorKind::from_io(e, &path))?;
        Ok(())
    }

    /// Removes an entry, returning `false` if it did not exist.
    pub fn remove_entry(&mut self, name: &str) -> Result<bool> {
        let name = validate_entry_name(name)?;
        let path = self.root.join(&name);
        self.written.remove(&name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ErrorKind::from_io(e, &path).into()),
        }
    }
}
