//! Zip container backend.
//!
//! Containers are write-once: a [`ZipContainerWriter`] streams entries into a
//! brand-new file and refuses to write the same name twice. Updating an
//! archive therefore always means writing a new container and swapping it in.

use crate::error::{ErrorKind, Result};
use crate::format::EntryCompression;
use crate::path::validate as validate_entry_name;
use exn::OptionExt;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Read side of a zip container.
pub struct ZipContainerReader {
    path: PathBuf,
    archive: ZipArchive<BufReader<File>>,
    // Normalized entry names in container order, with the raw name stored
    // in the container for each.
    names: Vec<String>,
    raw_names: HashMap<String, String>,
}
impl ZipContainerReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| ErrorKind::from_io(e, &path))?;
        let archive = ZipArchive::new(BufReader::new(file)).map_err(|e| ErrorKind::from_zip(e, &path, None))?;
        let mut names = Vec::new();
        let mut raw_names = HashMap::new();
        for raw in archive.file_names().filter(|name| !name.ends_with(['/', '\\'])) {
            let Ok(name) = validate_entry_name(raw) else {
                tracing::warn!(archive = %path.display(), entry = raw, "Skipping unsafe zip entry name");
                continue;
            };
            if raw_names.contains_key(&name) {
                tracing::warn!(archive = %path.display(), entry = raw, "Skipping duplicate zip entry name");
                continue;
            }
            raw_names.insert(name.clone(), raw.to_string());
            names.push(name);
        }
        Ok(Self { path, archive, names, raw_names })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalized entry names in container order, without directory markers.
    ///
    /// Names written by other tools (`./001.png`, `Vol 1\001.jpg`) are
    /// listed in normalized form. Names that could escape the archive root
    /// are dropped.
    pub fn entries(&self) -> impl Iterator<Item = Result<String>> + '_ {
        self.names.iter().cloned().map(Ok)
    }

    pub fn contains(&self, name: &str) -> bool {
        validate_entry_name(name).is_ok_and(|name| self.raw_names.contains_key(&name))
    }

    pub fn open_entry(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        let name = validate_entry_name(name)?;
        let raw = self.raw_names.get(&name).ok_or_raise(|| ErrorKind::NotFound(name.clone()))?;
        let file = self.archive.by_name(raw).map_err(|e| ErrorKind::from_zip(e, &self.path, Some(&name)))?;
        if file.is_dir() {
            exn::bail!(ErrorKind::NotFound(name));
        }
        Ok(Box::new(file))
    }
}

/// Write side of a zip container.
pub struct ZipContainerWriter {
    path: PathBuf,
    writer: ZipWriter<File>,
    options: SimpleFileOptions,
    written: HashSet<String>,
}
impl ZipContainerWriter {
    /// Start a new container in `file`. `path` is only used for error
    /// reporting and logging.
    pub fn new(file: File, path: impl Into<PathBuf>, compression: EntryCompression) -> Self {
        let options = SimpleFileOptions::default().compression_method(compression.into()).unix_permissions(0o644);
        Self {
            path: path.into(),
            writer: ZipWriter::new(file),
            options,
            written: HashSet::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn written(&self) -> &HashSet<String> {
        &self.written
    }

    pub fn write_entry(&mut self, name: &str, source: &mut dyn Read) -> Result<u64> {
        let name = validate_entry_name(name)?;
        if self.written.contains(&name) {
            exn::bail!(ErrorKind::AlreadyExists(name));
        }
        self.writer
            .start_file(name.as_str(), self.options)
            .map_err(|e| ErrorKind::from_zip(e, &self.path, Some(&name)))?;
        let size = io::copy(source, &mut self.writer).map_err(|e| ErrorKind::from_io(e, &self.path))?;
        self.written.insert(name);
        Ok(size)
    }

    pub fn add_directory_marker(&mut self, name: &str) -> Result<()> {
        let name = format!("{}/", validate_entry_name(name)?);
        if self.written.insert(name.clone()) {
            self.writer
                .add_directory(name.as_str(), self.options)
                .map_err(|e| ErrorKind::from_zip(e, &self.path, Some(&name)))?;
        }
        Ok(())
    }

    /// Writes the central directory and syncs the file to disk.
    pub fn finish(self) -> Result<()> {
        let mut file = self.writer.finish().map_err(|e| ErrorKind::from_zip(e, &self.path, None))?;
        file.flush().map_err(|e| ErrorKind::from_io(e, &self.path))?;
        file.sync_all().map_err(|e| ErrorKind::from_io(e, &self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(dir: &Path) -> (PathBuf, ZipContainerWriter) {
        let path = dir.join("manga.cbz");
        let file = File::create(&path).unwrap();
        let writer = ZipContainerWriter::new(file, &path, EntryCompression::Deflated);
        (path, writer)
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (path, mut writer) = container(temp_dir.path());
        writer.write_entry("000000.jpg", &mut &b"cover"[..]).unwrap();
        writer.add_directory_marker("extras").unwrap();
        writer.write_entry("extras/001001.png", &mut &b"page"[..]).unwrap();
        writer.finish().unwrap();

        let mut reader = ZipContainerReader::open(&path).unwrap();
        let entries: Vec<String> = reader.entries().collect::<Result<_>>().unwrap();
        assert_eq!(entries, ["000000.jpg", "extras/001001.png"]);
        assert!(reader.contains("extras/001001.png"));
        let mut buf = Vec::new();
        reader.open_entry("extras/001001.png").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"page");
    }

    #[test]
    fn test_write_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (_, mut writer) = container(temp_dir.path());
        writer.write_entry("001001.png", &mut &b"first"[..]).unwrap();
        let err = writer.write_entry("001001.png", &mut &b"second"[..]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    }

    #[test]
    fn test_missing_entry() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (path, writer) = container(temp_dir.path());
        writer.finish().unwrap();
        let mut reader = ZipContainerReader::open(&path).unwrap();
        let err = reader.open_entry("index.json").err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotFound(name) if name == "index.json"));
    }

    #[test]
    fn test_foreign_entry_names_are_normalized() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("foreign.cbz");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        let options = SimpleFileOptions::default();
        for (name, data) in [("Vol 1\\001.jpg", b"v1"), ("./002.png", b"p2"), ("../escape.png", b"no")] {
            zip.start_file(name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();

        let mut reader = ZipContainerReader::open(&path).unwrap();
        let entries: Vec<String> = reader.entries().collect::<Result<_>>().unwrap();
        assert_eq!(entries, ["Vol 1/001.jpg", "002.png"]);
        assert!(reader.contains("Vol 1/001.jpg"));
        assert!(!reader.contains("../escape.png"));
        let mut buf = Vec::new();
        reader.open_entry("Vol 1/001.jpg").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"v1");
        buf.clear();
        reader.open_entry("002.png").unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"p2");
    }

    #[test]
    fn test_open_garbage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.cbz");
        std::fs::write(&path, b"definitely not a zip file").unwrap();
        let err = ZipContainerReader::open(&path).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidArchive(_)));
    }
}
