//! Entry name validation.
//!
//! Entry names are the archive-relative, `/`-separated names shared by both
//! backends. A name that is valid here maps to a file inside a directory
//! archive and to an entry of the same name inside a zip container.

use crate::error::{ErrorKind, Result};
use std::path::{Component, Path};

/// Separates an archive path from an entry name in page URLs, so it may never
/// appear inside an entry name.
pub const ENTRY_URL_SEPARATOR: char = '#';

/// Validates and normalizes an entry name.
///
/// Backslashes are treated as separators, `.` components are dropped and `..`
/// is resolved as long as it never leaves the archive root. Null bytes and
/// [`ENTRY_URL_SEPARATOR`] are rejected.
///
/// # Examples
///
/// ```
/// use kura_archive::validate_entry_name;
/// assert_eq!(validate_entry_name("001002.png").unwrap(), "001002.png");
/// assert_eq!(validate_entry_name("Chapter 1/./002.jpg").unwrap(), "Chapter 1/002.jpg");
/// assert_eq!(validate_entry_name("a\\b.png").unwrap(), "a/b.png");
/// assert!(validate_entry_name("../index.json").is_err());
/// assert!(validate_entry_name("page#1.png").is_err());
/// ```
pub fn validate(name: impl AsRef<str>) -> Result<String> {
    let raw = name.as_ref();
    if raw.contains('\0') || raw.contains(ENTRY_URL_SEPARATOR) {
        exn::bail!(ErrorKind::InvalidEntryName(raw.to_string()));
    }
    let unified = raw.replace('\\', "/");
    let mut components: Vec<&str> = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(s) => match s.to_str() {
                Some(s) => components.push(s),
                None => exn::bail!(ErrorKind::InvalidEntryName(raw.to_string())),
            },
            Component::CurDir => {},
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidEntryName(raw.to_string()));
                }
            },
            // Entry names are always relative to the archive root.
            Component::RootDir | Component::Prefix(_) => exn::bail!(ErrorKind::InvalidEntryName(raw.to_string())),
        }
    }
    if components.is_empty() {
        exn::bail!(ErrorKind::InvalidEntryName(raw.to_string()));
    }
    Ok(components.join("/"))
}
