//! Offline manga archive containers.
//!
//! A downloaded manga lives in one self-contained archive: either a plain
//! directory or a single zip (`.cbz`) container. [`ArchiveReader`] and
//! [`ArchiveWriter`] give both layouts the same entry-oriented interface:
//! list, stream out, stream in, and carry entries over from a previous
//! version of the archive.
//!
//! All operations are blocking; async callers should run them inside
//! [`spawn_blocking`](https://docs.rs/tokio/latest/tokio/task/fn.spawn_blocking.html).

pub mod backend;
pub mod error;
mod format;
mod path;

pub use crate::backend::{ArchiveReader, ArchiveWriter, Entries};
pub use crate::format::{ArchiveFormat, EntryCompression, ZIP_EXTENSIONS, has_zip_extension};
pub use crate::path::{ENTRY_URL_SEPARATOR, validate as validate_entry_name};
