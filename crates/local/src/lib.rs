//! Offline manga storage.
//!
//! Saved manga are self-contained archives (see [`kura_archive`]) described
//! by an `index.json` manifest. [`LocalMangaInput`] reads them,
//! [`LocalMangaOutput`] merges new chapters into them transactionally, and
//! [`LocalLibrary`] ties both to a set of library roots and a per-manga lock.

mod blocking;
pub mod error;
mod filter;
pub mod index;
mod input;
mod library;
pub mod models;
pub mod naming;
mod output;

pub use crate::filter::{ListFilter, SortOrder};
pub use crate::index::MangaIndex;
pub use crate::input::{IMAGE_EXTENSIONS, LocalMangaInput};
pub use crate::library::LocalLibrary;
pub use crate::models::{ChapterRecord, LocalManga, MangaRecord, MangaState, MangaTag, PageRecord};
pub use crate::output::LocalMangaOutput;
