//! The reader's page window.
//!
//! While reading, pages of a few neighbouring chapters are kept loaded. Whole
//! chapters are pushed onto either end as the reader scrolls towards them and
//! evicted from the opposite end.

pub mod error;
mod pages;

pub use crate::pages::{ChapterPages, ReaderPage};
