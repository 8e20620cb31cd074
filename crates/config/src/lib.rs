//! Layered configuration: built-in defaults, then a TOML file, then
//! `KURA_`-prefixed environment variables (nested keys separated by `__`,
//! e.g. `KURA_LIBRARY__FORMAT=directory`).

mod config;
pub mod error;

pub use crate::config::{ArchiveConfig, CONFIG_FILE_NAME, Config, ENV_PREFIX, LibraryConfig};
