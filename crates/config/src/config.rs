use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::OptionExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use kura_archive::{ArchiveFormat, EntryCompression};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "kura.toml";
pub const ENV_PREFIX: &str = "KURA_";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub library: LibraryConfig,
    pub archive: ArchiveConfig,
}

/// Where saved manga live and how new ones are stored.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Library roots, searched in order. New archives go into the first one.
    /// Falls back to the platform data directory when empty.
    pub dirs: Vec<PathBuf>,
    /// Format of newly created archives. Existing archives keep theirs.
    pub format: ArchiveFormat,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub compression: EntryCompression,
}

impl Config {
    /// Loads the configuration from `file` (or the platform default location)
    /// and the environment. A missing file is not an error.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let file = match file {
            Some(file) => file.to_path_buf(),
            None => Self::default_file()?,
        };
        tracing::debug!(file = %file.display(), "Loading configuration");
        let mut config: Self = Self::figment(&file)
            .extract()
            .map_err(|e| ErrorKind::Load(e.to_string()))?;
        if config.library.dirs.is_empty() {
            config.library.dirs.push(Self::default_library_dir()?);
        }
        Ok(config)
    }

    fn figment(file: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn default_file() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn default_library_dir() -> Result<PathBuf> {
        Ok(project_dirs()?.data_dir().join("manga"))
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "kura").ok_or_raise(|| ErrorKind::NoHomeDirectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        Jail::expect_with(|jail| {
            let home = jail.directory().display().to_string();
            jail.set_env("HOME", home);
            let config = Config::load(Some(Path::new("missing.toml"))).unwrap();
            assert_eq!(config.library.format, ArchiveFormat::Zip);
            assert_eq!(config.archive.compression, EntryCompression::Stored);
            assert_eq!(config.library.dirs.len(), 1);
            assert!(config.library.dirs[0].ends_with("manga"));
            Ok(())
        });
    }

    #[test]
    fn test_file_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                CONFIG_FILE_NAME,
                r#"
                [library]
                dirs = ["/srv/manga", "/mnt/extra"]
                format = "directory"

                [archive]
                compression = "stored"
                "#,
            )?;
            jail.set_env("KURA_ARCHIVE__COMPRESSION", "deflated");
            let config = Config::load(Some(Path::new(CONFIG_FILE_NAME))).unwrap();
            assert_eq!(config.library.dirs, [PathBuf::from("/srv/manga"), PathBuf::from("/mnt/extra")]);
            assert_eq!(config.library.format, ArchiveFormat::Directory);
            // Environment wins over the file.
            assert_eq!(config.archive.compression, EntryCompression::Deflated);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_value() {
        Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE_NAME, "[library]\nformat = \"rar\"\n")?;
            let err = Config::load(Some(Path::new(CONFIG_FILE_NAME))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load(_)));
            Ok(())
        });
    }
}
