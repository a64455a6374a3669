//! `.config/plinth.toml` discovery.
//!
//! The file is looked up from the working directory upwards. Relative paths
//! inside it are anchored at the directory that holds `.config/`.

use camino::{Utf8Path, Utf8PathBuf};
use plinth::Settings;

const CONFIG_FILE: &str = ".config/plinth.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no .config/plinth.toml found in the current directory or any parent")]
    NotFound,

    #[error("non UTF-8 working directory: {0}")]
    NonUtf8Cwd(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        source: toml::de::Error,
    },
}

/// Load settings for the current working directory.
pub fn load() -> Result<(Settings, Utf8PathBuf), ConfigError> {
    let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
        path: Utf8PathBuf::from("."),
        source,
    })?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| ConfigError::NonUtf8Cwd(p.display().to_string()))?;
    load_from(&cwd)
}

pub fn load_from(start: &Utf8Path) -> Result<(Settings, Utf8PathBuf), ConfigError> {
    let path = start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|candidate| candidate.is_file())
        .ok_or(ConfigError::NotFound)?;

    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;

    let project_root = path
        .parent()
        .and_then(Utf8Path::parent)
        .unwrap_or(start)
        .to_path_buf();
    Ok((settings.relative_to(&project_root), path))
}
