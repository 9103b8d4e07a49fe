use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use dataproof_analyzers::RepositoryError;
use dataproof_analyzers::repository::fs::write_bytes_atomic;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml parse error: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("toml encode error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("write error: {0}")]
    Write(#[from] RepositoryError),
}

/// Defaults for `dataproof verify`, overridable per invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    pub run_dir: PathBuf,
    /// Partitions the in-memory engine splits datasets into; 0 means one per thread.
    pub partitions: usize,
    /// Directory of the file-system metrics repository.
    pub repository: Option<PathBuf>,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from("runs"),
            partitions: 0,
            repository: None,
        }
    }
}

pub fn load_or_create_settings(path: &Path) -> Result<CliSettings, SettingsError> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let settings: CliSettings = toml::from_str(&content)?;
        return Ok(settings);
    }

    let settings = CliSettings::default();
    save_settings(path, &settings)?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &CliSettings) -> Result<(), SettingsError> {
    let encoded = toml::to_string_pretty(settings)?;
    write_bytes_atomic(path, encoded.as_bytes())?;
    Ok(())
}
