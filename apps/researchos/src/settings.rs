//! # Settings and Package Files
//!
//! `ros.toml` holds the database location, the backend and the engine
//! [`Config`]. Every field is optional:
//!
//! ```toml
//! database = "research.redb"
//! backend = "redb"
//!
//! [core]
//! max_id_attempts = 16
//! default_level = "Trial"
//! ```
//!
//! Package files are TOML documents deserialized straight into
//! [`PackageDef`].

use researchos_core::{Config, PackageDef, RosError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Settings file looked up in the working directory when `--config` is absent.
pub const DEFAULT_SETTINGS_FILE: &str = "ros.toml";

/// Maximum size of a settings or package file (4 MB).
const MAX_TOML_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Storage backend selected on the command line or in `ros.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Volatile, in-process store.
    Memory,
    /// redb file on disk.
    #[default]
    Redb,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redb => f.write_str("redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: PathBuf,
    pub backend: Backend,
    pub core: Config,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: PathBuf::from("research.redb"),
            backend: Backend::default(),
            core: Config::default(),
        }
    }
}

impl Settings {
    /// Load settings.
    ///
    /// An explicit `path` must exist. Without one, `ros.toml` in the working
    /// directory is used when present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, RosError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let fallback = Path::new(DEFAULT_SETTINGS_FILE);
                if fallback.is_file() {
                    Self::from_file(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, RosError> {
        let text = read_toml_file(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, RosError> {
        toml::from_str(text)
            .map_err(|e| RosError::SerializationError(format!("Invalid settings: {}", e)))
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, database: Option<PathBuf>, backend: Option<Backend>) -> Self {
        if let Some(database) = database {
            self.database = database;
        }
        if let Some(backend) = backend {
            self.backend = backend;
        }
        self
    }
}

/// Parse one package file.
pub fn load_package(path: &Path) -> Result<PackageDef, RosError> {
    let text = read_toml_file(path)?;
    toml::from_str(&text).map_err(|e| {
        RosError::SerializationError(format!("Invalid package file '{}': {}", path.display(), e))
    })
}

/// Parse every package file, in the order given.
pub fn load_packages(paths: &[PathBuf]) -> Result<Vec<PackageDef>, RosError> {
    paths.iter().map(|p| load_package(p)).collect()
}

fn read_toml_file(path: &Path) -> Result<String, RosError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        RosError::IoError(format!("Cannot read '{}': {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(RosError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_TOML_FILE_SIZE {
        return Err(RosError::SerializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_TOML_FILE_SIZE
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| RosError::IoError(format!("Cannot read '{}': {}", path.display(), e)))
}
