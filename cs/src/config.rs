//! Configuration for chunkstore

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::store::StoreOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the segment files
    #[serde(rename = "store-path")]
    pub store_path: PathBuf,

    /// Segment file name prefix
    #[serde(rename = "file-prefix")]
    pub file_prefix: String,

    /// Tail size that triggers a rollover to a new segment
    #[serde(rename = "segment-max-bytes")]
    pub segment_max_bytes: u64,
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chunkstore")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            file_prefix: crate::DEFAULT_FILE_PREFIX.to_string(),
            segment_max_bytes: crate::DEFAULT_SEGMENT_MAX_BYTES,
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    ///
    /// Lookup order: explicit path, `./chunkstore.yml`,
    /// `~/.config/chunkstore/chunkstore.yml`.
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from_file(config_path)
                .context(format!("Failed to load config from {}", config_path.display()));
        }

        let default_paths = [
            Some(PathBuf::from("chunkstore.yml")),
            dirs::config_dir().map(|p| p.join("chunkstore").join("chunkstore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                match Self::load_from_file(path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Store options derived from this config
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            segment_max_bytes: self.segment_max_bytes,
        }
    }
}
