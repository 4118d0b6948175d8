//! Configuration management for Tabby
//!
//! Uses XDG-compliant paths:
//! - Config: ~/.config/tabby/config.toml
//! - Data: ~/.local/share/tabby/ (database and log file)

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::models::DEFAULT_CATEGORY;
use crate::scan::MAX_CANDIDATES;

const CONFIG_FILE_NAME: &str = "config.toml";
const DB_FILE_NAME: &str = "bookCollection.sqlite";
const LOG_FILE_NAME: &str = "tabby.log";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Override for the SQLite database location
    pub database_path: Option<PathBuf>,

    /// Name of the pinned category seeded into an empty library
    pub default_category: String,

    /// Cover scanning service
    pub scan: ScanConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            default_category: DEFAULT_CATEGORY.to_string(),
            scan: ScanConfig::default(),
        }
    }
}

/// Settings for the remote cover scanning endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Base URL of the scanning server; `/books/scan_cover` is appended
    pub endpoint: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// How many candidates to keep from a response (never more than 4)
    pub max_candidates: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:5000".to_string(),
            timeout_secs: 60,
            max_candidates: MAX_CANDIDATES,
        }
    }
}

impl ScanConfig {
    /// `max_candidates` held to `1..=MAX_CANDIDATES`.
    pub fn candidate_limit(&self) -> usize {
        self.max_candidates.clamp(1, MAX_CANDIDATES)
    }
}

impl Config {
    /// Load configuration from `path`, writing the defaults there first when
    /// the file does not exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Load from the platform config directory.
    pub fn load() -> Result<Self> {
        Self::load_from(&default_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Database location: the override when set, otherwise the data directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join(DB_FILE_NAME)),
        }
    }

    /// Category name used for seeding, falling back to the built-in default
    /// when the configured value is blank.
    pub fn default_category(&self) -> &str {
        let trimmed = self.default_category.trim();
        if trimmed.is_empty() {
            DEFAULT_CATEGORY
        } else {
            trimmed
        }
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "tabby").ok_or_else(|| anyhow!("could not locate home directory"))
}

/// Config file: ~/.config/tabby/config.toml
pub fn default_config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE_NAME))
}

/// Data directory: ~/.local/share/tabby/
pub fn data_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Log file: ~/.local/share/tabby/tabby.log
pub fn log_file_path() -> Result<PathBuf> {
    Ok(data_dir()?.join(LOG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tabby").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "default_category = \"Shelf\"\n[scan]\nendpoint = \"http://scanner:8080\"\nmax_candidates = 10\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.default_category(), "Shelf");
        assert_eq!(config.scan.endpoint, "http://scanner:8080");
        assert_eq!(config.scan.timeout_secs, 60);
        assert_eq!(config.scan.candidate_limit(), MAX_CANDIDATES);
    }

    #[test]
    fn candidate_limit_stays_in_range() {
        let scan = |max_candidates| ScanConfig {
            max_candidates,
            ..ScanConfig::default()
        };
        assert_eq!(scan(0).candidate_limit(), 1);
        assert_eq!(scan(2).candidate_limit(), 2);
        assert_eq!(scan(99).candidate_limit(), MAX_CANDIDATES);
    }

    #[test]
    fn blank_default_category_falls_back() {
        let config = Config {
            default_category: "   ".to_string(),
            ..Config::default()
        };
        assert_eq!(config.default_category(), DEFAULT_CATEGORY);
    }

    #[test]
    fn database_override_wins() {
        let config = Config {
            database_path: Some(PathBuf::from("/tmp/books.sqlite")),
            ..Config::default()
        };
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/books.sqlite")
        );
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_category = [").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
