//! Configuration persistence for search services
//!
//! Saves and loads a [`SearchConfig`] as versioned JSON protected by a CRC32
//! checksum. Writes go through a temporary file and an atomic rename, and the
//! previous file is kept as a backup.

use crate::config::SearchConfig;
use crate::error::SearchError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Current version of the persisted configuration format
pub const CONFIG_VERSION: u32 = 1;

/// Configuration file name
pub const CONFIG_FILE: &str = "search.config";

/// Backup configuration file name
pub const CONFIG_BACKUP_FILE: &str = "search.config.bak";

/// Persisted configuration with versioning and integrity checking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedConfig {
    /// Version of the configuration format
    pub version: u32,
    /// The actual search configuration
    pub config: SearchConfig,
    /// Timestamp when the configuration was created
    pub created_at: SystemTime,
    /// Timestamp when the configuration was last modified
    pub modified_at: SystemTime,
    /// CRC32 checksum of the configuration
    pub checksum: u32,
}

impl PersistedConfig {
    /// Create a new persisted configuration from a SearchConfig
    pub fn new(config: SearchConfig) -> Result<Self> {
        config.validate()?;

        let now = SystemTime::now();
        let mut persisted = Self {
            version: CONFIG_VERSION,
            config,
            created_at: now,
            modified_at: now,
            checksum: 0,
        };
        persisted.update_checksum()?;

        Ok(persisted)
    }

    /// Save the configuration to a file atomically
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.modified_at = SystemTime::now();
        self.update_checksum()?;
        self.create_backup(path)?;

        let json_content = serde_json::to_string_pretty(self)
            .map_err(|e| SearchError::Config(format!("Failed to serialize configuration: {}", e)))?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json_content).map_err(|e| {
            SearchError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to write configuration to {}: {}", temp_path.display(), e),
            ))
        })?;

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            SearchError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to move configuration from {} to {}: {}",
                    temp_path.display(),
                    path.display(),
                    e
                ),
            ))
        })?;

        Ok(())
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SearchError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read configuration file {}: {}", path.display(), e),
            ))
        })?;

        let mut persisted: Self = serde_json::from_str(&content).map_err(|e| {
            SearchError::Corruption(format!("Failed to parse configuration file {}: {}", path.display(), e))
        })?;

        let stored_checksum = persisted.checksum;
        persisted.update_checksum()?;
        if stored_checksum != persisted.checksum {
            return Err(SearchError::Corruption(format!(
                "Configuration file checksum mismatch: expected {}, got {}",
                persisted.checksum, stored_checksum
            )));
        }

        if persisted.version > CONFIG_VERSION {
            return Err(SearchError::Config(format!(
                "Unsupported configuration version: found {}, maximum supported {}",
                persisted.version, CONFIG_VERSION
            )));
        }

        persisted.config.validate()?;
        Ok(persisted)
    }

    /// Restore configuration from the backup file next to `config_path`
    pub fn restore_from_backup(config_path: &Path) -> Result<Self> {
        let backup_path = backup_path_for(config_path);
        if !backup_path.exists() {
            return Err(SearchError::Config(format!(
                "No backup configuration file found at {}",
                backup_path.display()
            )));
        }

        let backup_config = Self::load(&backup_path)?;
        fs::copy(&backup_path, config_path)?;
        Ok(backup_config)
    }

    /// Load the configuration stored in `directory`.
    ///
    /// A missing file yields the default configuration. A corrupted file is
    /// replaced by its backup when one exists.
    pub fn load_from_directory(directory: &Path) -> Result<SearchConfig> {
        let path = directory.join(CONFIG_FILE);
        if !path.exists() {
            info!("No search configuration in {}, using defaults", directory.display());
            return Ok(SearchConfig::default());
        }

        match Self::load(&path) {
            Ok(persisted) => Ok(persisted.config),
            Err(SearchError::Corruption(reason)) => {
                warn!("Search configuration {} is corrupted ({}), restoring backup", path.display(), reason);
                Ok(Self::restore_from_backup(&path)?.config)
            }
            Err(e) => Err(e),
        }
    }

    fn create_backup(&self, config_path: &Path) -> Result<()> {
        if !config_path.exists() {
            return Ok(());
        }

        let backup_path = backup_path_for(config_path);
        fs::copy(config_path, &backup_path).map_err(|e| {
            SearchError::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create backup from {} to {}: {}",
                    config_path.display(),
                    backup_path.display(),
                    e
                ),
            ))
        })?;

        Ok(())
    }

    fn update_checksum(&mut self) -> Result<()> {
        let config_bytes = serde_json::to_vec(&self.config)
            .map_err(|e| SearchError::Config(format!("Failed to serialize config for checksum: {}", e)))?;
        self.checksum = crc32fast::hash(&config_bytes);
        Ok(())
    }
}

fn backup_path_for(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(CONFIG_BACKUP_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnvironment;

    fn create_test_config() -> SearchConfig {
        SearchConfig::new()
            .default_size(25)
            .max_result_window(5000)
            .cancellation_check_interval(32)
    }

    #[test]
    fn test_persisted_config_creation() {
        let config = create_test_config();
        let persisted = PersistedConfig::new(config.clone()).unwrap();

        assert_eq!(persisted.version, CONFIG_VERSION);
        assert_eq!(persisted.config, config);
        assert!(persisted.checksum > 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SearchConfig::new().max_result_window(0);
        assert!(PersistedConfig::new(config).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let env = TestEnvironment::new("test_save_and_load");
        let config_path = env.path().join(CONFIG_FILE);
        let config = create_test_config();

        let mut persisted = PersistedConfig::new(config.clone()).unwrap();
        persisted.save(&config_path).unwrap();
        assert!(config_path.exists());
        assert!(!config_path.with_extension("tmp").exists());

        let loaded = PersistedConfig::load(&config_path).unwrap();
        assert_eq!(loaded.config, config);
        assert_eq!(loaded.checksum, persisted.checksum);
    }

    #[test]
    fn test_checksum_validation() {
        let env = TestEnvironment::new("test_checksum_validation");
        let config_path = env.path().join(CONFIG_FILE);

        let mut persisted = PersistedConfig::new(create_test_config()).unwrap();
        persisted.save(&config_path).unwrap();

        let content = fs::read_to_string(&config_path).unwrap();
        let content = content.replace("\"default_size\": 25", "\"default_size\": 26");
        fs::write(&config_path, content).unwrap();

        match PersistedConfig::load(&config_path) {
            Err(SearchError::Corruption(msg)) => assert!(msg.contains("checksum mismatch")),
            other => panic!("Expected Corruption error, got {other:?}"),
        }
    }

    #[test]
    fn test_backup_and_restore() {
        let env = TestEnvironment::new("test_backup_and_restore");
        let config_path = env.path().join(CONFIG_FILE);

        let mut first = PersistedConfig::new(create_test_config()).unwrap();
        first.save(&config_path).unwrap();

        let mut second = PersistedConfig::new(create_test_config().default_size(50)).unwrap();
        second.save(&config_path).unwrap();
        assert!(env.path().join(CONFIG_BACKUP_FILE).exists());

        let restored = PersistedConfig::restore_from_backup(&config_path).unwrap();
        assert_eq!(restored.config.default_size, 25);
        assert_eq!(PersistedConfig::load(&config_path).unwrap().config.default_size, 25);
    }

    #[test]
    fn test_load_from_directory_falls_back() {
        let env = TestEnvironment::new("test_load_from_directory_falls_back");
        assert_eq!(PersistedConfig::load_from_directory(env.path()).unwrap(), SearchConfig::default());

        let config_path = env.path().join(CONFIG_FILE);
        PersistedConfig::new(create_test_config()).unwrap().save(&config_path).unwrap();
        PersistedConfig::new(create_test_config().default_size(50))
            .unwrap()
            .save(&config_path)
            .unwrap();
        assert_eq!(PersistedConfig::load_from_directory(env.path()).unwrap().default_size, 50);

        fs::write(&config_path, "not json").unwrap();
        assert_eq!(PersistedConfig::load_from_directory(env.path()).unwrap().default_size, 25);
    }

    #[test]
    fn test_restore_without_backup_fails() {
        let env = TestEnvironment::new("test_restore_without_backup_fails");
        let config_path = env.path().join(CONFIG_FILE);
        assert!(PersistedConfig::restore_from_backup(&config_path).is_err());
    }
}
