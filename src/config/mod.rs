pub mod settings;

pub use settings::{InjectorSettingsFile, SettingsDocument, SettingsError, SettingsStore};

use crate::models::ManagerConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Name of the manager configuration file.
pub const CONFIG_FILE: &str = "EternalModManager.yaml";

/// Prefix of environment variables overriding the manager configuration.
pub const ENV_PREFIX: &str = "ETERNALMM";

/// Configuration manager for loading and saving the YAML manager configuration.
///
/// Values are layered: defaults, then `EternalModManager.yaml`, then
/// `ETERNALMM_*` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// # Arguments
    /// * `config_dir` - Directory containing `EternalModManager.yaml`
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE),
            config_dir,
        })
    }

    /// Load the manager configuration.
    ///
    /// # Returns
    /// The layered configuration; defaults fill anything not set
    pub fn load_manager_config(&self) -> Result<ManagerConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Manager config file not found at {}, using defaults",
                self.config_path
            );
        }

        let layered = config::Config::builder()
            .add_source(
                config::File::new(self.config_path.as_str(), config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .with_context(|| format!("Failed to read manager config: {}", self.config_path))?;

        let manager_config: ManagerConfig = layered
            .try_deserialize()
            .with_context(|| format!("Failed to parse manager config: {}", self.config_path))?;

        tracing::info!("Loaded manager config from {}", self.config_path);
        Ok(manager_config)
    }

    /// Save the manager configuration.
    pub fn save_manager_config(&self, manager_config: &ManagerConfig) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(manager_config)
            .context("Failed to serialize manager config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write manager config: {}", self.config_path))?;

        tracing::info!("Saved manager config to {}", self.config_path);
        Ok(())
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_create_config_manager() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert!(manager.config_path().ends_with(CONFIG_FILE));
    }

    #[test]
    fn test_creates_missing_config_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested = Utf8PathBuf::try_from(temp_dir.path().join("a").join("b")).unwrap();
        let manager = ConfigManager::new(&nested).unwrap();
        assert!(manager.config_dir().exists());
    }

    #[test]
    fn test_load_save_manager_config() {
        let (manager, _temp_dir) = create_test_config_manager();

        let config = ManagerConfig {
            game_folder: "/games/DOOMEternal".to_string(),
            busy_retry_ms: 500,
            ..Default::default()
        };
        manager.save_manager_config(&config).unwrap();

        let loaded = manager.load_manager_config().unwrap();
        assert_eq!(loaded.game_folder, "/games/DOOMEternal");
        assert_eq!(loaded.busy_retry_ms, 500);
        assert!(loaded.console_logging);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let loaded = manager.load_manager_config().unwrap();
        assert_eq!(loaded.busy_retry_ms, 250);
        assert!(loaded.game_folder.is_empty());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.config_path(), "debug_mode: true\n").unwrap();

        let loaded = manager.load_manager_config().unwrap();
        assert!(loaded.debug_mode);
        assert_eq!(loaded.log_dir, "logs");
    }
}
