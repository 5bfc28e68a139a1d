use crate::domain::{config::BridgeConfig, error::{BridgeError, BridgeResult}};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = ".serialbridge";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> BridgeResult<Self> {
        let global_config_path = Self::get_global_config_path()?;
        let project_config_path = Self::find_project_config_path();

        Ok(Self {
            global_config_path,
            project_config_path,
        })
    }

    /// Manager with explicit file locations
    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load configuration: defaults, then the global file, then the project
    /// file. Later layers only override the keys they set.
    pub fn load_config(&self) -> BridgeResult<BridgeConfig> {
        let mut merged = Self::defaults_table()?;

        if self.global_config_path.exists() {
            let global = Self::read_table(&self.global_config_path)?;
            merge_tables(&mut merged, global);
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                let project = Self::read_table(project_path)?;
                merge_tables(&mut merged, project);
            }
        }

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| BridgeError::Config {
                message: format!("Invalid configuration: {}", e),
            })
    }

    /// Load configuration from a single file layered over the defaults
    pub fn load_config_from_path(&self, path: &Path) -> BridgeResult<BridgeConfig> {
        let content = fs::read_to_string(path).map_err(|e| BridgeError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| BridgeError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    /// Save configuration to specific path
    pub fn save_config_to_path(&self, path: &Path, config: &BridgeConfig) -> BridgeResult<()> {
        let content = toml::to_string_pretty(config).map_err(|e| BridgeError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BridgeError::Config {
                message: format!("Failed to create config directory: {}", e),
            })?;
        }

        fs::write(path, content).map_err(|e| BridgeError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Create a default project configuration under `path`
    pub fn init_project_config(&self, path: &Path) -> BridgeResult<PathBuf> {
        let config_file = path.join(CONFIG_DIR).join(CONFIG_FILE);

        if config_file.exists() {
            return Err(BridgeError::Config {
                message: "Project configuration already exists".to_string(),
            });
        }

        self.save_config_to_path(&config_file, &BridgeConfig::default())?;
        Ok(config_file)
    }

    /// Get the current project config path (if any)
    pub fn get_project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    /// Get the global config path
    pub fn get_global_config_path_ref(&self) -> &PathBuf {
        &self.global_config_path
    }

    fn get_global_config_path() -> BridgeResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| BridgeError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join("serialbridge").join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut path = current_dir.as_path();

        loop {
            let config_path = path.join(CONFIG_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            path = path.parent()?;
        }
    }

    fn defaults_table() -> BridgeResult<toml::Table> {
        let value = toml::Value::try_from(BridgeConfig::default()).map_err(|e| BridgeError::Config {
            message: format!("Failed to serialize default config: {}", e),
        })?;

        match value {
            toml::Value::Table(table) => Ok(table),
            _ => Err(BridgeError::Config {
                message: "Default config is not a table".to_string(),
            }),
        }
    }

    fn read_table(path: &Path) -> BridgeResult<toml::Table> {
        let content = fs::read_to_string(path).map_err(|e| BridgeError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        content.parse::<toml::Table>().map_err(|e| BridgeError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_load_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("missing.toml"), None);

        let config = manager.load_config().unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_project_layer_overrides_global() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global").join(CONFIG_FILE);
        let project = temp_dir.path().join(CONFIG_DIR).join(CONFIG_FILE);

        write(&global, "[global]\nlog_level = \"debug\"\n\n[serial]\nport = \"/dev/ttyACM0\"\nbaud_rate = 9600\n");
        write(&project, "[serial]\nport = \"/dev/tty.usbmodem1411\"\n");

        let manager = ConfigManager::with_paths(global, Some(project));
        let config = manager.load_config().unwrap();

        assert_eq!(config.global.log_level, "debug");
        assert_eq!(config.serial.port, "/dev/tty.usbmodem1411");
        // Keys the project file leaves out keep the global value.
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.network.port, 12345);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join(CONFIG_FILE);
        write(&global, "[network]\nport = \"not a number\"\n");

        let manager = ConfigManager::with_paths(global.clone(), None);
        assert!(matches!(manager.load_config(), Err(BridgeError::Config { .. })));
        assert!(matches!(
            manager.load_config_from_path(&global),
            Err(BridgeError::Config { .. })
        ));
    }

    #[test]
    fn test_init_project_config() {
        let temp_dir = TempDir::new().unwrap();
        let manager = ConfigManager::with_paths(temp_dir.path().join("global.toml"), None);

        let config_file = manager.init_project_config(temp_dir.path()).unwrap();
        assert_eq!(config_file, temp_dir.path().join(CONFIG_DIR).join(CONFIG_FILE));

        let loaded = manager.load_config_from_path(&config_file).unwrap();
        assert_eq!(loaded, BridgeConfig::default());

        // A second init refuses to overwrite.
        assert!(manager.init_project_config(temp_dir.path()).is_err());
    }
}
