//! Configuration file support for Medtrack.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medtrack/config.toml`.

use crate::{timezone, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub user: UserConfig,

    #[serde(default)]
    pub safety: SafetyConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Device and timezone configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserConfig {
    /// IANA zone id used to resolve due instants. Configured explicitly, not
    /// detected: the engine takes the zone as an input.
    #[serde(default = "default_zone_id")]
    pub zone_id: String,

    /// Identifier of this device, recorded on every write and used by the
    /// sync tie-break
    #[serde(default = "default_device_id")]
    pub device_id: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            zone_id: default_zone_id(),
            device_id: default_device_id(),
        }
    }
}

/// Safety window parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Hours after the due instant within which a dose is on time
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,

    /// Hours after which an unresolved scheduled dose is swept to unknown
    #[serde(default = "default_unknown_after_hours")]
    pub unknown_after_hours: i64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            unknown_after_hours: default_unknown_after_hours(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| {
        let home = std::env::var("HOME").expect("HOME environment variable not set");
        PathBuf::from(home).join(".local/share")
    });
    base.join("medtrack")
}

fn default_zone_id() -> String {
    "UTC".into()
}

fn default_device_id() -> String {
    "local".into()
}

fn default_window_hours() -> i64 {
    crate::safety::DEFAULT_SAFETY_WINDOW_HOURS
}

fn default_unknown_after_hours() -> i64 {
    48
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Validate configured values that would otherwise fail deep inside a
    /// resolution call
    pub fn validate(&self) -> Result<()> {
        timezone::parse_zone(&self.user.zone_id)?;
        if self.safety.window_hours <= 0 {
            return Err(Error::Config(format!(
                "safety window must be positive, got {}h",
                self.safety.window_hours
            )));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            let home = std::env::var("HOME").expect("HOME environment variable not set");
            PathBuf::from(home).join(".config")
        });
        base.join("medtrack").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
