//! Configuration file support for Vigil.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/vigil/config.toml`.

use crate::{Error, Identity, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub bible: BibleConfig,
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

/// Identity used when no `--user` is passed on the command line
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl AuthConfig {
    pub fn identity(&self) -> Option<Identity> {
        self.user_id.as_ref().map(|uid| Identity {
            uid: uid.clone(),
            email: self.email.clone(),
        })
    }
}

/// Document store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Bible text provider configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BibleConfig {
    #[serde(default = "default_bible_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub translation: Option<String>,

    #[serde(default = "default_bible_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BibleConfig {
    fn default() -> Self {
        Self {
            base_url: default_bible_base_url(),
            translation: None,
            timeout_secs: default_bible_timeout_secs(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("vigil")
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_bible_base_url() -> String {
    "https://bible-api.com".into()
}

fn default_bible_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
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

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vigil")
            .join("config.toml")
    }

    /// Reject values that would make every store or API call fail
    pub fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            return Err(Error::Config("store.timeout_ms must be > 0".into()));
        }
        if self.bible.timeout_secs == 0 {
            return Err(Error::Config("bible.timeout_secs must be > 0".into()));
        }
        if !self.bible.base_url.starts_with("http://") && !self.bible.base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "bible.base_url must be an http(s) URL, got {}",
                self.bible.base_url
            )));
        }
        Ok(())
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.timeout_ms, 5_000);
        assert_eq!(config.bible.base_url, "https://bible-api.com");
        assert!(config.auth.identity().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip_on_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.auth.user_id = Some("uid-1".into());
        config.bible.translation = Some("kjv".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.auth.identity(), Some(Identity::new("uid-1")));
        assert_eq!(loaded.bible.translation.as_deref(), Some("kjv"));
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[store]
timeout_ms = 250
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.timeout(), Duration::from_millis(250));
        assert_eq!(config.bible.timeout_secs, 10); // default
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[bible]\nbase_url = \"ftp://example\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
