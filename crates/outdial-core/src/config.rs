//! TOML-based application configuration.
//!
//! Stores the backend location, the acting user, and the link timing
//! constants. Configuration is stored at `~/.config/outdial/config.toml`;
//! set `OUTDIAL_ENV=dev` to use `~/.config/outdial-dev/` instead.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Backend API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Platform backend base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Acting user id; all link endpoints are addressed per user.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Link lifecycle timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Delay before the first scheduled token check, seconds.
    #[serde(default = "default_initial_check_delay_secs")]
    pub initial_check_delay_secs: u64,
    /// Interval between scheduled token checks, seconds.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Minimum interval between any two token checks, seconds.
    #[serde(default = "default_check_cooldown_secs")]
    pub check_cooldown_secs: u64,
    /// Interval between handshake status polls, seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Maximum handshake status polls before timing out.
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// Loopback port for the authorization callback listener.
    #[serde(default = "default_callback_port")]
    pub callback_port: u16,
}

impl LinkConfig {
    pub fn initial_check_delay(&self) -> Duration {
        Duration::from_secs(self.initial_check_delay_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn check_cooldown(&self) -> Duration {
        Duration::from_secs(self.check_cooldown_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Application configuration.
///
/// Serialized to/from TOML at `~/.config/outdial/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub link: LinkConfig,
}

// Default functions
fn default_base_url() -> String {
    "http://localhost:8000".into()
}
fn default_initial_check_delay_secs() -> u64 {
    2
}
fn default_check_interval_secs() -> u64 {
    30 * 60
}
fn default_check_cooldown_secs() -> u64 {
    5
}
fn default_poll_interval_secs() -> u64 {
    10
}
fn default_max_poll_attempts() -> u32 {
    20
}
fn default_callback_port() -> u16 {
    19823
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_id: None,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            initial_check_delay_secs: default_initial_check_delay_secs(),
            check_interval_secs: default_check_interval_secs(),
            check_cooldown_secs: default_check_cooldown_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            max_poll_attempts: default_max_poll_attempts(),
            callback_port: default_callback_port(),
        }
    }
}

/// Returns `~/.config/outdial[-dev]/` based on OUTDIAL_ENV.
///
/// # Errors
/// Returns an error if the config directory cannot be created.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("OUTDIAL_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("outdial-dev")
    } else {
        base_dir.join("outdial")
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

impl Config {
    fn path() -> Result<PathBuf, ConfigError> {
        let dir = data_dir().map_err(|e| ConfigError::LoadFailed {
            path: PathBuf::from("~/.config"),
            message: e.to_string(),
        })?;
        Ok(dir.join("config.toml"))
    }

    /// Load from disk, writing defaults on first run.
    ///
    /// # Errors
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if the default config cannot be written to disk.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::path()?;
        match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content).map_err(|e| ConfigError::LoadFailed {
                path,
                message: e.to_string(),
            }),
            Err(_) => {
                let cfg = Self::default();
                cfg.save()?;
                Ok(cfg)
            }
        }
    }

    /// Persist to disk.
    ///
    /// # Errors
    /// Returns an error if the config cannot be serialized or written.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::path()?;
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed {
            path: path.clone(),
            message: e.to_string(),
        })?;
        std::fs::write(&path, content).map_err(|e| ConfigError::SaveFailed {
            path,
            message: e.to_string(),
        })
    }

    /// Get a config value as string by dot-separated key.
    pub fn get(&self, key: &str) -> Option<String> {
        let json = serde_json::to_value(self).ok()?;
        let val = key.split('.').try_fold(&json, |v, part| v.get(part))?;
        match val {
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Set a config value by dot-separated key and persist. Returns an
    /// error if the key is unknown or the value has the wrong shape.
    ///
    /// # Errors
    /// Returns an error if the key is unknown, the value cannot be parsed
    /// into the field's type, or the config cannot be saved.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut json = serde_json::to_value(&*self).map_err(|e| ConfigError::SaveFailed {
            path: Self::path().unwrap_or_default(),
            message: e.to_string(),
        })?;

        let slot = key
            .split('.')
            .try_fold(&mut json, |v, part| v.get_mut(part))
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))?;

        let replacement = match &*slot {
            serde_json::Value::String(_) | serde_json::Value::Null => {
                serde_json::Value::String(value.to_string())
            }
            serde_json::Value::Number(_) => {
                let n: i64 = value.parse().map_err(|_| {
                    ConfigError::MissingKey(format!("{key} expects a number"))
                })?;
                serde_json::Value::from(n)
            }
            serde_json::Value::Bool(_) => {
                let b: bool = value.parse().map_err(|_| {
                    ConfigError::MissingKey(format!("{key} expects a bool"))
                })?;
                serde_json::Value::Bool(b)
            }
            _ => return Err(ConfigError::MissingKey(key.to_string())),
        };
        *slot = replacement;

        *self = serde_json::from_value(json).map_err(|e| ConfigError::LoadFailed {
            path: Self::path().unwrap_or_default(),
            message: e.to_string(),
        })?;
        self.save()
    }

    /// Load from disk, returning default on error.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.link.poll_interval_secs, 10);
        assert_eq!(parsed.link.max_poll_attempts, 20);
        assert_eq!(parsed.api.base_url, "http://localhost:8000");
    }

    #[test]
    fn empty_toml_gets_defaults() {
        let parsed: Config = toml::from_str("").unwrap();
        assert_eq!(parsed.link.check_interval_secs, 30 * 60);
        assert_eq!(parsed.link.check_cooldown_secs, 5);
        assert_eq!(parsed.api.user_id, None);
    }

    #[test]
    fn get_supports_dot_path_keys() {
        let cfg = Config::default();
        assert_eq!(cfg.get("api.base_url").as_deref(), Some("http://localhost:8000"));
        assert_eq!(cfg.get("link.max_poll_attempts").as_deref(), Some("20"));
        assert_eq!(cfg.get("nope.nothing"), None);
    }

    #[test]
    fn save_and_load_roundtrip_on_disk() {
        let home = tempfile::tempdir().unwrap();
        std::env::set_var("HOME", home.path());
        std::env::set_var("OUTDIAL_ENV", "dev");

        let mut cfg = Config::default();
        cfg.api.user_id = Some("u1".to_string());
        cfg.link.poll_interval_secs = 15;
        cfg.save().unwrap();

        let loaded = Config::load().unwrap();
        assert_eq!(loaded.api.user_id.as_deref(), Some("u1"));
        assert_eq!(loaded.link.poll_interval_secs, 15);
    }
}
