//! Application configuration
//!
//! Stored as TOML under the user's config directory. A missing file means
//! defaults; a file that exists but does not parse is an error, so a typo
//! never silently points the client at the wrong broker.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::gate::GateConfig;
use crate::mqtt::config::SessionConfig;

const CONFIG_DIR: &str = "mqtt-toggle";
const CONFIG_FILE: &str = "config.toml";

pub const HOST_ENV: &str = "MQTT_TOGGLE_HOST";
pub const PORT_ENV: &str = "MQTT_TOGGLE_PORT";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub gate: GateConfig,
}

impl AppConfig {
    /// Default location, `<config dir>/mqtt-toggle/config.toml`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| eyre!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre!("Failed to serialize config: {}", e))
    }

    pub fn validate(&self) -> Result<()> {
        if self.session.host.trim().is_empty() {
            return Err(eyre!("session.host must not be empty"));
        }
        if self.session.port == 0 {
            return Err(eyre!("session.port must not be 0"));
        }
        if self.gate.topic.is_empty() || self.gate.topic.contains(['+', '#']) {
            return Err(eyre!(
                "gate.topic '{}' must be a non-empty topic without wildcards",
                self.gate.topic
            ));
        }
        Ok(())
    }

    /// Loads the config at `path`, or defaults if the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        if !file_exists(path).await? {
            warn!(
                "Config file {} does not exist, using defaults",
                path.display()
            );
            return Ok(AppConfig::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
        let config = Self::from_toml(&content)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Writes the defaults to `path` unless a file is already there.
    pub async fn ensure_default(path: &Path) -> Result<()> {
        if file_exists(path).await? {
            return Ok(());
        }

        info!("Creating default configuration at {}", path.display());
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        tokio::fs::write(path, AppConfig::default().to_toml()?)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Applies `MQTT_TOGGLE_HOST` / `MQTT_TOGGLE_PORT` style overrides.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup(HOST_ENV) {
            debug!("Broker host overridden to {}", host);
            self.session.host = host;
        }
        if let Some(port) = lookup(PORT_ENV) {
            self.session.port = port
                .parse()
                .map_err(|e| eyre!("Invalid {} '{}': {}", PORT_ENV, port, e))?;
            debug!("Broker port overridden to {}", self.session.port);
        }
        self.validate()
    }
}

async fn file_exists(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| eyre!("Failed to check {}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [session]
            host = "192.168.0.194"
            ack_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.session.host, "192.168.0.194");
        assert_eq!(config.session.port, 1883);
        assert_eq!(config.session.ack_timeout_ms, Some(2500));
        assert_eq!(config.gate, GateConfig::default());
    }

    #[test]
    fn wildcard_command_topic_is_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [gate]
            topic = "test/#"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn defaults_survive_a_round_trip() {
        let text = AppConfig::default().to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), AppConfig::default());
    }

    #[test]
    fn environment_overrides_host_and_port() {
        let vars = HashMap::from([(HOST_ENV, "localhost"), (PORT_ENV, "1884")]);
        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.session.host, "localhost");
        assert_eq!(config.session.port, 1884);
    }

    #[test]
    fn bad_port_override_is_an_error() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|key| (key == PORT_ENV).then(|| "99999".to_string()));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_file_loads_defaults_and_ensure_writes_one() {
        let dir = std::env::temp_dir().join(format!("mqtt-toggle-test-{}", std::process::id()));
        let path = dir.join(CONFIG_FILE);
        let _ = tokio::fs::remove_dir_all(&dir).await;

        assert_eq!(AppConfig::load(&path).await.unwrap(), AppConfig::default());

        AppConfig::ensure_default(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(AppConfig::load(&path).await.unwrap(), AppConfig::default());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
