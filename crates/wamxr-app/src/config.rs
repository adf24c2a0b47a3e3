//! World configuration, stored as RON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use wamxr_runtime::{ConfigSource, DirConfigSource, HttpConfigSource};

/// How one peer joins the world
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Names this peer in logs. Document changes carry a random actor id.
    pub peer_name: String,

    /// Base URL of the kind config service (`{base}/wamsConfig/{kind}.json`)
    pub config_url: Option<String>,

    /// Local directory of kind configs; wins over `config_url`
    pub config_dir: Option<PathBuf>,

    pub frame_interval_ms: u64,

    /// Capacity of the peer link and the user message channel
    pub channel_capacity: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            peer_name: "local".to_string(),
            config_url: None,
            config_dir: None,
            frame_interval_ms: 16,
            channel_capacity: 256,
        }
    }
}

impl WorldConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigFileError::Io(e.to_string()))?;
        let config: Self =
            ron::from_str(&text).map_err(|e| ConfigFileError::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigFileError> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigFileError::Serialization(e.to_string()))?;
        std::fs::write(path.as_ref(), text).map_err(|e| ConfigFileError::Io(e.to_string()))?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigFileError> {
        if self.peer_name.is_empty() {
            return Err(ConfigFileError::Invalid("peer_name is empty".to_string()));
        }
        if self.frame_interval_ms == 0 {
            return Err(ConfigFileError::Invalid(
                "frame_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigFileError::Invalid(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Where non built-in kinds are looked up, if anywhere
    pub fn config_source(&self) -> Option<Arc<dyn ConfigSource>> {
        if let Some(dir) = &self.config_dir {
            return Some(Arc::new(DirConfigSource::new(dir)));
        }
        self.config_url
            .as_ref()
            .map(|url| Arc::new(HttpConfigSource::new(url.clone())) as Arc<dyn ConfigSource>)
    }
}

/// Errors reading or writing a config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.ron");
        let config = WorldConfig {
            peer_name: "studio".to_string(),
            config_url: Some("http://localhost:8080/".to_string()),
            ..WorldConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(WorldConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.ron");
        std::fs::write(&path, "(peer_name: \"stage\")").unwrap();

        let config = WorldConfig::load(&path).unwrap();
        assert_eq!(config.peer_name, "stage");
        assert_eq!(config.frame_interval(), Duration::from_millis(16));
        assert!(config.config_source().is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.ron");
        std::fs::write(&path, "(frame_interval_ms: 0)").unwrap();
        assert!(matches!(
            WorldConfig::load(&path),
            Err(ConfigFileError::Invalid(_))
        ));

        std::fs::write(&path, "(peer_name: 3)").unwrap();
        assert!(matches!(
            WorldConfig::load(&path),
            Err(ConfigFileError::Deserialization(_))
        ));
        assert!(matches!(
            WorldConfig::load(dir.path().join("missing.ron")),
            Err(ConfigFileError::Io(_))
        ));
    }

    #[test]
    fn test_config_dir_wins_over_url() {
        let config = WorldConfig {
            config_url: Some("http://localhost:8080/".to_string()),
            config_dir: Some(PathBuf::from("/tmp/kinds")),
            ..WorldConfig::default()
        };
        assert!(config.config_source().is_some());
    }
}
