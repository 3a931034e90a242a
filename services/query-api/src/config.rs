//! Service configuration loaded from YAML.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Pool size used when no valid configuration is available.
pub const DEFAULT_POOL_SIZE: u8 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Number of sandboxes kept ready for incoming queries.
    #[serde(rename = "pool-size", default = "default_pool_size")]
    pub pool_size: u8,
}

fn default_pool_size() -> u8 {
    DEFAULT_POOL_SIZE
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a YAML file, falling back to defaults when the
    /// file is missing, unparseable or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load config, applying defaults");
                return Self::default();
            }
        };

        match serde_yaml::from_str::<ServiceConfig>(&content) {
            Ok(config) if config.pool_size == 0 => {
                tracing::warn!(path = %path.display(), "pool-size must be > 0, applying defaults");
                Self::default()
            }
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, applying defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn test_load_pool_size() {
        let file = write_config("pool-size: 8\n");
        assert_eq!(ServiceConfig::load_or_default(file.path()).pool_size, 8);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServiceConfig::load_or_default("/nonexistent/config.yaml");
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.pool_size, 4);
    }

    #[test]
    fn test_invalid_yaml_uses_defaults() {
        let file = write_config("pool-size: [not a number\n");
        assert_eq!(ServiceConfig::load_or_default(file.path()).pool_size, 4);
    }

    #[test]
    fn test_zero_pool_size_uses_defaults() {
        let file = write_config("pool-size: 0\n");
        assert_eq!(ServiceConfig::load_or_default(file.path()).pool_size, 4);
    }

    #[test]
    fn test_missing_key_uses_default_value() {
        let file = write_config("{}\n");
        assert_eq!(ServiceConfig::load_or_default(file.path()).pool_size, 4);
    }
}
