//! Host-side configuration.
//!
//! Protocol parameters (chunk size, timeouts) are compile-time constants in
//! [`crate::protocol::constants`]; this covers only how to find the device.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Substring match against the advertised name or address; `None`
    /// selects any peripheral carrying the badge service.
    pub device: Option<String>,
    /// BLE scan duration in seconds.
    pub scan_timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            device: None,
            scan_timeout_secs: 5,
        }
    }
}

impl UploadConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Unavailable(e.to_string()))?;
        toml::from_str(&content).map_err(|e| CoreError::Unavailable(e.to_string()))
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), CoreError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CoreError::Unavailable(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| CoreError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UploadConfig::default();
        assert!(config.device.is_none());
        assert_eq!(config.scan_timeout_secs, 5);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = UploadConfig {
            device: Some("Badge-01".into()),
            scan_timeout_secs: 10,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: UploadConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.device.as_deref(), Some("Badge-01"));
        assert_eq!(parsed.scan_timeout_secs, 10);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: UploadConfig = toml::from_str("device = \"Badge\"").unwrap();
        assert_eq!(parsed.scan_timeout_secs, 5);
    }
}
