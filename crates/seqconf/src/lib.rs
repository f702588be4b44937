//! Configuration loading for the seqwire sequencer transport.
//!
//! Only settings that are fixed once a session is open live here: which
//! device node to open, whether a bootstrap device may be used to trigger
//! module loading, the default open mode, and the log filter.
//!
//! # Usage
//!
//! ```rust,no_run
//! use seqconf::SeqConfig;
//!
//! let config = SeqConfig::load().expect("Failed to load config");
//! println!("device: {}", config.device.path.display());
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/seqwire/config.toml` (system)
//! 2. `~/.config/seqwire/config.toml` (user)
//! 3. `./seqwire.toml` (local override)
//! 4. Environment variables (`SEQWIRE_*`)
//!
//! # Example Config
//!
//! ```toml
//! [device]
//! path = "/dev/snd/seq"
//! bootstrap = "/dev/aloadSEQ"
//! nonblock = false
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod device;
pub mod loader;

pub use device::{DeviceConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigLayer, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SeqConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl SeqConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/seqwire/config.toml`
    /// 3. `~/.config/seqwire/config.toml`
    /// 4. `./seqwire.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with `config_path` replacing the local override.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = SeqConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::load_from_file(&path)?.apply_to(&mut config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# seqwire configuration\n\n");

        output.push_str("[device]\n");
        output.push_str(&format!("path = \"{}\"\n", self.device.path.display()));
        if let Some(bootstrap) = &self.device.bootstrap {
            output.push_str(&format!("bootstrap = \"{}\"\n", bootstrap.display()));
        }
        output.push_str(&format!("nonblock = {}\n", self.device.nonblock));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SeqConfig::default();
        assert_eq!(config.device.path, PathBuf::from("/dev/snd/seq"));
        assert!(config.device.bootstrap.is_none());
        assert!(!config.device.nonblock);
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_to_toml_parses_back() {
        let mut config = SeqConfig::default();
        config.device.bootstrap = Some(PathBuf::from(DeviceConfig::DEFAULT_BOOTSTRAP_PATH));
        config.device.nonblock = true;

        let text = config.to_toml();
        assert!(text.contains("[device]"));
        assert!(text.contains("[telemetry]"));

        let parsed: SeqConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_to_toml_omits_unset_bootstrap() {
        let text = SeqConfig::default().to_toml();
        assert!(!text.contains("bootstrap"));
    }
}
