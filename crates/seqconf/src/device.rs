//! Device and telemetry sections - fixed for the lifetime of a session.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where and how the sequencer character device is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Sequencer character device.
    /// Default: /dev/snd/seq
    #[serde(default = "DeviceConfig::default_path")]
    pub path: PathBuf,

    /// Bootstrap device opened (and immediately closed) to trigger module
    /// loading when the primary open fails. Unset disables the fallback.
    /// Default: unset
    #[serde(default)]
    pub bootstrap: Option<PathBuf>,

    /// Open the descriptor in nonblocking mode.
    /// Default: false
    #[serde(default)]
    pub nonblock: bool,
}

impl DeviceConfig {
    pub const DEFAULT_PATH: &'static str = "/dev/snd/seq";

    /// Conventional bootstrap path on systems with on-demand module loading.
    pub const DEFAULT_BOOTSTRAP_PATH: &'static str = "/dev/aloadSEQ";

    fn default_path() -> PathBuf {
        PathBuf::from(Self::DEFAULT_PATH)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            bootstrap: None,
            nonblock: false,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter directive (trace, debug, info, warn, error, or an
    /// `EnvFilter` expression).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
