//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, SeqConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/seqwire/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("seqwire/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("seqwire.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Settings one config file actually sets. Absent keys leave earlier
/// layers untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub path: Option<PathBuf>,
    /// `Some(None)` clears a bootstrap device set by an earlier file.
    pub bootstrap: Option<Option<PathBuf>>,
    pub nonblock: Option<bool>,
    pub log_level: Option<String>,
}

impl ConfigLayer {
    /// Overwrite the fields of `config` this layer sets.
    pub fn apply_to(self, config: &mut SeqConfig) {
        if let Some(path) = self.path {
            config.device.path = path;
        }
        if let Some(bootstrap) = self.bootstrap {
            config.device.bootstrap = bootstrap;
        }
        if let Some(nonblock) = self.nonblock {
            config.device.nonblock = nonblock;
        }
        if let Some(log_level) = self.log_level {
            config.telemetry.log_level = log_level;
        }
    }
}

/// Load one config layer from a TOML file.
pub fn load_from_file(path: &Path) -> Result<ConfigLayer, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse a config layer from TOML string.
fn parse_toml(contents: &str, path: &Path) -> Result<ConfigLayer, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let invalid = |message: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: message.to_string(),
    };

    let mut layer = ConfigLayer::default();

    if let Some(device) = table.get("device").and_then(|v| v.as_table()) {
        if let Some(v) = device.get("path") {
            let v = v.as_str().ok_or_else(|| invalid("device.path must be a string"))?;
            layer.path = Some(expand_path(v));
        }
        if let Some(v) = device.get("bootstrap") {
            let v = v
                .as_str()
                .ok_or_else(|| invalid("device.bootstrap must be a string"))?;
            // Empty disables a fallback configured in an earlier file
            layer.bootstrap = Some((!v.is_empty()).then(|| expand_path(v)));
        }
        if let Some(v) = device.get("nonblock") {
            let v = v
                .as_bool()
                .ok_or_else(|| invalid("device.nonblock must be a boolean"))?;
            layer.nonblock = Some(v);
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level") {
            let v = v
                .as_str()
                .ok_or_else(|| invalid("telemetry.log_level must be a string"))?;
            layer.log_level = Some(v.to_string());
        }
    }

    Ok(layer)
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut SeqConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("SEQWIRE_DEVICE") {
        config.device.path = expand_path(&v);
        sources.env_overrides.push("SEQWIRE_DEVICE".to_string());
    }
    if let Ok(v) = env::var("SEQWIRE_BOOTSTRAP_DEVICE") {
        // Empty disables a fallback configured in a file
        config.device.bootstrap = if v.is_empty() {
            None
        } else {
            Some(expand_path(&v))
        };
        sources.env_overrides.push("SEQWIRE_BOOTSTRAP_DEVICE".to_string());
    }
    if let Ok(v) = env::var("SEQWIRE_NONBLOCK") {
        if let Some(flag) = parse_bool(&v) {
            config.device.nonblock = flag;
            sources.env_overrides.push("SEQWIRE_NONBLOCK".to_string());
        }
    }

    if let Ok(v) = env::var("SEQWIRE_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("SEQWIRE_LOG_LEVEL".to_string());
    }
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(stripped);
        }
        PathBuf::from(path)
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            match env::var(var_name) {
                Ok(var_value) => PathBuf::from(var_value).join(&stripped[slash_pos + 1..]),
                Err(_) => PathBuf::from(path),
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_path_absolute() {
        let expanded = expand_path("/dev/snd/seq");
        assert_eq!(expanded, PathBuf::from("/dev/snd/seq"));
    }

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/seq/device");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().contains("seq/device"));
    }

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[device]
path = "/dev/snd/seq-test"
"#;
        let layer = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(layer.path, Some(PathBuf::from("/dev/snd/seq-test")));
        assert_eq!(layer.bootstrap, None);
        assert_eq!(layer.nonblock, None);
        assert_eq!(layer.log_level, None);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[device]
path = "/dev/snd/seq"
bootstrap = "/dev/aloadSEQ"
nonblock = true

[telemetry]
log_level = "seqwire=trace"
"#;
        let mut config = SeqConfig::default();
        parse_toml(toml, Path::new("test.toml"))
            .unwrap()
            .apply_to(&mut config);
        assert_eq!(config.device.bootstrap, Some(PathBuf::from("/dev/aloadSEQ")));
        assert!(config.device.nonblock);
        assert_eq!(config.telemetry.log_level, "seqwire=trace");
    }

    #[test]
    fn test_parse_rejects_non_bool_nonblock() {
        let toml = r#"
[device]
nonblock = "sometimes"
"#;
        let err = parse_toml(toml, Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_parse_rejects_non_string_path() {
        let err = parse_toml("[device]\npath = 3\n", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("device.path"));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = parse_toml("[device", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[device]\nbootstrap = \"/dev/aloadSEQ\"").unwrap();

        let layer = load_from_file(file.path()).unwrap();
        assert_eq!(layer.bootstrap, Some(Some(PathBuf::from("/dev/aloadSEQ"))));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_from_file(Path::new("/nonexistent/seqwire.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn test_later_layer_wins_only_for_keys_it_sets() {
        let mut config = SeqConfig::default();
        let system = r#"
[device]
path = "/dev/custom"
bootstrap = "/dev/aloadSEQ"
nonblock = true

[telemetry]
log_level = "debug"
"#;
        parse_toml(system, Path::new("system.toml"))
            .unwrap()
            .apply_to(&mut config);

        // Explicitly setting the compiled defaults still overrides
        let user = r#"
[device]
path = "/dev/snd/seq"
nonblock = false
"#;
        parse_toml(user, Path::new("user.toml"))
            .unwrap()
            .apply_to(&mut config);

        assert_eq!(config.device.path, PathBuf::from("/dev/snd/seq"));
        assert!(!config.device.nonblock);
        assert_eq!(config.device.bootstrap, Some(PathBuf::from("/dev/aloadSEQ")));
        assert_eq!(config.telemetry.log_level, "debug");
    }

    #[test]
    fn test_empty_bootstrap_clears_earlier_layer() {
        let mut config = SeqConfig::default();
        config.device.bootstrap = Some(PathBuf::from("/dev/aloadSEQ"));

        let layer =
            parse_toml("[device]\nbootstrap = \"\"\n", Path::new("local.toml")).unwrap();
        assert_eq!(layer.bootstrap, Some(None));
        layer.apply_to(&mut config);
        assert!(config.device.bootstrap.is_none());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
