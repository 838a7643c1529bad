//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::EngineConfig;
use std::path::Path;

/// File name of the engine configuration inside a project directory.
pub const CONFIG_FILE: &str = "cairn.toml";

/// Loads and validates `cairn.toml` from a project directory.
///
/// A missing file is not an error: the defaults are returned, since every
/// setting has one. Any other I/O failure is reported.
pub fn load_config(project_dir: &Path) -> Result<EngineConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    match std::fs::read_to_string(&config_path) {
        Ok(content) => load_config_from_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EngineConfig::default()),
        Err(source) => Err(ConfigError::Read {
            path: config_path,
            source,
        }),
    }
}

/// Parses and validates a `cairn.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.cache.mode.uses_cache() && config.cache.dir.trim().is_empty() {
        return Err(ConfigError::EmptyCacheDir);
    }
    for (label, limit) in &config.concurrency.limits {
        if label.trim().is_empty() {
            return Err(ConfigError::EmptyLabel);
        }
        if *limit == 0 {
            return Err(ConfigError::ZeroLimit {
                label: label.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CacheMode, DEFAULT_CACHE_DIR};

    #[test]
    fn empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.cache.dir, DEFAULT_CACHE_DIR);
        assert_eq!(config.cache.mode, CacheMode::Enabled);
        assert!(config.concurrency.limits.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[cache]
dir = "/var/cache/cairn"
mode = "verify"

[concurrency.limits]
"go.build.binary" = 2
"oci.push" = 4
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.cache.dir, "/var/cache/cairn");
        assert_eq!(config.cache.mode, CacheMode::Verify);
        assert_eq!(config.concurrency.limits["go.build.binary"], 2);
        assert_eq!(config.concurrency.limits["oci.push"], 4);
    }

    #[test]
    fn disabled_cache_allows_empty_dir() {
        let toml = r#"
[cache]
dir = ""
mode = "disabled"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.cache.mode, CacheMode::Disabled);
    }

    #[test]
    fn enabled_cache_requires_dir() {
        let toml = r#"
[cache]
dir = "  "
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCacheDir));
    }

    #[test]
    fn zero_limit_errors() {
        let toml = r#"
[concurrency.limits]
"go.build.binary" = 0
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroLimit { label } if label == "go.build.binary"));
    }

    #[test]
    fn empty_label_errors() {
        let toml = r#"
[concurrency.limits]
"" = 1
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyLabel));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.cache.mode, CacheMode::Enabled);
    }

    #[test]
    fn load_from_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[cache]\nmode = \"disabled\"\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.cache.mode, CacheMode::Disabled);
    }

    #[test]
    fn io_error_when_config_is_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(CONFIG_FILE)).unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
