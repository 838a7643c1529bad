//! Errors raised while reading or checking `cairn.toml`.

use std::path::PathBuf;

/// Why an engine configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// The file that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML content could not be parsed into an engine configuration.
    #[error("invalid cairn.toml: {0}")]
    Parse(String),

    /// Caching is on but no cache directory is configured.
    #[error("cache.dir must be set unless cache.mode is \"disabled\"")]
    EmptyCacheDir,

    /// A concurrency label is empty or whitespace.
    #[error("concurrency.limits contains an empty label")]
    EmptyLabel,

    /// A concurrency limit of zero would block its label forever.
    #[error("concurrency limit for '{label}' must be at least 1")]
    ZeroLimit {
        /// The offending label.
        label: String,
    },
}
