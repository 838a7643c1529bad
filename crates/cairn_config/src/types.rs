//! Configuration types deserialized from `cairn.toml`.

use serde::Deserialize;
use std::collections::BTreeMap;

/// Default cache directory, relative to the project directory.
pub const DEFAULT_CACHE_DIR: &str = ".cairn/cache";

/// The top-level engine configuration parsed from `cairn.toml`.
///
/// Every section is optional; an empty file yields the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Local cache settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Concurrency throttling for labeled node classes.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

/// Local content-addressed cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache root, relative to the project directory unless absolute.
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    /// Whether the cache is consulted, ignored, or consulted and cross-checked.
    #[serde(default)]
    pub mode: CacheMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            mode: CacheMode::default(),
        }
    }
}

fn default_cache_dir() -> String {
    DEFAULT_CACHE_DIR.to_string()
}

/// How the orchestrator uses the local cache.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Load cached outputs on hit and store new outputs (default).
    #[default]
    Enabled,
    /// Never consult or write the cache.
    Disabled,
    /// Recompute even on a cache hit and log any digest mismatch.
    Verify,
}

impl CacheMode {
    /// Returns `true` unless the cache is disabled.
    pub fn uses_cache(self) -> bool {
        self != CacheMode::Disabled
    }
}

/// Concurrency limits keyed by well-known node labels (e.g. `"go.build.binary"`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Maximum number of concurrently running computes per label.
    #[serde(default)]
    pub limits: BTreeMap<String, usize>,
}
