//! Resolution of a parsed configuration against a project directory.

use crate::types::{CacheMode, EngineConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A configuration with every path made absolute and every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEngine {
    /// Absolute cache root, or `None` when caching is disabled.
    pub cache_root: Option<PathBuf>,
    /// Cache usage mode.
    pub cache_mode: CacheMode,
    /// Concurrency limits per node label.
    pub limits: BTreeMap<String, usize>,
}

/// Resolves the configuration against `project_dir`.
///
/// A relative cache directory is joined onto the project directory; an
/// absolute one is kept as is. A disabled cache resolves to no root at all.
pub fn resolve_engine(config: &EngineConfig, project_dir: &Path) -> ResolvedEngine {
    let cache_root = config.cache.mode.uses_cache().then(|| {
        let dir = Path::new(&config.cache.dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            project_dir.join(dir)
        }
    });

    ResolvedEngine {
        cache_root,
        cache_mode: config.cache.mode,
        limits: config.concurrency.limits.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;

    #[test]
    fn relative_dir_joins_project() {
        let config = load_config_from_str("").unwrap();
        let resolved = resolve_engine(&config, Path::new("/work/proj"));
        assert_eq!(
            resolved.cache_root,
            Some(PathBuf::from("/work/proj/.cairn/cache"))
        );
        assert_eq!(resolved.cache_mode, CacheMode::Enabled);
    }

    #[test]
    fn absolute_dir_kept() {
        let config = load_config_from_str("[cache]\ndir = \"/tmp/c\"\n").unwrap();
        let resolved = resolve_engine(&config, Path::new("/work/proj"));
        assert_eq!(resolved.cache_root, Some(PathBuf::from("/tmp/c")));
    }

    #[test]
    fn disabled_has_no_root() {
        let config = load_config_from_str("[cache]\nmode = \"disabled\"\n").unwrap();
        let resolved = resolve_engine(&config, Path::new("/work/proj"));
        assert!(resolved.cache_root.is_none());
    }

    #[test]
    fn limits_carried_over() {
        let toml = "[concurrency.limits]\n\"go.build.binary\" = 3\n";
        let config = load_config_from_str(toml).unwrap();
        let resolved = resolve_engine(&config, Path::new("/p"));
        assert_eq!(resolved.limits.get("go.build.binary"), Some(&3));
    }
}
