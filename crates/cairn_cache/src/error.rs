//! Error types for cache operations.

use std::path::PathBuf;

use cairn_common::Digest;

/// Errors that can occur during cache operations.
///
/// Most cache operations are fail-safe from the orchestrator's point of
/// view: errors are logged and treated as misses rather than failing a
/// build. This enum is how the cache reports what went wrong.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing cache files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// No blob is stored under the requested digest.
    #[error("blob {digest} not found in cache")]
    NotFound {
        /// The digest that was looked up.
        digest: Digest,
    },

    /// The digest cannot key a cache entry (unset, or unsafe as a path).
    #[error("invalid cache key '{digest}'")]
    InvalidDigest {
        /// Text form of the rejected digest.
        digest: String,
    },

    /// Streamed blob content did not hash to the digest it was written under.
    #[error("blob content mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the caller asked to write.
        expected: Digest,
        /// The digest of the bytes actually received.
        actual: Digest,
    },

    /// A pointer file could not be parsed as a cached output record.
    #[error("failed to parse cache entry {path}: {reason}")]
    EntryParse {
        /// The pointer file path.
        path: PathBuf,
        /// Description of the parse failure.
        reason: String,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl CacheError {
    /// Returns `true` if this error only means "nothing stored here".
    pub fn is_not_found(&self) -> bool {
        match self {
            CacheError::NotFound { .. } => true,
            CacheError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
