//! The cache interface and its two implementations.
//!
//! [`Cache`] is what the orchestrator and the cacheable adapters talk to.
//! [`LocalCache`] ties together the blob store and the pointer index under
//! one root directory; [`NoopCache`] reports a miss for everything and
//! discards writes, which is how caching is turned off entirely.

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use cairn_common::Digest;
use tracing::{debug, info};

use crate::blob::{BlobInfo, BlobStore};
use crate::entry::{CachedOutput, EntryIndex};
use crate::error::CacheError;

/// A content-addressed store of blobs plus an index of input-digest pointers.
///
/// All operations are keyed by [`Digest`] and must reject the unset digest.
/// Implementations are shared across tasks and must be thread-safe.
pub trait Cache: Send + Sync {
    /// Reads a blob fully into memory.
    fn bytes(&self, digest: &Digest) -> Result<Vec<u8>, CacheError>;

    /// Opens a blob for streaming reads.
    fn blob(&self, digest: &Digest) -> Result<Box<dyn Read + Send>, CacheError>;

    /// Returns metadata about a stored blob.
    fn stat(&self, digest: &Digest) -> Result<BlobInfo, CacheError>;

    /// Stores a blob from a reader. A no-op if the blob already exists.
    fn write_blob(&self, digest: &Digest, reader: &mut dyn Read) -> Result<(), CacheError>;

    /// Stores a blob from memory. A no-op if the blob already exists.
    fn write_bytes(&self, digest: &Digest, data: &[u8]) -> Result<(), CacheError> {
        self.write_blob(digest, &mut &data[..])
    }

    /// Loads the record a pointer names, if any.
    fn load_entry(&self, pointer: &Digest) -> Result<Option<CachedOutput>, CacheError>;

    /// Writes `entry` under every digest in `pointers`.
    fn store_entry(&self, pointers: &[Digest], entry: &CachedOutput) -> Result<(), CacheError>;

    /// Returns `false` if this cache never retains anything.
    ///
    /// The orchestrator uses this to skip digesting and persisting work
    /// that could never be read back.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Disk-backed cache rooted at a single directory.
pub struct LocalCache {
    /// Root directory for all cache files.
    root: PathBuf,

    /// Content-addressed blob store under `blobs/`.
    blobs: BlobStore,

    /// Pointer files under `index/`.
    index: EntryIndex,
}

impl LocalCache {
    /// Opens (creating if necessary) a cache rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(root).map_err(|e| CacheError::io(root, e))?;
        debug!(root = %root.display(), "opened local cache");
        Ok(Self {
            root: root.to_path_buf(),
            blobs: BlobStore::new(root),
            index: EntryIndex::new(root),
        })
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Re-hashes every blob and returns the digests whose content is corrupt.
    pub fn verify_blobs(&self) -> Result<Vec<Digest>, CacheError> {
        self.blobs.verify()
    }

    /// Removes pointer files that are unreadable or carry an incompatible version.
    ///
    /// Returns the number of pointers removed.
    pub fn prune_entries(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for (pointer, _) in self.index.list()? {
            let stale = match self.index.load(&pointer) {
                Ok(Some(_)) => false,
                Ok(None) | Err(CacheError::EntryParse { .. }) => true,
                Err(e) => return Err(e),
            };
            if stale {
                self.index.remove(&pointer)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "pruned stale cache entries");
        }
        Ok(removed)
    }

    /// Removes blobs that no pointer names as its output.
    ///
    /// Blobs an output refers to only indirectly (for example the layers of
    /// an image manifest) are not tracked by the index, so callers storing
    /// such graphs should not collect this cache. Returns the number of
    /// blobs removed.
    pub fn gc(&self) -> Result<usize, CacheError> {
        let mut live = HashSet::new();
        for (pointer, _) in self.index.list()? {
            if let Ok(Some(entry)) = self.index.load(&pointer) {
                live.insert(entry.digest);
            }
        }

        let mut removed = 0;
        for digest in self.blobs.list()? {
            if !live.contains(&digest) {
                self.blobs.remove(&digest)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, live = live.len(), "collected unreferenced blobs");
        }
        Ok(removed)
    }
}

impl Cache for LocalCache {
    fn bytes(&self, digest: &Digest) -> Result<Vec<u8>, CacheError> {
        self.blobs.read(digest)
    }

    fn blob(&self, digest: &Digest) -> Result<Box<dyn Read + Send>, CacheError> {
        Ok(Box::new(self.blobs.open(digest)?))
    }

    fn stat(&self, digest: &Digest) -> Result<BlobInfo, CacheError> {
        self.blobs.stat(digest)
    }

    fn write_blob(&self, digest: &Digest, reader: &mut dyn Read) -> Result<(), CacheError> {
        if !self.blobs.write(digest, reader)? {
            debug!(digest = %digest, "blob already cached, skipping write");
        }
        Ok(())
    }

    fn load_entry(&self, pointer: &Digest) -> Result<Option<CachedOutput>, CacheError> {
        self.index.load(pointer)
    }

    fn store_entry(&self, pointers: &[Digest], entry: &CachedOutput) -> Result<(), CacheError> {
        self.index.store(pointers, entry)
    }
}

/// A cache that stores nothing: every read misses and every write is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl Cache for NoopCache {
    fn bytes(&self, digest: &Digest) -> Result<Vec<u8>, CacheError> {
        Err(CacheError::NotFound {
            digest: digest.clone(),
        })
    }

    fn blob(&self, digest: &Digest) -> Result<Box<dyn Read + Send>, CacheError> {
        Err(CacheError::NotFound {
            digest: digest.clone(),
        })
    }

    fn stat(&self, digest: &Digest) -> Result<BlobInfo, CacheError> {
        Err(CacheError::NotFound {
            digest: digest.clone(),
        })
    }

    fn write_blob(&self, _digest: &Digest, _reader: &mut dyn Read) -> Result<(), CacheError> {
        Ok(())
    }

    fn load_entry(&self, _pointer: &Digest) -> Result<Option<CachedOutput>, CacheError> {
        Ok(None)
    }

    fn store_entry(&self, _pointers: &[Digest], _entry: &CachedOutput) -> Result<(), CacheError> {
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}
