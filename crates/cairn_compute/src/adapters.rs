//! Built-in cacheable adapters.

use std::fmt;
use std::io::{self, Read};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use cairn_cache::Cache;
use cairn_common::Digest;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::registry::Cacheable;

/// Caches [`Bytes`] values as a single blob.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCacheable;

impl Cacheable for BytesCacheable {
    type Value = Bytes;

    fn compute_digest(&self, value: &Bytes) -> anyhow::Result<Digest> {
        Ok(Digest::of_bytes(value))
    }

    fn load_cached(&self, cache: &Arc<dyn Cache>, digest: &Digest) -> anyhow::Result<Bytes> {
        Ok(Bytes::from(cache.bytes(digest)?))
    }

    fn cache(&self, cache: &dyn Cache, value: &Bytes) -> anyhow::Result<Digest> {
        let digest = Digest::of_bytes(value);
        cache.write_bytes(&digest, value)?;
        Ok(digest)
    }
}

#[derive(Clone)]
enum Source {
    Memory(Bytes),
    File(PathBuf),
    Blob { cache: Arc<dyn Cache>, digest: Digest },
}

/// A byte source that can be opened any number of times.
///
/// Backed by memory, a file on disk, or a blob in a cache. Large outputs
/// loaded from the cache stay on disk until they are read.
#[derive(Clone)]
pub struct ByteStream {
    source: Source,
}

impl ByteStream {
    /// A stream over in-memory bytes.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            source: Source::Memory(data.into()),
        }
    }

    /// A stream over the contents of a file.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File(path.into()),
        }
    }

    /// A stream over a blob stored in `cache`.
    pub fn from_blob(cache: Arc<dyn Cache>, digest: Digest) -> Self {
        Self {
            source: Source::Blob { cache, digest },
        }
    }

    /// Opens a fresh reader positioned at the start.
    pub fn open(&self) -> io::Result<Box<dyn Read + Send>> {
        match &self.source {
            Source::Memory(data) => Ok(Box::new(io::Cursor::new(data.clone()))),
            Source::File(path) => Ok(Box::new(std::fs::File::open(path)?)),
            Source::Blob { cache, digest } => cache.blob(digest).map_err(io::Error::other),
        }
    }

    /// Reads the whole stream into memory.
    pub fn read_all(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.open()?.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Digest of the stream's content.
    ///
    /// A blob-backed stream reports the digest it is stored under without
    /// reading it.
    pub fn digest(&self) -> io::Result<Digest> {
        match &self.source {
            Source::Memory(data) => Ok(Digest::of_bytes(data)),
            Source::Blob { digest, .. } => Ok(digest.clone()),
            Source::File(_) => Ok(Digest::of_reader(&mut self.open()?)?.0),
        }
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Source::Memory(data) => write!(f, "ByteStream(memory, {} bytes)", data.len()),
            Source::File(path) => write!(f, "ByteStream(file {})", path.display()),
            Source::Blob { digest, .. } => write!(f, "ByteStream(blob {digest})"),
        }
    }
}

/// Caches [`ByteStream`] values as a single blob, streamed in both directions.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteStreamCacheable;

impl Cacheable for ByteStreamCacheable {
    type Value = ByteStream;

    fn compute_digest(&self, value: &ByteStream) -> anyhow::Result<Digest> {
        Ok(value.digest()?)
    }

    fn load_cached(&self, cache: &Arc<dyn Cache>, digest: &Digest) -> anyhow::Result<ByteStream> {
        // Fail now rather than on first read if the blob is gone.
        cache.stat(digest)?;
        Ok(ByteStream::from_blob(cache.clone(), digest.clone()))
    }

    fn cache(&self, cache: &dyn Cache, value: &ByteStream) -> anyhow::Result<Digest> {
        let digest = value.digest()?;
        let mut reader = value.open()?;
        cache.write_blob(&digest, &mut reader)?;
        Ok(digest)
    }
}

/// Caches any serde type, encoded with bincode.
pub struct SerdeCacheable<T> {
    _value: PhantomData<fn() -> T>,
}

impl<T> SerdeCacheable<T> {
    /// Creates the adapter.
    pub fn new() -> Self {
        Self {
            _value: PhantomData,
        }
    }
}

impl<T> Default for SerdeCacheable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerdeCacheable<T>
where
    T: Serialize,
{
    fn encode(value: &T) -> anyhow::Result<Vec<u8>> {
        bincode::serde::encode_to_vec(value, bincode::config::standard())
            .context("failed to encode cached value")
    }
}

impl<T> Cacheable for SerdeCacheable<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Value = T;

    fn compute_digest(&self, value: &T) -> anyhow::Result<Digest> {
        Ok(Digest::of_bytes(&Self::encode(value)?))
    }

    fn load_cached(&self, cache: &Arc<dyn Cache>, digest: &Digest) -> anyhow::Result<T> {
        let raw = cache.bytes(digest)?;
        let (value, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .with_context(|| format!("failed to decode cached value {digest}"))?;
        Ok(value)
    }

    fn cache(&self, cache: &dyn Cache, value: &T) -> anyhow::Result<Digest> {
        let raw = Self::encode(value)?;
        let digest = Digest::of_bytes(&raw);
        cache.write_bytes(&digest, &raw)?;
        Ok(digest)
    }
}
