//! Content-addressed blob storage.
//!
//! Every blob lives at `<root>/blobs/<algorithm>/<hex>` and holds exactly the
//! bytes that hash to that digest, with no header. Writes go through a
//! temporary file in `<root>/tmp` and are renamed into place, so a reader
//! never observes a partial blob and concurrent writers of the same digest
//! race harmlessly.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use cairn_common::{Digest, DigestWriter, SHA256};
use tempfile::NamedTempFile;

use crate::error::CacheError;

/// Subdirectory holding blobs.
pub(crate) const BLOBS_DIR: &str = "blobs";

/// Subdirectory holding in-flight writes.
pub(crate) const TMP_DIR: &str = "tmp";

/// Metadata about a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobInfo {
    /// Size of the blob in bytes.
    pub size: u64,
}

/// Returns `<base>/<algorithm>/<hex><ext>` for a digest that is safe to use as a path.
pub(crate) fn digest_path(base: &Path, digest: &Digest, ext: &str) -> Result<PathBuf, CacheError> {
    let algorithm_ok = !digest.algorithm().is_empty()
        && digest
            .algorithm()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    let hex_ok = !digest.hex().is_empty() && digest.hex().chars().all(|c| c.is_ascii_hexdigit());
    if !algorithm_ok || !hex_ok {
        return Err(CacheError::InvalidDigest {
            digest: digest.to_string(),
        });
    }
    Ok(base
        .join(digest.algorithm())
        .join(format!("{}{ext}", digest.hex())))
}

/// Walks `<base>/<algorithm>/<hex><ext>` and returns every well-formed digest found.
pub(crate) fn list_digests(base: &Path, ext: &str) -> Result<Vec<(Digest, PathBuf)>, CacheError> {
    let mut found = Vec::new();
    if !base.exists() {
        return Ok(found);
    }
    let algorithms = std::fs::read_dir(base).map_err(|e| CacheError::io(base, e))?;
    for algorithm in algorithms {
        let algorithm = algorithm.map_err(|e| CacheError::io(base, e))?;
        let dir = algorithm.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(algorithm_name) = dir.file_name().and_then(|s| s.to_str()).map(str::to_string)
        else {
            continue;
        };
        let entries = std::fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&dir, e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(hex) = name.strip_suffix(ext) else {
                continue;
            };
            if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                continue;
            }
            found.push((Digest::new(algorithm_name.clone(), hex), path));
        }
    }
    found.sort();
    Ok(found)
}

/// Writes into a file and a hasher at the same time.
struct HashingWriter<'a> {
    file: &'a mut File,
    hasher: DigestWriter,
}

impl Write for HashingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.write_all(&buf[..n])?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Content-addressed store for raw blobs.
pub struct BlobStore {
    /// Cache root directory (the parent of `blobs/` and `tmp/`).
    root: PathBuf,
}

impl BlobStore {
    /// Creates a blob store rooted at the given cache directory.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Returns the path a blob with this digest is (or would be) stored at.
    pub fn blob_path(&self, digest: &Digest) -> Result<PathBuf, CacheError> {
        digest_path(&self.root.join(BLOBS_DIR), digest, "")
    }

    /// Returns `true` if a blob is stored under the digest.
    pub fn contains(&self, digest: &Digest) -> bool {
        self.blob_path(digest).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Returns the size of a stored blob.
    pub fn stat(&self, digest: &Digest) -> Result<BlobInfo, CacheError> {
        let path = self.blob_path(digest)?;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(BlobInfo { size: meta.len() }),
            Ok(_) => Err(CacheError::NotFound {
                digest: digest.clone(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CacheError::NotFound {
                digest: digest.clone(),
            }),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Opens a stored blob for streaming reads.
    pub fn open(&self, digest: &Digest) -> Result<File, CacheError> {
        let path = self.blob_path(digest)?;
        File::open(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                CacheError::NotFound {
                    digest: digest.clone(),
                }
            } else {
                CacheError::io(path, e)
            }
        })
    }

    /// Reads a stored blob fully into memory.
    pub fn read(&self, digest: &Digest) -> Result<Vec<u8>, CacheError> {
        let path = self.blob_path(digest)?;
        let mut file = self.open(digest)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| CacheError::io(path, e))?;
        Ok(data)
    }

    /// Stores the bytes produced by `reader` under `digest`.
    ///
    /// Returns `Ok(false)` without reading anything if the blob already
    /// exists. For SHA-256 digests the streamed bytes are hashed on the way
    /// to disk and the write is rejected if they do not match.
    pub fn write(&self, digest: &Digest, reader: &mut dyn Read) -> Result<bool, CacheError> {
        let path = self.blob_path(digest)?;
        if path.is_file() {
            return Ok(false);
        }

        let tmp_dir = self.root.join(TMP_DIR);
        std::fs::create_dir_all(&tmp_dir).map_err(|e| CacheError::io(&tmp_dir, e))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }

        let mut tmp = NamedTempFile::new_in(&tmp_dir).map_err(|e| CacheError::io(&tmp_dir, e))?;
        let mut sink = HashingWriter {
            file: tmp.as_file_mut(),
            hasher: DigestWriter::new(),
        };
        io::copy(reader, &mut sink).map_err(|e| CacheError::io(&path, e))?;
        sink.flush().map_err(|e| CacheError::io(&path, e))?;
        let actual = sink.hasher.finish();

        if digest.algorithm() == SHA256 && actual != *digest {
            return Err(CacheError::DigestMismatch {
                expected: digest.clone(),
                actual,
            });
        }

        tmp.persist(&path)
            .map_err(|e| CacheError::io(&path, e.error))?;
        Ok(true)
    }

    /// Deletes a stored blob. Missing blobs are not an error.
    pub fn remove(&self, digest: &Digest) -> Result<(), CacheError> {
        let path = self.blob_path(digest)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Lists the digests of every stored blob.
    pub fn list(&self) -> Result<Vec<Digest>, CacheError> {
        Ok(list_digests(&self.root.join(BLOBS_DIR), "")?
            .into_iter()
            .map(|(digest, _)| digest)
            .collect())
    }

    /// Re-hashes every SHA-256 blob and returns those whose content no longer matches.
    pub fn verify(&self) -> Result<Vec<Digest>, CacheError> {
        let mut corrupt = Vec::new();
        for (digest, path) in list_digests(&self.root.join(BLOBS_DIR), "")? {
            if digest.algorithm() != SHA256 {
                continue;
            }
            let mut file = File::open(&path).map_err(|e| CacheError::io(&path, e))?;
            let (actual, _) = Digest::of_reader(&mut file).map_err(|e| CacheError::io(&path, e))?;
            if actual != digest {
                corrupt.push(digest);
            }
        }
        Ok(corrupt)
    }
}
