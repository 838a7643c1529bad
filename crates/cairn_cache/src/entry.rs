//! Pointer records mapping input digests to cached outputs.
//!
//! Each pointer is a JSON file at `<root>/index/<algorithm>/<hex>.json`
//! holding a [`CachedOutput`]. Several pointers may name the same output:
//! the primary input digest and a secondary structural digest are both
//! written when a node's output is stored.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use cairn_common::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::blob::{digest_path, list_digests, TMP_DIR};
use crate::error::CacheError;

/// Subdirectory holding pointer files.
pub(crate) const INDEX_DIR: &str = "index";

/// File extension for pointer files.
const ENTRY_EXT: &str = ".json";

/// Version of the pointer record format. Records with another version load as misses.
pub const CACHE_VERSION: u32 = 1;

/// A persisted record of one computed output.
///
/// Created when a node's output is stored and never mutated in place; a
/// later store for the same pointer replaces the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedOutput {
    /// Digest of the stored output value.
    pub digest: Digest,

    /// When the output was produced.
    pub timestamp: DateTime<Utc>,

    /// Record format version, see [`CACHE_VERSION`].
    pub cache_version: u32,

    /// Digests of the node's named inputs at the time it was computed.
    #[serde(default)]
    pub input_digests: BTreeMap<String, Digest>,

    /// Free-form diagnostics about the producing node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugMetadata>,
}

/// Diagnostic information recorded alongside a cached output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugMetadata {
    /// Label of the action that produced the output.
    pub action: String,

    /// Rust type name of the node that produced the output.
    pub node_type: String,
}

impl CachedOutput {
    /// Creates a record for `digest`, stamped now, with the current format version.
    pub fn new(digest: Digest) -> Self {
        Self {
            digest,
            timestamp: Utc::now(),
            cache_version: CACHE_VERSION,
            input_digests: BTreeMap::new(),
            debug: None,
        }
    }

    /// Records the digest of a named input.
    pub fn with_input(mut self, name: impl Into<String>, digest: Digest) -> Self {
        self.input_digests.insert(name.into(), digest);
        self
    }

    /// Attaches diagnostic metadata.
    pub fn with_debug(mut self, debug: DebugMetadata) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Returns `true` if this record was written by a compatible format version.
    pub fn is_compatible(&self) -> bool {
        self.cache_version == CACHE_VERSION
    }
}

/// The on-disk index of pointer files.
pub struct EntryIndex {
    root: PathBuf,
}

impl EntryIndex {
    /// Creates an index rooted at the given cache directory.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Returns the pointer file path for a digest.
    pub fn entry_path(&self, pointer: &Digest) -> Result<PathBuf, CacheError> {
        digest_path(&self.root.join(INDEX_DIR), pointer, ENTRY_EXT)
    }

    /// Loads the record a pointer names.
    ///
    /// Returns `Ok(None)` if there is no pointer or the record has an
    /// incompatible format version, and an error if the file is unreadable
    /// or corrupt.
    pub fn load(&self, pointer: &Digest) -> Result<Option<CachedOutput>, CacheError> {
        let path = self.entry_path(pointer)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, e)),
        };
        let entry: CachedOutput =
            serde_json::from_str(&content).map_err(|e| CacheError::EntryParse {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(entry.is_compatible().then_some(entry))
    }

    /// Writes `entry` under every pointer digest.
    ///
    /// If a pointer already names a different output, the overwrite is
    /// logged as a non-determinism warning and proceeds.
    pub fn store(&self, pointers: &[Digest], entry: &CachedOutput) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(entry).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;

        let tmp_dir = self.root.join(TMP_DIR);
        std::fs::create_dir_all(&tmp_dir).map_err(|e| CacheError::io(&tmp_dir, e))?;

        for pointer in pointers {
            let path = self.entry_path(pointer)?;
            if let Ok(Some(previous)) = self.load(pointer) {
                if previous.digest != entry.digest {
                    warn!(
                        pointer = %pointer,
                        previous = %previous.digest,
                        new = %entry.digest,
                        "cache entry overwritten with a different output; inputs are not deterministic"
                    );
                }
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
            }
            let mut tmp =
                NamedTempFile::new_in(&tmp_dir).map_err(|e| CacheError::io(&tmp_dir, e))?;
            tmp.write_all(json.as_bytes())
                .map_err(|e| CacheError::io(&path, e))?;
            tmp.persist(&path)
                .map_err(|e| CacheError::io(&path, e.error))?;
        }
        Ok(())
    }

    /// Lists every pointer digest together with its file path.
    pub fn list(&self) -> Result<Vec<(Digest, PathBuf)>, CacheError> {
        list_digests(&self.root.join(INDEX_DIR), ENTRY_EXT)
    }

    /// Deletes a pointer file. Missing pointers are not an error.
    pub fn remove(&self, pointer: &Digest) -> Result<(), CacheError> {
        let path = self.entry_path(pointer)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_index() -> (tempfile::TempDir, EntryIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = EntryIndex::new(dir.path());
        (dir, index)
    }

    #[test]
    fn new_entry_is_compatible() {
        let e = CachedOutput::new(Digest::of_bytes(b"out"));
        assert_eq!(e.cache_version, CACHE_VERSION);
        assert!(e.is_compatible());
        assert!(e.input_digests.is_empty());
        assert!(e.debug.is_none());
    }

    #[test]
    fn store_and_load_roundtrip() {
        let (_dir, index) = make_index();
        let pointer = Digest::of_bytes(b"inputs");
        let entry = CachedOutput::new(Digest::of_bytes(b"output"))
            .with_input("source", Digest::of_bytes(b"src"))
            .with_debug(DebugMetadata {
                action: "go.build".to_string(),
                node_type: "BuildBinary".to_string(),
            });
        index.store(&[pointer.clone()], &entry).unwrap();

        let loaded = index.load(&pointer).unwrap().unwrap();
        assert_eq!(loaded, entry);
    }

    #[test]
    fn several_pointers_share_one_output() {
        let (_dir, index) = make_index();
        let primary = Digest::of_bytes(b"primary");
        let secondary = Digest::of_bytes(b"secondary");
        let entry = CachedOutput::new(Digest::of_bytes(b"output"));
        index
            .store(&[primary.clone(), secondary.clone()], &entry)
            .unwrap();
        assert_eq!(index.load(&primary).unwrap().unwrap().digest, entry.digest);
        assert_eq!(index.load(&secondary).unwrap().unwrap().digest, entry.digest);
        assert_eq!(index.list().unwrap().len(), 2);
    }

    #[test]
    fn overwrite_with_different_output_is_not_an_error() {
        let (_dir, index) = make_index();
        let pointer = Digest::of_bytes(b"inputs");
        index
            .store(&[pointer.clone()], &CachedOutput::new(Digest::of_bytes(b"v1")))
            .unwrap();
        index
            .store(&[pointer.clone()], &CachedOutput::new(Digest::of_bytes(b"v2")))
            .unwrap();
        let loaded = index.load(&pointer).unwrap().unwrap();
        assert_eq!(loaded.digest, Digest::of_bytes(b"v2"));
    }

    #[test]
    fn load_missing_returns_none() {
        let (_dir, index) = make_index();
        assert!(index.load(&Digest::of_bytes(b"nope")).unwrap().is_none());
    }

    #[test]
    fn load_corrupt_json_errors() {
        let (_dir, index) = make_index();
        let pointer = Digest::of_bytes(b"corrupt");
        let path = index.entry_path(&pointer).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not valid json {{{").unwrap();
        assert!(matches!(
            index.load(&pointer).unwrap_err(),
            CacheError::EntryParse { .. }
        ));
    }

    #[test]
    fn incompatible_version_is_a_miss() {
        let (_dir, index) = make_index();
        let pointer = Digest::of_bytes(b"old");
        let mut entry = CachedOutput::new(Digest::of_bytes(b"output"));
        entry.cache_version = CACHE_VERSION + 1;
        index.store(&[pointer.clone()], &entry).unwrap();
        assert!(index.load(&pointer).unwrap().is_none());
    }

    #[test]
    fn json_layout_is_stable() {
        let entry = CachedOutput {
            digest: Digest::new("sha256", "ab"),
            timestamp: DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
                .unwrap()
                .with_timezone(&Utc),
            cache_version: 1,
            input_digests: BTreeMap::from([("src".to_string(), Digest::new("sha256", "cd"))]),
            debug: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(
            json,
            r#"{"digest":"sha256:ab","timestamp":"2024-01-02T03:04:05Z","cache_version":1,"input_digests":{"src":"sha256:cd"}}"#
        );
    }

    #[test]
    fn entry_path_layout() {
        let (dir, index) = make_index();
        let path = index.entry_path(&Digest::new("sha256", "ff00")).unwrap();
        assert_eq!(
            path,
            dir.path().join("index").join("sha256").join("ff00.json")
        );
    }
}
