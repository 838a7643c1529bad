//! Local content-addressed cache for computed outputs.
//!
//! Blobs are stored by digest under `blobs/<algorithm>/<hex>`, and pointer
//! files under `index/<algorithm>/<hex>.json` map an input digest to the
//! [`CachedOutput`] that was produced for it. Reads are fail-safe: the
//! orchestrator treats every error here as a cache miss.

#![warn(missing_docs)]

pub mod blob;
pub mod cache;
pub mod entry;
pub mod error;

pub use blob::{BlobInfo, BlobStore};
pub use cache::{Cache, LocalCache, NoopCache};
pub use entry::{CachedOutput, DebugMetadata, EntryIndex, CACHE_VERSION};
pub use error::CacheError;
