//! Shared foundational types used across the Cairn build engine.
//!
//! This crate provides the content digest that keys every cache entry and
//! deduplication table, streaming hashing helpers, and the common internal
//! error type.

#![warn(missing_docs)]

pub mod digest;
pub mod result;

pub use digest::{Digest, DigestWriter, ParseDigestError, SHA256};
pub use result::InternalError;
