//! Content digests used as the universal cache and deduplication key.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

/// Name of the only algorithm the engine produces digests with.
pub const SHA256: &str = "sha256";

/// A cryptographic content fingerprint: an algorithm name plus a lowercase hex string.
///
/// Equality is structural. The default value is "unset" and must never be used
/// as a cache key; see [`Digest::is_set`].
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Creates a digest from an algorithm name and a hex string.
    ///
    /// The hex string is normalized to lowercase.
    pub fn new(algorithm: impl Into<String>, hex: impl AsRef<str>) -> Self {
        Self {
            algorithm: algorithm.into(),
            hex: hex.as_ref().to_ascii_lowercase(),
        }
    }

    /// Computes the SHA-256 digest of a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self::from_sha256(Sha256::digest(data).as_slice())
    }

    /// Computes the SHA-256 digest of everything readable from `reader`.
    ///
    /// Returns the digest together with the number of bytes consumed.
    pub fn of_reader(reader: &mut dyn Read) -> io::Result<(Self, u64)> {
        let mut writer = DigestWriter::new();
        let size = io::copy(reader, &mut writer)?;
        Ok((writer.finish(), size))
    }

    fn from_sha256(raw: &[u8]) -> Self {
        Self {
            algorithm: SHA256.to_string(),
            hex: hex::encode(raw),
        }
    }

    /// The algorithm name, e.g. `"sha256"`. Empty when unset.
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The lowercase hex encoding of the digest bytes. Empty when unset.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Returns `true` if both the algorithm and the hex string are present.
    pub fn is_set(&self) -> bool {
        !self.algorithm.is_empty() && !self.hex.is_empty()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_set() {
            write!(f, "{}:{}", self.algorithm, self.hex)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_set() {
            return write!(f, "Digest(unset)");
        }
        let short = self.hex.get(..12).unwrap_or(&self.hex);
        write!(f, "Digest({}:{short}..)", self.algorithm)
    }
}

/// Error returned when parsing a `"<algorithm>:<hex>"` string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid digest '{input}': {reason}")]
pub struct ParseDigestError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl FromStr for Digest {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParseDigestError {
            input: s.to_string(),
            reason,
        };
        let (algorithm, hex) = s.split_once(':').ok_or_else(|| err("missing ':'"))?;
        if algorithm.is_empty() {
            return Err(err("empty algorithm"));
        }
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(err("hex part is not hexadecimal"));
        }
        Ok(Digest::new(algorithm, hex))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Ok(Digest::default());
        }
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An [`io::Write`] sink that feeds everything written into a SHA-256 hasher.
///
/// Used to digest streamed content (blobs, marshaled inputs) without
/// buffering it in memory.
#[derive(Default)]
pub struct DigestWriter {
    hasher: Sha256,
    written: u64,
}

impl DigestWriter {
    /// Creates an empty hashing sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Consumes the sink and returns the digest of everything written.
    pub fn finish(self) -> Digest {
        Digest::from_sha256(self.hasher.finalize().as_slice())
    }
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
