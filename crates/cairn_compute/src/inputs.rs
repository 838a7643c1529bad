//! Input manifests: the declared, named inputs of a node.
//!
//! The digest of a manifest keys the node's cache entry, so it must cover
//! everything that can change the node's output. Entries are folded in
//! declaration order; each contributes its name, a kind tag and the digest
//! of its payload, separated by NUL bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use cairn_common::{Digest, DigestWriter};
use serde::Serialize;

use crate::node::{Identity, Node, NodeInner};
use crate::resolved::Resolved;

/// Streams a custom input into the manifest hasher.
pub trait Marshaler: Send + Sync {
    /// Writes the canonical byte form of the input to `out`.
    fn marshal(&self, out: &mut dyn Write) -> io::Result<()>;
}

enum Value {
    Str(String),
    Strs(Vec<String>),
    StrMap(BTreeMap<String, String>),
    Json(Vec<u8>),
    Digest(Digest),
    Node(Arc<NodeInner>),
    Indigestible,
    Marshal(Box<dyn Marshaler>),
}

impl Value {
    fn tag(&self) -> &'static str {
        match self {
            Value::Str(_) => "str",
            Value::Strs(_) => "strs",
            Value::StrMap(_) => "strmap",
            Value::Json(_) => "json",
            Value::Digest(_) => "digest",
            Value::Node(_) => "node",
            Value::Indigestible => "indigestible",
            Value::Marshal(_) => "marshal",
        }
    }
}

/// An ordered, append-only list of named inputs.
///
/// Names are unique within a manifest; declaring a name twice is a bug in
/// the node and panics.
#[derive(Default)]
pub struct Inputs {
    entries: Vec<(String, Value)>,
    errors: Vec<String>,
}

impl Inputs {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a literal string input.
    pub fn str(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name.into(), Value::Str(value.into()))
    }

    /// Declares a list of strings. Order is significant.
    pub fn strs<I, S>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push(name.into(), Value::Strs(values))
    }

    /// Declares a string map. Keys are sorted before hashing.
    pub fn str_map<I, K, V>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.push(name.into(), Value::StrMap(map))
    }

    /// Declares a structured value, hashed over its JSON encoding.
    ///
    /// An encoding failure is recorded and fails the node when it runs.
    pub fn json<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        let name = name.into();
        match serde_json::to_vec(value) {
            Ok(bytes) => self.push(name, Value::Json(bytes)),
            Err(e) => {
                self.errors.push(format!("input '{name}': {e}"));
                self.push(name, Value::Indigestible)
            }
        }
    }

    /// Declares an input whose digest is already known.
    pub fn digest(self, name: impl Into<String>, digest: Digest) -> Self {
        self.push(name.into(), Value::Digest(digest))
    }

    /// Declares a nested node. Its value is resolved before this node runs
    /// and its output digest feeds this manifest's digest.
    pub fn computable<V>(self, name: impl Into<String>, node: &Node<V>) -> Self {
        self.push(name.into(), Value::Node(node.inner.clone()))
    }

    /// Declares an input that cannot be digested.
    ///
    /// It does not contribute to the digest, and its presence makes the
    /// node's output uncacheable.
    pub fn indigestible(self, name: impl Into<String>) -> Self {
        self.push(name.into(), Value::Indigestible)
    }

    /// Declares an input that is streamed into the hasher by `marshaler`.
    pub fn marshal(self, name: impl Into<String>, marshaler: impl Marshaler + 'static) -> Self {
        self.push(name.into(), Value::Marshal(Box::new(marshaler)))
    }

    fn push(mut self, name: String, value: Value) -> Self {
        if self.entries.iter().any(|(existing, _)| *existing == name) {
            panic!("input '{name}' declared twice");
        }
        self.entries.push((name, value));
        self
    }

    /// Returns `true` if any entry is indigestible.
    pub fn has_indigestible(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, v)| matches!(v, Value::Indigestible))
    }

    /// Number of declared inputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Errors recorded while the manifest was built, joined into one message.
    pub fn error(&self) -> Option<String> {
        (!self.errors.is_empty()).then(|| self.errors.join("; "))
    }

    /// The nested nodes, in declaration order.
    pub(crate) fn nodes(&self) -> impl Iterator<Item = (&str, &Arc<NodeInner>)> {
        self.entries.iter().filter_map(|(name, value)| match value {
            Value::Node(node) => Some((name.as_str(), node)),
            _ => None,
        })
    }

    /// Digest of the manifest once its nested nodes are resolved.
    ///
    /// Returns `Ok(None)` if a nested node produced no output digest.
    pub fn digest_resolved(&self, resolved: &Resolved) -> io::Result<Option<Digest>> {
        self.fold(None, |name, _| resolved.digest(name))
    }

    /// Digest of the manifest before resolution, prefixed with `type_name`.
    ///
    /// Nested nodes contribute their own identity instead of their output.
    /// The identity is stable (reproducible across processes) unless some
    /// leaf is a precomputed value without a known digest, an entry is
    /// indigestible, or a marshaler failed.
    pub fn identity(&self, type_name: &str) -> Identity {
        self.fingerprint(type_name).0
    }

    /// Like [`Inputs::identity`], also returning whether every entry went
    /// into the digest. Indigestible entries and marshaler or builder errors
    /// leave it incomplete.
    pub(crate) fn fingerprint(&self, type_name: &str) -> (Identity, bool) {
        let complete = !self.has_indigestible() && self.errors.is_empty();
        let mut stable = complete;
        let folded = self.fold(Some(type_name), |_, node| {
            let nested = node.identity();
            stable &= nested.stable;
            Some(nested.digest)
        });
        match folded {
            Ok(Some(digest)) => (Identity { digest, stable }, complete),
            Ok(None) => unreachable!("identity folding never omits a nested node"),
            Err(e) => {
                let digest = Digest::of_bytes(format!("{type_name}\0{e}").as_bytes());
                (
                    Identity {
                        digest,
                        stable: false,
                    },
                    false,
                )
            }
        }
    }

    fn fold(
        &self,
        type_name: Option<&str>,
        mut nested: impl FnMut(&str, &NodeInner) -> Option<Digest>,
    ) -> io::Result<Option<Digest>> {
        let mut out = DigestWriter::new();
        if let Some(type_name) = type_name {
            write_part(&mut out, b"type")?;
            write_part(&mut out, type_name.as_bytes())?;
        }
        for (name, value) in &self.entries {
            let payload = match value {
                Value::Indigestible => continue,
                Value::Str(s) => Digest::of_bytes(s.as_bytes()),
                Value::Json(bytes) => Digest::of_bytes(bytes),
                Value::Digest(d) => d.clone(),
                Value::Strs(list) => {
                    let mut h = DigestWriter::new();
                    for s in list {
                        write_part(&mut h, s.as_bytes())?;
                    }
                    h.finish()
                }
                Value::StrMap(map) => {
                    let mut h = DigestWriter::new();
                    for (k, v) in map {
                        write_part(&mut h, k.as_bytes())?;
                        write_part(&mut h, v.as_bytes())?;
                    }
                    h.finish()
                }
                Value::Marshal(m) => {
                    let mut h = DigestWriter::new();
                    m.marshal(&mut h)?;
                    h.finish()
                }
                Value::Node(node) => match nested(name.as_str(), node.as_ref()) {
                    Some(d) => d,
                    None => return Ok(None),
                },
            };
            write_part(&mut out, name.as_bytes())?;
            write_part(&mut out, value.tag().as_bytes())?;
            write_part(&mut out, payload.to_string().as_bytes())?;
        }
        Ok(Some(out.finish()))
    }
}

fn write_part(out: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    out.write_all(bytes)?;
    out.write_all(&[0])
}

impl fmt::Debug for Inputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, v)| (name, v.tag())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_deps() -> Resolved {
        Resolved::new()
    }

    fn digest(inputs: &Inputs) -> Digest {
        inputs.digest_resolved(&no_deps()).unwrap().unwrap()
    }

    #[test]
    fn same_inputs_same_digest() {
        let a = Inputs::new().str("name", "x").json("cfg", &[1, 2, 3]);
        let b = Inputs::new().str("name", "x").json("cfg", &[1, 2, 3]);
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn changing_a_value_changes_the_digest() {
        let a = Inputs::new().str("name", "x");
        let b = Inputs::new().str("name", "y");
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn names_are_part_of_the_digest() {
        let a = Inputs::new().str("a", "v");
        let b = Inputs::new().str("b", "v");
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn declaration_order_matters() {
        let a = Inputs::new().str("a", "1").str("b", "2");
        let b = Inputs::new().str("b", "2").str("a", "1");
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn kinds_are_part_of_the_digest() {
        let a = Inputs::new().str("v", "x");
        let b = Inputs::new().strs("v", ["x"]);
        assert_ne!(digest(&a), digest(&b));
    }

    #[test]
    fn str_map_is_sorted() {
        let a = Inputs::new().str_map("env", [("B", "2"), ("A", "1")]);
        let b = Inputs::new().str_map("env", [("A", "1"), ("B", "2")]);
        assert_eq!(digest(&a), digest(&b));
    }

    #[test]
    fn indigestible_entries_do_not_affect_the_digest() {
        let a = Inputs::new().str("name", "x").indigestible("conn");
        let b = Inputs::new().str("name", "x").indigestible("other");
        assert!(a.has_indigestible());
        assert_eq!(digest(&a), digest(&b));
        assert!(!a.identity("T").stable);
    }

    #[test]
    fn marshaler_streams_into_the_digest() {
        struct Fixed(&'static [u8]);
        impl Marshaler for Fixed {
            fn marshal(&self, out: &mut dyn Write) -> io::Result<()> {
                out.write_all(self.0)
            }
        }
        let a = Inputs::new().marshal("blob", Fixed(b"abc"));
        let b = Inputs::new().marshal("blob", Fixed(b"abc"));
        let c = Inputs::new().marshal("blob", Fixed(b"abd"));
        assert_eq!(digest(&a), digest(&b));
        assert_ne!(digest(&a), digest(&c));
    }

    #[test]
    fn failing_marshaler_is_an_error() {
        struct Broken;
        impl Marshaler for Broken {
            fn marshal(&self, _out: &mut dyn Write) -> io::Result<()> {
                Err(io::Error::other("unreadable"))
            }
        }
        let inputs = Inputs::new().marshal("blob", Broken);
        assert!(inputs.digest_resolved(&no_deps()).is_err());
        assert!(!inputs.identity("T").stable);
    }

    #[test]
    fn json_error_is_recorded() {
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);
        let inputs = Inputs::new().json("map", &bad);
        assert!(inputs.error().unwrap().contains("input 'map'"));
    }

    #[test]
    fn identity_includes_the_type() {
        let a = Inputs::new().str("name", "x");
        let ia = a.identity("A");
        let ib = a.identity("B");
        assert_ne!(ia.digest, ib.digest);
        assert!(ia.stable);
        assert_eq!(a.identity("A").digest, ia.digest);
    }

    #[test]
    #[should_panic(expected = "declared twice")]
    fn duplicate_names_panic() {
        let _ = Inputs::new().str("a", "1").str("a", "2");
    }

    #[test]
    fn debug_lists_names_and_kinds() {
        let inputs = Inputs::new().str("a", "1").indigestible("b");
        assert_eq!(
            format!("{inputs:?}"),
            r#"[("a", "str"), ("b", "indigestible")]"#
        );
    }
}
