//! The realized values of a node's nested inputs.

use std::any::type_name;
use std::collections::HashMap;

use cairn_common::Digest;

use crate::result::{AnyValue, ResultWithTimestamp};

/// Values of the nested nodes a node declared in its inputs, by input name.
///
/// Built fresh for every compute and moved into it. Looking up a name the
/// node did not declare, or asking for the wrong type, is a bug in the node
/// and panics.
#[derive(Default)]
pub struct Resolved {
    values: HashMap<String, ResultWithTimestamp<AnyValue>>,
}

impl Resolved {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: String, result: ResultWithTimestamp<AnyValue>) {
        self.values.insert(name, result);
    }

    /// The value of the named input.
    ///
    /// # Panics
    ///
    /// If no such input was declared or its value is not a `V`.
    pub fn get<V: Clone + 'static>(&self, name: &str) -> V {
        self.result::<V>(name).value
    }

    /// The full result of the named input.
    ///
    /// # Panics
    ///
    /// If no such input was declared or its value is not a `V`.
    pub fn result<V: Clone + 'static>(&self, name: &str) -> ResultWithTimestamp<V> {
        let erased = self.erased(name);
        match erased.downcast::<V>() {
            Some(result) => result,
            None => panic!(
                "resolved input '{name}' is not a {}",
                type_name::<V>()
            ),
        }
    }

    /// The output digest of the named input, if it has one.
    ///
    /// # Panics
    ///
    /// If no such input was declared.
    pub fn digest(&self, name: &str) -> Option<Digest> {
        self.erased(name).digest.clone()
    }

    /// Returns `true` if an input with this name was resolved.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of resolved inputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the node declared no nested inputs.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Output digests of every resolved input that has one.
    pub(crate) fn digests(&self) -> impl Iterator<Item = (&str, &Digest)> {
        self.values
            .iter()
            .filter_map(|(name, r)| r.digest.as_ref().map(|d| (name.as_str(), d)))
    }

    fn erased(&self, name: &str) -> &ResultWithTimestamp<AnyValue> {
        match self.values.get(name) {
            Some(result) => result,
            None => panic!("input '{name}' was not declared or not resolved"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_tasks::ActionId;
    use chrono::Utc;
    use std::sync::Arc;

    fn entry(value: AnyValue, digest: Option<Digest>) -> ResultWithTimestamp<AnyValue> {
        let now = Utc::now();
        ResultWithTimestamp {
            digest,
            value,
            non_deterministic: false,
            cached: false,
            action_id: ActionId::next(),
            started: now,
            completed: now,
            input_digest: None,
        }
    }

    fn sample() -> Resolved {
        let mut resolved = Resolved::new();
        resolved.insert(
            "seed".to_string(),
            entry(Arc::new("s".to_string()), Some(Digest::of_bytes(b"s"))),
        );
        resolved.insert("count".to_string(), entry(Arc::new(3u64), None));
        resolved
    }

    #[test]
    fn typed_access() {
        let resolved = sample();
        assert_eq!(resolved.get::<String>("seed"), "s");
        assert_eq!(resolved.get::<u64>("count"), 3);
        assert_eq!(resolved.digest("seed"), Some(Digest::of_bytes(b"s")));
        assert_eq!(resolved.digest("count"), None);
        assert_eq!(resolved.len(), 2);
        assert!(resolved.contains("seed"));
    }

    #[test]
    fn digests_skip_undigested_inputs() {
        let resolved = sample();
        let digests: Vec<_> = resolved.digests().collect();
        assert_eq!(digests.len(), 1);
        assert_eq!(digests[0].0, "seed");
    }

    #[test]
    #[should_panic(expected = "was not declared")]
    fn missing_input_panics() {
        sample().get::<String>("nope");
    }

    #[test]
    #[should_panic(expected = "is not a")]
    fn wrong_type_panics() {
        sample().get::<u32>("count");
    }
}
