//! Values produced by nodes, with their digests and timing.

use std::any::Any;
use std::sync::Arc;

use cairn_common::Digest;
use cairn_tasks::ActionId;
use chrono::{DateTime, Utc};

/// A type-erased node output.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// A node's value together with its content digest.
#[derive(Debug, Clone)]
pub struct NodeResult<V> {
    /// Content digest of the value. Present only if the node's output may be
    /// cached and an adapter for its type is registered.
    pub digest: Option<Digest>,
    /// The produced value.
    pub value: V,
    /// The node declared that its output may differ between runs.
    pub non_deterministic: bool,
}

/// A [`NodeResult`] annotated with how and when it was produced.
#[derive(Debug, Clone)]
pub struct ResultWithTimestamp<V> {
    /// Content digest of the value, see [`NodeResult::digest`].
    pub digest: Option<Digest>,
    /// The produced value.
    pub value: V,
    /// See [`NodeResult::non_deterministic`].
    pub non_deterministic: bool,
    /// The value was loaded from the cache rather than computed.
    pub cached: bool,
    /// Tracker identifier of the run that produced the value.
    pub action_id: ActionId,
    /// When the run started.
    pub started: DateTime<Utc>,
    /// When the run completed.
    pub completed: DateTime<Utc>,
    /// Digest of the node's resolved input manifest, when it has one.
    pub input_digest: Option<Digest>,
}

impl<V> ResultWithTimestamp<V> {
    /// Drops the timing information.
    pub fn into_result(self) -> NodeResult<V> {
        NodeResult {
            digest: self.digest,
            value: self.value,
            non_deterministic: self.non_deterministic,
        }
    }

    /// Transforms the value, keeping everything else.
    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> ResultWithTimestamp<U> {
        ResultWithTimestamp {
            digest: self.digest,
            value: f(self.value),
            non_deterministic: self.non_deterministic,
            cached: self.cached,
            action_id: self.action_id,
            started: self.started,
            completed: self.completed,
            input_digest: self.input_digest,
        }
    }
}

impl ResultWithTimestamp<AnyValue> {
    /// Recovers a typed result, or `None` if the value is not a `V`.
    pub(crate) fn downcast<V: Clone + 'static>(&self) -> Option<ResultWithTimestamp<V>> {
        let value = (*self.value).downcast_ref::<V>()?.clone();
        Some(self.clone().map(|_| value))
    }
}
