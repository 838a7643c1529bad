//! What a running compute can see of the engine.

use std::sync::Arc;

use cairn_cache::Cache;
use cairn_tasks::ActionId;
use tokio_util::sync::CancellationToken;

use crate::error::ComputeError;
use crate::node::Node;
use crate::orchestrator::{InvocationState, Orchestrator};
use crate::result::ResultWithTimestamp;

/// Handed to [`Computable::compute`](crate::Computable::compute).
///
/// Lets a compute request further nodes, observe cancellation and inspect
/// the chain of actions that led to it.
pub struct ComputeContext {
    pub(crate) orchestrator: Orchestrator,
    pub(crate) invocation: Option<Arc<InvocationState>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) chain: Vec<String>,
    pub(crate) action_id: ActionId,
}

impl ComputeContext {
    /// Resolves another node from inside a compute.
    ///
    /// The node runs in the same invocation, so deduplicated nodes are
    /// shared with the rest of the graph.
    pub async fn get_value<V: Clone + Send + Sync + 'static>(
        &self,
        node: &Node<V>,
    ) -> Result<ResultWithTimestamp<V>, ComputeError> {
        self.orchestrator
            .resolve(node, self.invocation.as_ref(), &self.chain, &self.cancel)
            .await
    }

    /// The token that fires when this run is cancelled.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns `true` once this run has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Labels of the enclosing actions, outermost first, ending with this one.
    pub fn action_chain(&self) -> &[String] {
        &self.chain
    }

    /// Tracker identifier of this run.
    pub fn action_id(&self) -> ActionId {
        self.action_id
    }

    /// The cache the orchestrator reads and writes.
    pub fn cache(&self) -> &Arc<dyn Cache> {
        self.orchestrator.cache()
    }
}
